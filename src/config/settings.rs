use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use serde::Deserialize;

/// Configuration settings for the request security pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server configuration
    pub server: ServerConfig,
    /// Backing store selection for blocklist and traffic counters
    pub storage: StorageConfig,
    /// Client address resolution
    pub client_ip: ClientIpConfig,
    /// Blocklist behaviour and heuristics
    pub blocklist: BlocklistConfig,
    /// Traffic-anomaly detection thresholds
    pub ddos: DdosConfig,
    /// Response headers applied to every forwarded request
    #[serde(default = "default_security_headers")]
    pub headers: BTreeMap<String, String>,
    /// Administrative API
    pub admin: AdminConfig,
    /// Prometheus exporter
    pub metrics: MetricsConfig,
}

/// Server configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind the server to
    pub host: String,
    /// Port number to listen on
    pub port: u16,
    /// Upper bound on the time spent handling one request
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            request_timeout_secs: 30,
        }
    }
}

/// Which backend holds the shared security state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local maps; each instance enforces independently
    Memory,
    /// Redis, shared between instances
    Redis,
}

/// Storage configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Redis connection URL, required for the redis backend
    pub redis_url: Option<String>,
    /// Prefix applied to every Redis key
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            redis_url: None,
            key_prefix: "shield".to_string(),
        }
    }
}

/// Header names probed, in order, when resolving the client address
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientIpConfig {
    /// Comma-separated proxy chain header; its first entry is used
    pub forwarded_for_header: String,
    /// Single-value header set by the fronting proxy
    pub real_ip_header: String,
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            forwarded_for_header: "x-forwarded-for".to_string(),
            real_ip_header: "x-real-ip".to_string(),
        }
    }
}

/// Blocklist configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlocklistConfig {
    /// Case-insensitive user-agent fragments of known bad bots and scanners
    pub bad_user_agents: Vec<String>,
    /// Case-insensitive path fragments of vulnerability probes
    pub probe_paths: Vec<String>,
    /// Lifetime of a heuristic auto-block in seconds
    pub heuristic_block_secs: u64,
    /// How long a removal tombstone is kept in seconds
    pub tombstone_secs: u64,
    /// Interval between expiry sweeps and idle evictions in seconds
    pub sweep_interval_secs: u64,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            bad_user_agents: ["sqlmap", "nikto", "nmap", "masscan", "zgrab", "dirbuster", "nuclei"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            probe_paths: [
                "/wp-admin",
                "/wp-login.php",
                "/.env",
                "/.git/",
                "/phpmyadmin",
                "/cgi-bin/",
                "/etc/passwd",
                "../",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            heuristic_block_secs: 3600,
            tombstone_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl BlocklistConfig {
    pub fn heuristic_block(&self) -> Duration {
        Duration::from_secs(self.heuristic_block_secs)
    }

    pub fn tombstone(&self) -> Duration {
        Duration::from_secs(self.tombstone_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Traffic-anomaly detection settings
///
/// Windows and TTLs are in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DdosConfig {
    /// Short horizon used for burst detection
    pub burst_window_ms: u64,
    /// Requests tolerated inside the burst horizon
    pub burst_threshold: u64,
    /// Long horizon used for sustained-rate detection
    pub sustained_window_ms: u64,
    /// Requests tolerated inside the sustained horizon
    pub sustained_threshold: u64,
    /// Time buckets each horizon is divided into
    pub buckets_per_window: u32,
    /// Auto-block lifetime for a first offense
    pub block_ms: u64,
    /// Growth factor applied to the lifetime on each repeat offense
    pub backoff_multiplier: f64,
    /// Ceiling on an escalated auto-block lifetime
    pub max_block_ms: u64,
    /// How long past offenses count towards escalation
    pub offense_memory_ms: u64,
    /// Inactivity after which a client's counters are dropped
    pub idle_eviction_ms: u64,
}

impl Default for DdosConfig {
    fn default() -> Self {
        Self {
            burst_window_ms: 10_000,
            burst_threshold: 100,
            sustained_window_ms: 60_000,
            sustained_threshold: 300,
            buckets_per_window: 10,
            block_ms: 15 * 60 * 1000,
            backoff_multiplier: 2.0,
            max_block_ms: 24 * 60 * 60 * 1000,
            offense_memory_ms: 24 * 60 * 60 * 1000,
            idle_eviction_ms: 5 * 60 * 1000,
        }
    }
}

impl DdosConfig {
    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }

    pub fn sustained_window(&self) -> Duration {
        Duration::from_millis(self.sustained_window_ms)
    }

    pub fn offense_memory(&self) -> Duration {
        Duration::from_millis(self.offense_memory_ms)
    }

    pub fn idle_eviction(&self) -> Duration {
        Duration::from_millis(self.idle_eviction_ms)
    }
}

/// Administrative API settings
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    /// Bearer token expected in the `Authorization` header
    pub api_key: String,
}

/// Prometheus exporter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: "127.0.0.1:9000".to_string(),
        }
    }
}

fn default_security_headers() -> BTreeMap<String, String> {
    [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("x-xss-protection", "1; mode=block"),
        ("strict-transport-security", "max-age=31536000; includeSubDomains"),
        ("referrer-policy", "strict-origin-when-cross-origin"),
        ("content-security-policy", "default-src 'self'"),
        ("permissions-policy", "geolocation=(), microphone=(), camera=()"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            client_ip: ClientIpConfig::default(),
            blocklist: BlocklistConfig::default(),
            ddos: DdosConfig::default(),
            headers: default_security_headers(),
            admin: AdminConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Settings {
    /// Load configuration from config files and environment variables
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // APP_DDOS__BURST_THRESHOLD=50 -> ddos.burst_threshold
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("blocklist.bad_user_agents")
                    .with_list_parse_key("blocklist.probe_paths")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic checks that serde cannot express. Every problem is reported,
    /// not just the first.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let mut problems = Vec::new();
        let ddos = &self.ddos;

        if ddos.burst_window_ms == 0 {
            problems.push("ddos.burst_window_ms must be greater than 0".to_string());
        }
        if ddos.sustained_window_ms < ddos.burst_window_ms {
            problems.push("ddos.sustained_window_ms must not be shorter than ddos.burst_window_ms".to_string());
        }
        if ddos.idle_eviction_ms < ddos.sustained_window_ms {
            problems.push("ddos.idle_eviction_ms must not be shorter than ddos.sustained_window_ms".to_string());
        }
        if ddos.burst_threshold == 0 || ddos.sustained_threshold == 0 {
            problems.push("ddos thresholds must be greater than 0".to_string());
        }
        if ddos.buckets_per_window == 0 {
            problems.push("ddos.buckets_per_window must be greater than 0".to_string());
        }
        if !(ddos.backoff_multiplier >= 1.0) {
            problems.push("ddos.backoff_multiplier must be at least 1.0".to_string());
        }
        if ddos.block_ms == 0 {
            problems.push("ddos.block_ms must be greater than 0".to_string());
        }
        if ddos.max_block_ms < ddos.block_ms {
            problems.push("ddos.max_block_ms must not be smaller than ddos.block_ms".to_string());
        }
        if self.blocklist.sweep_interval_secs == 0 {
            problems.push("blocklist.sweep_interval_secs must be greater than 0".to_string());
        }

        for (name, value) in &self.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                problems.push(format!("headers: invalid header name {:?}", name));
            }
            if HeaderValue::from_str(value).is_err() {
                problems.push(format!("headers: invalid value for {:?}", name));
            }
        }

        if self.admin.enabled && self.admin.api_key.trim().is_empty() {
            problems.push("admin.api_key must be set when admin.enabled is true".to_string());
        }
        if self.storage.backend == StorageBackend::Redis && self.storage.redis_url.is_none() {
            problems.push("storage.redis_url is required for the redis backend".to_string());
        }
        if self.metrics.enabled && self.metrics.listen_address.parse::<std::net::SocketAddr>().is_err() {
            problems.push(format!("metrics.listen_address {:?} is not a socket address", self.metrics.listen_address));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(config::ConfigError::Message(problems.join("; ")))
        }
    }
}
