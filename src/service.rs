use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{middleware, Extension, Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::admin::setup_admin_router;
use crate::config::{AdminConfig, ServerConfig, Settings, StorageBackend};
use crate::core::{ClientIdentifier, DdosProtectionService, IpBlockingService, SecurityHeadersService};
use crate::middleware::{security_layer, SecurityContext, SecurityMiddleware};
use crate::store::{
    BlocklistStore, MemoryBlocklistStore, MemoryTrafficStore, RedisBlocklistStore, RedisTrafficStore, TrafficStore,
};
use crate::utils::{SecurityError, SecurityResult};

/// Service graph shared by the pipeline, the admin API and the sweeper
#[derive(Clone)]
pub struct AppState {
    pub blocking: Arc<IpBlockingService>,
    pub ddos: Arc<DdosProtectionService>,
    pub shield: Arc<SecurityMiddleware>,
    pub admin: AdminConfig,
}

impl AppState {
    /// Wire the services on top of the given stores
    pub fn new(
        settings: &Settings,
        blocklist: Arc<dyn BlocklistStore>,
        traffic: Arc<dyn TrafficStore>,
    ) -> SecurityResult<Self> {
        let blocking = Arc::new(IpBlockingService::new(blocklist, &settings.blocklist));
        let ddos = Arc::new(DdosProtectionService::new(traffic, blocking.clone(), settings.ddos.clone()));
        let headers = Arc::new(SecurityHeadersService::from_config(&settings.headers)?);
        let shield = Arc::new(SecurityMiddleware::new(
            ClientIdentifier::from_config(&settings.client_ip)?,
            blocking.clone(),
            ddos.clone(),
            headers,
        ));

        Ok(Self {
            blocking,
            ddos,
            shield,
            admin: settings.admin.clone(),
        })
    }
}

/// Build the stores selected by `storage.backend` and the services on top
pub async fn build_state(settings: &Settings) -> SecurityResult<AppState> {
    let (blocklist, traffic): (Arc<dyn BlocklistStore>, Arc<dyn TrafficStore>) = match settings.storage.backend {
        StorageBackend::Memory => (
            Arc::new(MemoryBlocklistStore::new(settings.blocklist.tombstone())),
            Arc::new(MemoryTrafficStore::new()),
        ),
        StorageBackend::Redis => {
            let url = settings
                .storage
                .redis_url
                .as_deref()
                .ok_or_else(|| SecurityError::Internal("storage.redis_url is not set".to_string()))?;
            let prefix = &settings.storage.key_prefix;
            (
                Arc::new(RedisBlocklistStore::new(url, prefix, settings.blocklist.tombstone()).await?),
                Arc::new(RedisTrafficStore::new(url, prefix).await?),
            )
        }
    };

    tracing::info!(backend = ?settings.storage.backend, "Security state store ready");
    AppState::new(settings, blocklist, traffic)
}

/// Put `downstream` (and the admin API, when enabled) behind the security
/// pipeline. `/health` stays outside it.
pub fn build_router(state: AppState, server: &ServerConfig, downstream: Router) -> Router {
    let mut protected = downstream;
    if state.admin.enabled {
        protected = protected.merge(setup_admin_router(state.clone()));
    }

    protected
        .layer(middleware::from_fn_with_state(state.shield.clone(), security_layer))
        .route("/health", get(health))
        .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
}

/// Routes served behind the pipeline by the bundled binary
pub fn downstream_routes() -> Router {
    Router::new().route("/", get(whoami))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn whoami(Extension(context): Extension<SecurityContext>) -> Json<SecurityContext> {
    Json(context)
}

/// Periodically drop expired blocks and idle traffic state
pub fn spawn_sweeper(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        loop {
            ticker.tick().await;

            if let Err(e) = state.blocking.sweep_expired().await {
                tracing::warn!(error = %e, "Blocklist sweep failed");
            }
            match state.ddos.evict_idle().await {
                Ok(0) => {}
                Ok(evicted) => tracing::debug!(evicted, "Evicted idle traffic windows"),
                Err(e) => tracing::warn!(error = %e, "Idle eviction failed"),
            }
        }
    })
}
