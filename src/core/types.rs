//! Data model shared by the blocklist, the traffic monitor and the stores.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who created a block entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockSource {
    /// Administrative action
    Manual,
    /// Installed programmatically by a detector
    Auto,
}

/// Which detector installed an auto block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    BadUserAgent,
    ProbePath,
    TrafficAnomaly,
}

/// One blocklist entry. At most one exists per client key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEntry {
    pub client_key: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// `None` means the block is permanent
    pub expires_at: Option<DateTime<Utc>>,
    pub source: BlockSource,
    #[serde(default)]
    pub detector: Option<Detector>,
    /// Escalation level of a traffic-anomaly block
    #[serde(default)]
    pub offenses: u32,
}

impl BlockEntry {
    pub fn manual(client_key: &str, reason: &str, ttl: Option<Duration>) -> Self {
        let created_at = Utc::now();
        Self {
            client_key: client_key.to_string(),
            reason: reason.to_string(),
            created_at,
            expires_at: ttl.map(|ttl| expiry_after(created_at, ttl)),
            source: BlockSource::Manual,
            detector: None,
            offenses: 0,
        }
    }

    pub fn auto(client_key: &str, reason: &str, ttl: Duration, detector: Detector) -> Self {
        let created_at = Utc::now();
        Self {
            client_key: client_key.to_string(),
            reason: reason.to_string(),
            created_at,
            expires_at: Some(expiry_after(created_at, ttl)),
            source: BlockSource::Auto,
            detector: Some(detector),
            offenses: 0,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    pub fn is_manual(&self) -> bool {
        self.source == BlockSource::Manual
    }

    /// Version stamp used to order concurrent writes and deletes for a key
    pub fn stamp(&self) -> i64 {
        self.created_at.timestamp_micros()
    }
}

/// Output of a blocklist query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockCheckResult {
    pub should_block: bool,
    pub reason: Option<String>,
    /// Detector of the auto entry behind the block, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector: Option<Detector>,
}

impl BlockCheckResult {
    pub fn allow() -> Self {
        Self {
            should_block: false,
            reason: None,
            detector: None,
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            should_block: true,
            reason: Some(reason.into()),
            detector: None,
        }
    }

    /// Block on behalf of a stored entry
    pub fn from_entry(entry: BlockEntry) -> Self {
        Self {
            should_block: true,
            reason: Some(entry.reason),
            detector: entry.detector,
        }
    }
}

/// Output of one traffic-monitoring call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackDecision {
    pub is_attack: bool,
    /// Highest ratio of observed count to threshold across horizons
    pub score: f64,
    pub reason: Option<String>,
}

impl AttackDecision {
    pub fn benign(score: f64) -> Self {
        Self {
            is_attack: false,
            score,
            reason: None,
        }
    }

    pub fn attack(score: f64, reason: String) -> Self {
        Self {
            is_attack: true,
            score,
            reason: Some(reason),
        }
    }
}

/// One counting horizon of a traffic window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub span: Duration,
    pub buckets: u32,
}

impl Horizon {
    pub fn new(span: Duration, buckets: u32) -> Self {
        Self {
            span,
            buckets: buckets.max(1),
        }
    }

    /// Width of one time bucket in milliseconds, never zero
    pub fn bucket_width_ms(&self) -> u64 {
        (self.span.as_millis() as u64 / u64::from(self.buckets)).max(1)
    }
}

/// Current-use statistics for one client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficStats {
    pub client_key: String,
    pub burst_count: u64,
    pub sustained_count: u64,
    pub offenses: u32,
    pub ddos_blocked: bool,
}

/// `start + ttl`, saturating at the largest representable instant
pub(crate) fn expiry_after(start: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| start.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
