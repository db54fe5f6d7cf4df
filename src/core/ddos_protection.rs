use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::DdosConfig;
use crate::core::ip_blocking::IpBlockingService;
use crate::core::types::{AttackDecision, Detector, Horizon, TrafficStats};
use crate::store::TrafficStore;
use crate::utils::{log_auto_block, log_ddos_detection, metrics, SecurityResult};

/// Reason stored on blocklist entries installed by the traffic monitor
pub const DDOS_BLOCK_REASON: &str = crate::error::DDOS_DETECTED_REASON;

/// Escalation state of one client that has offended at least once
#[derive(Debug, Clone, Copy)]
struct OffenseRecord {
    offenses: u32,
    last_offense: Instant,
    /// Local mirror of the auto-block, kept even when the blocklist store
    /// cannot be reached
    blocked_until: Option<Instant>,
}

impl OffenseRecord {
    fn is_blocked_at(&self, now: Instant) -> bool {
        matches!(self.blocked_until, Some(until) if until > now)
    }
}

/// Traffic-anomaly detection and auto-blocking.
///
/// Request counts live in the injected [`TrafficStore`]; escalation state for
/// offenders lives here, sharded per client.
pub struct DdosProtectionService {
    traffic: Arc<dyn TrafficStore>,
    blocking: Arc<IpBlockingService>,
    config: DdosConfig,
    horizons: [Horizon; 2],
    offenders: DashMap<String, OffenseRecord>,
}

impl DdosProtectionService {
    pub fn new(traffic: Arc<dyn TrafficStore>, blocking: Arc<IpBlockingService>, config: DdosConfig) -> Self {
        let horizons = [
            Horizon::new(config.burst_window(), config.buckets_per_window),
            Horizon::new(config.sustained_window(), config.buckets_per_window),
        ];
        Self {
            traffic,
            blocking,
            config,
            horizons,
            offenders: DashMap::new(),
        }
    }

    /// Count one request from `client_key` and decide whether it is part of
    /// an attack.
    ///
    /// An attack is declared when the burst count exceeds the burst threshold
    /// or the sustained count exceeds the sustained threshold. The first
    /// detection while the client is not already blocked counts as an offense
    /// and installs (or extends) an auto-block whose lifetime grows with every
    /// repeat offense.
    pub async fn monitor_traffic(&self, client_key: &str, path: &str, user_agent: &str) -> SecurityResult<AttackDecision> {
        let counts = self.traffic.record(client_key, &self.horizons).await?;
        let (burst, sustained) = split_counts(&counts);

        let burst_exceeded = burst > self.config.burst_threshold;
        let sustained_exceeded = sustained > self.config.sustained_threshold;
        let score = ratio(burst, self.config.burst_threshold).max(ratio(sustained, self.config.sustained_threshold));

        if !burst_exceeded && !sustained_exceeded {
            return Ok(AttackDecision::benign(score));
        }

        let reason = if burst_exceeded {
            format!(
                "Burst threshold exceeded: {} requests in {} ms",
                burst, self.config.burst_window_ms
            )
        } else {
            format!(
                "Sustained threshold exceeded: {} requests in {} ms",
                sustained, self.config.sustained_window_ms
            )
        };

        log_ddos_detection(client_key, burst, sustained, score);
        tracing::debug!(client = %client_key, path = %path, user_agent = %user_agent, "Attack traffic sample");

        if let Some((offenses, ttl)) = self.register_offense(client_key, Instant::now()) {
            metrics::record_auto_block();
            log_auto_block(client_key, offenses, ttl.as_secs());

            // The local mirror is already set, so a failing blocklist does not
            // lift the block.
            if let Err(e) = self
                .blocking
                .add_auto_block(client_key, DDOS_BLOCK_REASON, ttl, Detector::TrafficAnomaly, offenses)
                .await
            {
                tracing::error!(client = %client_key, error = %e, "Failed to store auto-block");
            }
        }

        Ok(AttackDecision::attack(score, reason))
    }

    /// Whether `client_key` is currently under a traffic-anomaly auto-block.
    ///
    /// Independent of the current window: a block installed by an earlier
    /// call stays in force after traffic subsides, until its TTL runs out.
    pub async fn is_ip_blocked_for_ddos(&self, client_key: &str) -> SecurityResult<bool> {
        let mirrored = self
            .offenders
            .get(client_key)
            .map(|record| record.is_blocked_at(Instant::now()))
            .unwrap_or(false);
        if mirrored {
            return Ok(true);
        }

        // Blocks installed by other instances sharing the store
        Ok(self
            .blocking
            .get_block(client_key)
            .await?
            .map(|entry| entry.detector == Some(Detector::TrafficAnomaly))
            .unwrap_or(false))
    }

    /// Auto-block lifetime for the given offense count:
    /// `block * multiplier^(offenses - 1)`, capped at the configured maximum.
    pub fn block_ttl(&self, offenses: u32) -> Duration {
        let base = self.config.block_ms as f64;
        let max = self.config.max_block_ms as f64;
        let exponent = offenses.saturating_sub(1).min(i32::MAX as u32) as i32;
        let ms = (base * self.config.backoff_multiplier.powi(exponent)).min(max);
        Duration::from_millis(ms as u64)
    }

    /// Forget the local block and offense history for `client_key`
    pub fn release(&self, client_key: &str) -> bool {
        self.offenders.remove(client_key).is_some()
    }

    /// Current counts and escalation state, without counting a request
    pub async fn traffic_stats(&self, client_key: &str) -> SecurityResult<TrafficStats> {
        let counts = self.traffic.totals(client_key, &self.horizons).await?;
        let (burst_count, sustained_count) = split_counts(&counts);
        let offenses = self.offenders.get(client_key).map(|r| r.offenses).unwrap_or(0);

        Ok(TrafficStats {
            client_key: client_key.to_string(),
            burst_count,
            sustained_count,
            offenses,
            ddos_blocked: self.is_ip_blocked_for_ddos(client_key).await?,
        })
    }

    /// Drop idle traffic windows and stale offense records.
    ///
    /// A record survives while its block is active or its last offense is
    /// within the offense memory.
    pub async fn evict_idle(&self) -> SecurityResult<usize> {
        let evicted = self.traffic.evict_idle(self.config.idle_eviction()).await?;

        let now = Instant::now();
        let memory = self.config.offense_memory();
        self.offenders
            .retain(|_, record| record.is_blocked_at(now) || now.saturating_duration_since(record.last_offense) < memory);

        Ok(evicted)
    }

    /// Record an offense unless the client is already blocked. Returns the
    /// new offense count and block lifetime.
    fn register_offense(&self, client_key: &str, now: Instant) -> Option<(u32, Duration)> {
        let memory = self.config.offense_memory();
        let mut record = self.offenders.entry(client_key.to_string()).or_insert(OffenseRecord {
            offenses: 0,
            last_offense: now,
            blocked_until: None,
        });

        if record.is_blocked_at(now) {
            return None;
        }
        if now.saturating_duration_since(record.last_offense) >= memory {
            record.offenses = 0;
        }

        record.offenses = record.offenses.saturating_add(1);
        record.last_offense = now;
        let ttl = self.block_ttl(record.offenses);
        record.blocked_until = now.checked_add(ttl);
        Some((record.offenses, ttl))
    }
}

fn split_counts(counts: &[u64]) -> (u64, u64) {
    (
        counts.first().copied().unwrap_or(0),
        counts.get(1).copied().unwrap_or(0),
    )
}

fn ratio(count: u64, threshold: u64) -> f64 {
    count as f64 / threshold.max(1) as f64
}
