use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::BlocklistConfig;
use crate::core::types::{BlockCheckResult, BlockEntry, Detector};
use crate::store::BlocklistStore;
use crate::utils::{metrics, SecurityResult};

const BAD_USER_AGENT_REASON: &str = "Malicious user agent detected";
const PROBE_PATH_REASON: &str = "Vulnerability probe detected";

/// Owns the blocklist and answers block queries.
///
/// Store failures are returned to the caller untouched; deciding what a
/// failing blocklist means for a request is the middleware's job.
pub struct IpBlockingService {
    store: Arc<dyn BlocklistStore>,
    bad_user_agents: Vec<String>,
    probe_paths: Vec<String>,
    heuristic_ttl: Duration,
}

impl IpBlockingService {
    pub fn new(store: Arc<dyn BlocklistStore>, config: &BlocklistConfig) -> Self {
        let lowered = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| p.trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self {
            store,
            bad_user_agents: lowered(&config.bad_user_agents),
            probe_paths: lowered(&config.probe_paths),
            heuristic_ttl: config.heuristic_block(),
        }
    }

    /// Decide whether a request from `client_key` must be refused.
    ///
    /// Order: a stored unexpired entry (manual entries always win over auto
    /// ones, see [`Self::add_auto_block`]), then the user-agent and path
    /// heuristics, which install an auto entry on a match, then allow.
    pub async fn should_block_request(
        &self,
        client_key: &str,
        user_agent: &str,
        path: &str,
    ) -> SecurityResult<BlockCheckResult> {
        if let Some(entry) = self.active_entry(client_key, Utc::now()).await? {
            return Ok(BlockCheckResult::from_entry(entry));
        }

        if let Some((detector, reason)) = self.match_heuristics(user_agent, path) {
            tracing::info!(client = %client_key, detector = ?detector, "Heuristic match, installing auto-block");
            let entry = self
                .add_auto_block(client_key, reason, self.heuristic_ttl, detector, 0)
                .await?;
            return Ok(BlockCheckResult::from_entry(entry));
        }

        Ok(BlockCheckResult::allow())
    }

    /// Add or replace a manual block. Concurrent writers for the same key
    /// resolve last-writer-wins by creation time.
    pub async fn add_block(&self, client_key: &str, reason: &str, ttl: Option<Duration>) -> SecurityResult<BlockEntry> {
        let entry = BlockEntry::manual(client_key, reason, ttl);
        if !self.store.put(entry.clone()).await? {
            tracing::debug!(client = %client_key, "Manual block superseded by a newer write");
        }
        self.refresh_size_gauge().await;
        Ok(entry)
    }

    /// Install or extend an auto block.
    ///
    /// An active manual entry is never replaced. An active auto entry is only
    /// ever extended: the new expiry is the later of the existing one and
    /// `now + ttl`. Both rules are applied by the store in the same step as
    /// the write. Returns the entry in force afterwards.
    pub async fn add_auto_block(
        &self,
        client_key: &str,
        reason: &str,
        ttl: Duration,
        detector: Detector,
        offenses: u32,
    ) -> SecurityResult<BlockEntry> {
        let mut entry = BlockEntry::auto(client_key, reason, ttl, detector);
        entry.offenses = offenses;

        let in_force = self.store.put_auto(entry).await?;
        if in_force.is_manual() {
            tracing::debug!(client = %client_key, "Auto block skipped, manual entry in force");
        }
        Ok(in_force)
    }

    /// Remove the block for `client_key`. Returns whether one existed.
    ///
    /// The removal is stamped with the current time: writes created before it
    /// stay removed even if they land later, writes created after it survive.
    pub async fn remove_block(&self, client_key: &str) -> SecurityResult<bool> {
        let removed = self.store.remove(client_key, Utc::now().timestamp_micros()).await?;
        self.refresh_size_gauge().await;
        Ok(removed)
    }

    /// The unexpired entry for `client_key`, if any
    pub async fn get_block(&self, client_key: &str) -> SecurityResult<Option<BlockEntry>> {
        self.active_entry(client_key, Utc::now()).await
    }

    /// Every unexpired entry
    pub async fn list_blocks(&self) -> SecurityResult<Vec<BlockEntry>> {
        let now = Utc::now();
        let mut entries: Vec<BlockEntry> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|entry| !entry.is_expired_at(now))
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    /// Drop expired entries from the store
    pub async fn sweep_expired(&self) -> SecurityResult<usize> {
        let dropped = self.store.sweep(Utc::now()).await?;
        if dropped > 0 {
            tracing::debug!(dropped, "Swept expired blocklist entries");
        }
        self.refresh_size_gauge().await;
        Ok(dropped)
    }

    async fn active_entry(&self, client_key: &str, now: DateTime<Utc>) -> SecurityResult<Option<BlockEntry>> {
        match self.store.get(client_key).await? {
            Some(entry) if entry.is_expired_at(now) => {
                // Conditional on the stamp, so a newer entry written in the
                // meantime is left alone.
                self.store.remove(client_key, entry.stamp()).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn match_heuristics(&self, user_agent: &str, path: &str) -> Option<(Detector, &'static str)> {
        let user_agent = user_agent.to_ascii_lowercase();
        if self.bad_user_agents.iter().any(|p| user_agent.contains(p.as_str())) {
            return Some((Detector::BadUserAgent, BAD_USER_AGENT_REASON));
        }

        let path = path.to_ascii_lowercase();
        if self.probe_paths.iter().any(|p| path.contains(p.as_str())) {
            return Some((Detector::ProbePath, PROBE_PATH_REASON));
        }
        None
    }

    async fn refresh_size_gauge(&self) {
        if let Ok(entries) = self.store.list().await {
            metrics::record_blocklist_size(entries.len());
        }
    }
}
