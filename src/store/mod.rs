//! Storage interfaces for the shared security state.
//!
//! The blocklist and the per-client traffic counters live behind these traits
//! so a process-local map can be swapped for a store shared by every instance.
//!
//! Blocklist conflict rule: every mutation carries a microsecond stamp (the
//! entry's `created_at` for writes, the removal time for deletes). A store
//! applies a mutation only when its stamp is not older than the stamp already
//! recorded for the key. Deletes leave a tombstone behind, so a write stamped
//! before a concurrent delete stays deleted while a write stamped after it wins.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::types::{BlockEntry, Horizon};
use crate::utils::SecurityResult;

pub use self::memory::{MemoryBlocklistStore, MemoryTrafficStore};
pub use self::redis_store::{RedisBlocklistStore, RedisTrafficStore};

/// Persistent home of the blocklist
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlocklistStore: Send + Sync {
    /// Current entry for the key, expired or not
    async fn get(&self, client_key: &str) -> SecurityResult<Option<BlockEntry>>;

    /// Write an entry. Returns `false` when a newer mutation for the key won.
    async fn put(&self, entry: BlockEntry) -> SecurityResult<bool>;

    /// Install an auto entry in one atomic step. An unexpired manual entry is
    /// kept untouched; an unexpired auto entry is merged so its expiry and
    /// offense count never go down. Returns the entry in force afterwards, or
    /// the given entry unchanged when a newer removal won.
    async fn put_auto(&self, entry: BlockEntry) -> SecurityResult<BlockEntry>;

    /// Delete whatever entry is stamped at or before `stamp`. Returns `true`
    /// when an entry was actually removed.
    async fn remove(&self, client_key: &str, stamp: i64) -> SecurityResult<bool>;

    /// Every stored entry, expired ones included
    async fn list(&self) -> SecurityResult<Vec<BlockEntry>>;

    /// Drop expired entries and stale tombstones; returns the number of
    /// expired entries dropped
    async fn sweep(&self, now: DateTime<Utc>) -> SecurityResult<usize>;
}

/// Home of the per-client rolling request counters
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrafficStore: Send + Sync {
    /// Count one request and return the totals per horizon, in the order given
    async fn record(&self, client_key: &str, horizons: &[Horizon]) -> SecurityResult<Vec<u64>>;

    /// Totals per horizon without counting a request
    async fn totals(&self, client_key: &str, horizons: &[Horizon]) -> SecurityResult<Vec<u64>>;

    /// Forget clients idle for longer than `idle`; returns how many were dropped
    async fn evict_idle(&self, idle: Duration) -> SecurityResult<usize>;
}
