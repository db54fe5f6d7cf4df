use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::core::traffic_window::TrafficWindow;
use crate::core::types::{expiry_after, BlockEntry, Horizon};
use crate::store::{BlocklistStore, TrafficStore};
use crate::utils::{metrics, SecurityResult};

#[derive(Debug, Clone)]
enum Slot {
    Active(BlockEntry),
    Removed { stamp: i64, until: DateTime<Utc> },
}

impl Slot {
    fn stamp(&self) -> i64 {
        match self {
            Slot::Active(entry) => entry.stamp(),
            Slot::Removed { stamp, .. } => *stamp,
        }
    }
}

/// `None` is permanent and outlives any instant
fn later_expiry(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    }
}

/// Process-local blocklist.
///
/// `DashMap` shards the keyspace, so mutations for one client never wait on
/// unrelated clients.
pub struct MemoryBlocklistStore {
    slots: DashMap<String, Slot>,
    tombstone: Duration,
}

impl MemoryBlocklistStore {
    pub fn new(tombstone: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            tombstone,
        }
    }
}

impl Default for MemoryBlocklistStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl BlocklistStore for MemoryBlocklistStore {
    async fn get(&self, client_key: &str) -> SecurityResult<Option<BlockEntry>> {
        Ok(self.slots.get(client_key).and_then(|slot| match slot.value() {
            Slot::Active(entry) => Some(entry.clone()),
            Slot::Removed { .. } => None,
        }))
    }

    async fn put(&self, entry: BlockEntry) -> SecurityResult<bool> {
        match self.slots.entry(entry.client_key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().stamp() > entry.stamp() {
                    return Ok(false);
                }
                occupied.insert(Slot::Active(entry));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Active(entry));
            }
        }
        Ok(true)
    }

    async fn put_auto(&self, mut entry: BlockEntry) -> SecurityResult<BlockEntry> {
        let now = entry.created_at;
        match self.slots.entry(entry.client_key.clone()) {
            Entry::Occupied(mut occupied) => {
                match occupied.get() {
                    Slot::Active(current) if !current.is_expired_at(now) => {
                        if current.is_manual() {
                            return Ok(current.clone());
                        }
                        entry.expires_at = later_expiry(current.expires_at, entry.expires_at);
                        entry.offenses = entry.offenses.max(current.offenses);
                        entry.created_at = entry.created_at.max(current.created_at);
                    }
                    slot if slot.stamp() > entry.stamp() => return Ok(entry),
                    _ => {}
                }
                occupied.insert(Slot::Active(entry.clone()));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Active(entry.clone()));
            }
        }
        Ok(entry)
    }

    async fn remove(&self, client_key: &str, stamp: i64) -> SecurityResult<bool> {
        let tombstone = Slot::Removed {
            stamp,
            until: expiry_after(Utc::now(), self.tombstone),
        };

        match self.slots.entry(client_key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().stamp() > stamp {
                    return Ok(false);
                }
                let removed = matches!(occupied.get(), Slot::Active(_));
                occupied.insert(tombstone);
                Ok(removed)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(tombstone);
                Ok(false)
            }
        }
    }

    async fn list(&self) -> SecurityResult<Vec<BlockEntry>> {
        Ok(self
            .slots
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Active(entry) => Some(entry.clone()),
                Slot::Removed { .. } => None,
            })
            .collect())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> SecurityResult<usize> {
        let mut expired = 0;
        self.slots.retain(|_, slot| match slot {
            Slot::Active(entry) if entry.is_expired_at(now) => {
                expired += 1;
                false
            }
            Slot::Active(_) => true,
            Slot::Removed { until, .. } => *until > now,
        });
        Ok(expired)
    }
}

/// Process-local traffic counters, one `TrafficWindow` per client
#[derive(Default)]
pub struct MemoryTrafficStore {
    windows: DashMap<String, TrafficWindow>,
}

impl MemoryTrafficStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clients currently holding a window
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl TrafficStore for MemoryTrafficStore {
    async fn record(&self, client_key: &str, horizons: &[Horizon]) -> SecurityResult<Vec<u64>> {
        // The shard lock is held for the whole increment, so an eviction
        // racing with this call either runs before (and we start a fresh
        // window) or after (and sees the updated last_seen). The clock is
        // read under the lock so writers for one key see monotonic instants.
        let mut window = self
            .windows
            .entry(client_key.to_string())
            .or_insert_with(|| TrafficWindow::new(horizons, Instant::now()));
        Ok(window.record(Instant::now()))
    }

    async fn totals(&self, client_key: &str, horizons: &[Horizon]) -> SecurityResult<Vec<u64>> {
        let now = Instant::now();
        Ok(self
            .windows
            .get(client_key)
            .map(|window| window.totals(now))
            .unwrap_or_else(|| vec![0; horizons.len()]))
    }

    async fn evict_idle(&self, idle: Duration) -> SecurityResult<usize> {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.saturating_duration_since(window.last_seen()) < idle);
        let remaining = self.windows.len();
        metrics::record_tracked_clients(remaining);
        Ok(before.saturating_sub(remaining))
    }
}
