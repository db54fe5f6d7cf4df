use std::collections::VecDeque;
use std::time::Instant;

use crate::core::types::Horizon;

/// Rolling request counters for one client over several horizons.
///
/// Each horizon is split into fixed-width time buckets; a count covers the
/// bucket holding `now` plus the `buckets - 1` before it. Buckets that fall
/// out of the horizon are dropped on the next write, so memory per client is
/// bounded by the total number of buckets.
#[derive(Debug, Clone)]
pub struct TrafficWindow {
    origin: Instant,
    last_seen: Instant,
    counters: Vec<HorizonCounter>,
}

#[derive(Debug, Clone)]
struct HorizonCounter {
    width_ms: u64,
    buckets: u64,
    /// (bucket index, count), oldest first
    slots: VecDeque<(u64, u64)>,
}

impl HorizonCounter {
    fn new(horizon: &Horizon) -> Self {
        Self {
            width_ms: horizon.bucket_width_ms(),
            buckets: u64::from(horizon.buckets),
            slots: VecDeque::with_capacity(horizon.buckets as usize),
        }
    }

    fn prune(&mut self, current: u64) {
        while let Some(&(index, _)) = self.slots.front() {
            if index + self.buckets <= current {
                self.slots.pop_front();
            } else {
                break;
            }
        }
    }

    /// Slots stay sorted and unique even when `current` is older than the
    /// newest bucket, so at most `buckets` of them are ever kept.
    fn increment(&mut self, current: u64) {
        let newest = self.slots.back().map_or(current, |&(index, _)| index.max(current));
        self.prune(newest);
        if current + self.buckets <= newest {
            return;
        }
        match self.slots.iter().rposition(|&(index, _)| index <= current) {
            Some(pos) if self.slots[pos].0 == current => self.slots[pos].1 += 1,
            Some(pos) => self.slots.insert(pos + 1, (current, 1)),
            None => self.slots.push_front((current, 1)),
        }
    }

    fn total(&self, current: u64) -> u64 {
        self.slots
            .iter()
            .filter(|(index, _)| index + self.buckets > current)
            .map(|(_, count)| count)
            .sum()
    }
}

impl TrafficWindow {
    pub fn new(horizons: &[Horizon], now: Instant) -> Self {
        Self {
            origin: now,
            last_seen: now,
            counters: horizons.iter().map(HorizonCounter::new).collect(),
        }
    }

    /// Count one request at `now` and return the totals per horizon
    pub fn record(&mut self, now: Instant) -> Vec<u64> {
        self.last_seen = self.last_seen.max(now);
        let elapsed_ms = self.elapsed_ms(now);
        self.counters
            .iter_mut()
            .map(|counter| {
                let current = elapsed_ms / counter.width_ms;
                counter.increment(current);
                counter.total(current)
            })
            .collect()
    }

    /// Totals per horizon at `now` without counting a request
    pub fn totals(&self, now: Instant) -> Vec<u64> {
        let elapsed_ms = self.elapsed_ms(now);
        self.counters
            .iter()
            .map(|counter| counter.total(elapsed_ms / counter.width_ms))
            .collect()
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    fn elapsed_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_millis() as u64
    }
}
