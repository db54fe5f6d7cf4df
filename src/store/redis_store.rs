use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client, Script};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::types::{BlockEntry, Horizon};
use crate::store::{BlocklistStore, TrafficStore};
use crate::utils::{SecurityError, SecurityResult};

/// Applies a write unless a newer mutation is recorded for the key.
/// KEYS[1] = entry hash, ARGV = stamp, entry json, ttl in ms (0 = permanent),
/// source, expiry in epoch ms (0 = permanent)
const PUT_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'stamp')
if current and tonumber(current) > tonumber(ARGV[1]) then
    return 0
end
redis.call('HSET', KEYS[1], 'stamp', ARGV[1], 'entry', ARGV[2], 'source', ARGV[4], 'expires_ms', ARGV[5])
local ttl = tonumber(ARGV[3])
if ttl > 0 then
    redis.call('PEXPIRE', KEYS[1], ttl)
else
    redis.call('PERSIST', KEYS[1])
end
return 1
"#;

/// Installs an auto entry. A live manual entry is kept; a live auto entry is
/// merged (later expiry, higher offense count, newer stamp). Without a live
/// entry the plain stamp rule applies.
/// KEYS[1] = entry hash, ARGV = stamp, entry json, expiry in epoch ms, now in
/// epoch ms. Returns {status, json of the entry in force}: 1 written, 0 manual
/// entry kept, -1 a newer mutation won.
const PUT_AUTO_SCRIPT: &str = r#"
local current = redis.call('HMGET', KEYS[1], 'stamp', 'entry', 'source', 'expires_ms')
local stamp, entry, source = tonumber(current[1]), current[2], current[3]
local expires = tonumber(current[4]) or 0
local now = tonumber(ARGV[4])
local live = entry and (expires == 0 or expires > now)

local candidate = cjson.decode(ARGV[2])
local new_stamp = tonumber(ARGV[1])
local new_expires = tonumber(ARGV[3])

if live then
    if source == 'manual' then
        return {0, entry}
    end
    local existing = cjson.decode(entry)
    if expires == 0 or expires > new_expires then
        new_expires = expires
        candidate['expiresAt'] = existing['expiresAt']
    end
    if (existing['offenses'] or 0) > (candidate['offenses'] or 0) then
        candidate['offenses'] = existing['offenses']
    end
    if stamp and stamp > new_stamp then
        new_stamp = stamp
        candidate['createdAt'] = existing['createdAt']
    end
elseif stamp and stamp > new_stamp then
    return {-1, ARGV[2]}
end

local json = cjson.encode(candidate)
redis.call('HSET', KEYS[1], 'stamp', string.format('%d', new_stamp), 'entry', json, 'source', 'auto', 'expires_ms', string.format('%d', new_expires))
if new_expires > 0 then
    redis.call('PEXPIRE', KEYS[1], math.max(new_expires - now, 1))
else
    redis.call('PERSIST', KEYS[1])
end
return {1, json}
"#;

/// Replaces the entry with a tombstone unless a newer mutation is recorded.
/// KEYS[1] = entry hash, ARGV = stamp, tombstone ttl in ms.
/// Returns 1 when an entry was removed, 0 when there was none, -1 when a
/// newer write won.
const REMOVE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'stamp')
if current and tonumber(current) > tonumber(ARGV[1]) then
    return -1
end
local had = redis.call('HEXISTS', KEYS[1], 'entry')
redis.call('HDEL', KEYS[1], 'entry', 'source', 'expires_ms')
redis.call('HSET', KEYS[1], 'stamp', ARGV[1])
redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[2]))
return had
"#;

async fn connect(redis_url: &str) -> SecurityResult<ConnectionManager> {
    let client = Client::open(redis_url)?;
    Ok(ConnectionManager::new(client).await?)
}

/// Blocklist shared by every instance through Redis.
///
/// Each client key maps to a hash `{prefix}:block:{key}` holding the stamp of
/// the last mutation and, while active, the JSON entry. Expiry is delegated
/// to Redis key TTLs.
#[derive(Clone)]
pub struct RedisBlocklistStore {
    conn: ConnectionManager,
    prefix: String,
    tombstone: Duration,
    put_script: Script,
    put_auto_script: Script,
    remove_script: Script,
}

impl RedisBlocklistStore {
    /// Create a new Redis-backed blocklist
    pub async fn new(redis_url: &str, prefix: &str, tombstone: Duration) -> SecurityResult<Self> {
        Ok(Self {
            conn: connect(redis_url).await?,
            prefix: prefix.to_string(),
            tombstone,
            put_script: Script::new(PUT_SCRIPT),
            put_auto_script: Script::new(PUT_AUTO_SCRIPT),
            remove_script: Script::new(REMOVE_SCRIPT),
        })
    }

    fn key(&self, client_key: &str) -> String {
        format!("{}:block:{}", self.prefix, client_key)
    }
}

fn source_label(entry: &BlockEntry) -> &'static str {
    if entry.is_manual() {
        "manual"
    } else {
        "auto"
    }
}

fn expiry_ms(entry: &BlockEntry) -> i64 {
    entry.expires_at.map_or(0, |expires_at| expires_at.timestamp_millis().max(1))
}

#[async_trait]
impl BlocklistStore for RedisBlocklistStore {
    async fn get(&self, client_key: &str) -> SecurityResult<Option<BlockEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(self.key(client_key), "entry").await?;
        raw.map(|json| serde_json::from_str(&json).map_err(SecurityError::from))
            .transpose()
    }

    async fn put(&self, entry: BlockEntry) -> SecurityResult<bool> {
        let ttl_ms = match entry.expires_at {
            // An already-expired entry still gets a 1 ms lifetime so the
            // stamp is recorded.
            Some(expires_at) => (expires_at - Utc::now()).num_milliseconds().max(1),
            None => 0,
        };
        let json = serde_json::to_string(&entry)?;

        let mut conn = self.conn.clone();
        let applied: i64 = self
            .put_script
            .key(self.key(&entry.client_key))
            .arg(entry.stamp())
            .arg(json)
            .arg(ttl_ms)
            .arg(source_label(&entry))
            .arg(expiry_ms(&entry))
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn put_auto(&self, entry: BlockEntry) -> SecurityResult<BlockEntry> {
        let json = serde_json::to_string(&entry)?;

        let mut conn = self.conn.clone();
        let (status, in_force): (i64, String) = self
            .put_auto_script
            .key(self.key(&entry.client_key))
            .arg(entry.stamp())
            .arg(json)
            .arg(expiry_ms(&entry))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        if status < 0 {
            tracing::debug!(client = %entry.client_key, "Auto block superseded by a newer removal");
        }
        Ok(serde_json::from_str(&in_force)?)
    }

    async fn remove(&self, client_key: &str, stamp: i64) -> SecurityResult<bool> {
        let mut conn = self.conn.clone();
        let outcome: i64 = self
            .remove_script
            .key(self.key(client_key))
            .arg(stamp)
            .arg(self.tombstone.as_millis().max(1) as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(outcome == 1)
    }

    async fn list(&self) -> SecurityResult<Vec<BlockEntry>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:block:*", self.prefix);

        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.hget(&key, "entry").await?;
            if let Some(json) = raw {
                entries.push(serde_json::from_str(&json)?);
            }
        }
        Ok(entries)
    }

    async fn sweep(&self, _now: DateTime<Utc>) -> SecurityResult<usize> {
        // Redis expires entries and tombstones on its own
        Ok(0)
    }
}

/// Traffic counters shared by every instance through Redis.
///
/// One counter key per client, horizon and time bucket:
/// `{prefix}:traffic:{key}:{span_ms}:{bucket}`, incremented with `INCR` and
/// expired once the bucket leaves its horizon.
#[derive(Clone)]
pub struct RedisTrafficStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisTrafficStore {
    /// Create a new Redis-backed traffic store
    pub async fn new(redis_url: &str, prefix: &str) -> SecurityResult<Self> {
        Ok(Self {
            conn: connect(redis_url).await?,
            prefix: prefix.to_string(),
        })
    }

    fn bucket_keys(&self, client_key: &str, horizon: &Horizon, now_ms: u64) -> (String, Vec<String>) {
        let width = horizon.bucket_width_ms();
        let current = now_ms / width;
        let span_ms = horizon.span.as_millis();
        let keys: Vec<String> = (0..u64::from(horizon.buckets))
            .filter_map(|back| current.checked_sub(back))
            .map(|bucket| format!("{}:traffic:{}:{}:{}", self.prefix, client_key, span_ms, bucket))
            .collect();
        (keys[0].clone(), keys)
    }

    async fn fetch(&self, client_key: &str, horizons: &[Horizon], increment: bool) -> SecurityResult<Vec<u64>> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SecurityError::Internal(e.to_string()))?
            .as_millis() as u64;

        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for horizon in horizons {
            let (current, keys) = self.bucket_keys(client_key, horizon, now_ms);
            if increment {
                let ttl_ms = horizon.span.as_millis() as usize + horizon.bucket_width_ms() as usize;
                pipe.incr(&current, 1u64).ignore();
                pipe.pexpire(&current, ttl_ms).ignore();
            }
            pipe.cmd("MGET").arg(keys);
        }

        let mut conn = self.conn.clone();
        let buckets: Vec<Vec<Option<u64>>> = pipe.query_async(&mut conn).await?;
        Ok(buckets
            .into_iter()
            .map(|counts| counts.into_iter().flatten().sum())
            .collect())
    }
}

#[async_trait]
impl TrafficStore for RedisTrafficStore {
    async fn record(&self, client_key: &str, horizons: &[Horizon]) -> SecurityResult<Vec<u64>> {
        self.fetch(client_key, horizons, true).await
    }

    async fn totals(&self, client_key: &str, horizons: &[Horizon]) -> SecurityResult<Vec<u64>> {
        self.fetch(client_key, horizons, false).await
    }

    async fn evict_idle(&self, _idle: Duration) -> SecurityResult<usize> {
        // Bucket keys carry their own TTL
        Ok(0)
    }
}
