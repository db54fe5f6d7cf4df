//! Run with a local Redis: `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`

#[path = "../test_utils.rs"]
mod test_utils;

use std::time::Duration;

use chrono::Utc;
use request_shield::core::{BlockEntry, Detector, Horizon};
use request_shield::store::{BlocklistStore, RedisBlocklistStore, RedisTrafficStore, TrafficStore};
use request_shield::utils::SecurityResult;
use test_utils::{random_ip, setup_test_env, wait};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn prefix() -> String {
    format!("shield-test-{}", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore]
async fn test_redis_blocklist_conflict_rule() -> SecurityResult<()> {
    setup_test_env().await?;
    let store = RedisBlocklistStore::new(&redis_url(), &prefix(), Duration::from_secs(5)).await?;
    let ip = random_ip();

    let entry = BlockEntry::manual(&ip, "abuse", None);
    assert!(store.put(entry.clone()).await?);
    assert_eq!(store.get(&ip).await?, Some(entry.clone()));

    // Older delete loses to the entry
    assert!(!store.remove(&ip, entry.stamp() - 1).await?);
    assert!(store.get(&ip).await?.is_some());

    // Newer delete wins, and the tombstone rejects the older write
    assert!(store.remove(&ip, Utc::now().timestamp_micros()).await?);
    assert!(!store.put(entry).await?);
    assert_eq!(store.get(&ip).await?, None);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_redis_auto_write_respects_manual_and_extends_auto() -> SecurityResult<()> {
    let store = RedisBlocklistStore::new(&redis_url(), &prefix(), Duration::from_secs(5)).await?;

    let banned = random_ip();
    let auto = BlockEntry::auto(&banned, "flood", Duration::from_secs(60), Detector::TrafficAnomaly);
    let manual = BlockEntry::manual(&banned, "ban", None);
    store.put(manual.clone()).await?;
    assert_eq!(store.put_auto(auto).await?, manual);
    assert_eq!(store.get(&banned).await?, Some(manual));

    let flooder = random_ip();
    let mut long = BlockEntry::auto(&flooder, "flood", Duration::from_secs(600), Detector::TrafficAnomaly);
    long.offenses = 3;
    store.put_auto(long.clone()).await?;
    let merged = store
        .put_auto(BlockEntry::auto(&flooder, "flood", Duration::from_secs(1), Detector::TrafficAnomaly))
        .await?;
    assert_eq!(merged.expires_at, long.expires_at);
    assert_eq!(merged.offenses, 3);
    assert_eq!(store.get(&flooder).await?, Some(merged));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_redis_entries_expire() -> SecurityResult<()> {
    let store = RedisBlocklistStore::new(&redis_url(), &prefix(), Duration::from_secs(5)).await?;
    let ip = random_ip();

    store
        .put(BlockEntry::auto(&ip, "probe", Duration::from_millis(100), Detector::ProbePath))
        .await?;
    assert_eq!(store.list().await?.len(), 1);

    wait(Duration::from_millis(250)).await;
    assert_eq!(store.get(&ip).await?, None);
    assert!(store.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_redis_traffic_counts() -> SecurityResult<()> {
    let store = RedisTrafficStore::new(&redis_url(), &prefix()).await?;
    let horizons = [
        Horizon::new(Duration::from_secs(10), 10),
        Horizon::new(Duration::from_secs(60), 10),
    ];
    let ip = random_ip();

    for expected in 1..=5u64 {
        assert_eq!(store.record(&ip, &horizons).await?, vec![expected, expected]);
    }
    assert_eq!(store.totals(&ip, &horizons).await?, vec![5, 5]);
    Ok(())
}
