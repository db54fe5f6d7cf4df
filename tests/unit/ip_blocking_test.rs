#[path = "../test_utils.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use request_shield::config::BlocklistConfig;
use request_shield::core::{BlockEntry, BlockSource, Detector, IpBlockingService};
use request_shield::store::{BlocklistStore, MemoryBlocklistStore};
use request_shield::utils::SecurityResult;
use test_utils::{random_ip, setup_test_env, wait, FailingBlocklistStore};
use tokio::sync::Notify;
use tokio_test::assert_ok;

fn service() -> IpBlockingService {
    IpBlockingService::new(Arc::new(MemoryBlocklistStore::default()), &BlocklistConfig::default())
}

/// Memory blocklist that parks every auto-block write until released
#[derive(Default)]
struct HeldAutoWrites {
    inner: MemoryBlocklistStore,
    reached: Notify,
    release: Notify,
}

#[async_trait]
impl BlocklistStore for HeldAutoWrites {
    async fn get(&self, client_key: &str) -> SecurityResult<Option<BlockEntry>> {
        self.inner.get(client_key).await
    }

    async fn put(&self, entry: BlockEntry) -> SecurityResult<bool> {
        self.inner.put(entry).await
    }

    async fn put_auto(&self, entry: BlockEntry) -> SecurityResult<BlockEntry> {
        self.reached.notify_one();
        self.release.notified().await;
        self.inner.put_auto(entry).await
    }

    async fn remove(&self, client_key: &str, stamp: i64) -> SecurityResult<bool> {
        self.inner.remove(client_key, stamp).await
    }

    async fn list(&self) -> SecurityResult<Vec<BlockEntry>> {
        self.inner.list().await
    }

    async fn sweep(&self, now: DateTime<Utc>) -> SecurityResult<usize> {
        self.inner.sweep(now).await
    }
}

#[test_log::test(tokio::test)]
async fn test_manual_block_until_removed() -> SecurityResult<()> {
    setup_test_env().await?;
    let service = service();
    let ip = random_ip();

    service.add_block(&ip, "Credential stuffing", None).await?;
    for _ in 0..5 {
        let result = service.should_block_request(&ip, "Mozilla/5.0", "/login").await?;
        assert!(result.should_block);
        assert_eq!(result.reason.as_deref(), Some("Credential stuffing"));
    }

    assert!(service.remove_block(&ip).await?);
    assert!(!service.should_block_request(&ip, "Mozilla/5.0", "/login").await?.should_block);
    assert!(!service.remove_block(&ip).await?);
    Ok(())
}

#[tokio::test]
async fn test_block_with_ttl_expires() -> SecurityResult<()> {
    let service = service();
    let ip = random_ip();

    service.add_block(&ip, "Temporary", Some(Duration::from_millis(50))).await?;
    assert!(service.should_block_request(&ip, "", "/").await?.should_block);

    wait(Duration::from_millis(80)).await;
    assert!(!service.should_block_request(&ip, "", "/").await?.should_block);
    assert_eq!(service.get_block(&ip).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_latest_add_wins() -> SecurityResult<()> {
    let service = service();
    let ip = random_ip();

    service.add_block(&ip, "first", None).await?;
    wait(Duration::from_millis(2)).await;
    service.add_block(&ip, "second", Some(Duration::from_secs(60))).await?;

    let entry = service.get_block(&ip).await?.unwrap();
    assert_eq!(entry.reason, "second");
    assert!(entry.expires_at.is_some());
    assert_eq!(service.list_blocks().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_add_and_remove_converge() {
    let service = Arc::new(service());
    let ip = random_ip();

    let tasks = (0..50).map(|i| {
        let service = service.clone();
        let ip = ip.clone();
        tokio::spawn(async move {
            if i % 2 == 0 {
                service.add_block(&ip, &format!("writer {}", i), None).await.map(|_| ())
            } else {
                service.remove_block(&ip).await.map(|_| ())
            }
        })
    });
    for outcome in join_all(tasks).await {
        assert_ok!(outcome.unwrap());
    }

    // Whatever survived, a final remove always wins and nothing comes back
    assert_ok!(service.remove_block(&ip).await);
    assert_eq!(assert_ok!(service.get_block(&ip).await), None);

    service.add_block(&ip, "after", None).await.unwrap();
    assert_eq!(service.get_block(&ip).await.unwrap().unwrap().reason, "after");
}

#[tokio::test]
async fn test_manual_block_landing_during_auto_block_survives() -> SecurityResult<()> {
    let store = Arc::new(HeldAutoWrites::default());
    let service = Arc::new(IpBlockingService::new(store.clone(), &BlocklistConfig::default()));
    let ip = random_ip();

    let auto = tokio::spawn({
        let service = service.clone();
        let ip = ip.clone();
        async move {
            service
                .add_auto_block(&ip, "Potential DDoS attack detected", Duration::from_millis(50), Detector::TrafficAnomaly, 1)
                .await
        }
    });

    // The auto entry is built and on its way to the store
    store.reached.notified().await;
    service.add_block(&ip, "Permanent manual ban", None).await?;
    store.release.notify_one();

    let in_force = auto.await.unwrap()?;
    assert!(in_force.is_manual());

    wait(Duration::from_millis(80)).await;
    let result = service.should_block_request(&ip, "Mozilla/5.0", "/").await?;
    assert!(result.should_block);
    assert_eq!(result.reason.as_deref(), Some("Permanent manual ban"));
    assert_eq!(service.get_block(&ip).await?.unwrap().expires_at, None);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_auto_blocks_keep_longest_expiry() -> SecurityResult<()> {
    let service = Arc::new(service());
    let ip = random_ip();

    let tasks = (1..=20u32).map(|offenses| {
        let service = service.clone();
        let ip = ip.clone();
        tokio::spawn(async move {
            let ttl = Duration::from_secs(u64::from(offenses) * 60);
            service
                .add_auto_block(&ip, "Potential DDoS attack detected", ttl, Detector::TrafficAnomaly, offenses)
                .await
        })
    });
    for outcome in join_all(tasks).await {
        assert_ok!(outcome.unwrap());
    }

    let entry = service.get_block(&ip).await?.unwrap();
    assert_eq!(entry.offenses, 20);
    let remaining = entry.expires_at.unwrap() - Utc::now();
    assert!(remaining > chrono::Duration::seconds(19 * 60));
    Ok(())
}

#[tokio::test]
async fn test_heuristic_auto_blocks() -> SecurityResult<()> {
    let service = service();

    let scanner = random_ip();
    let result = service.should_block_request(&scanner, "Nikto/2.5.0", "/").await?;
    assert!(result.should_block);
    let entry = service.get_block(&scanner).await?.unwrap();
    assert_eq!(entry.source, BlockSource::Auto);
    assert_eq!(entry.detector, Some(Detector::BadUserAgent));

    let prober = random_ip();
    assert!(service.should_block_request(&prober, "Mozilla/5.0", "/.env").await?.should_block);

    let visitor = random_ip();
    assert!(!service.should_block_request(&visitor, "Mozilla/5.0", "/products").await?.should_block);
    Ok(())
}

#[tokio::test]
async fn test_store_errors_reach_the_caller() {
    let service = IpBlockingService::new(Arc::new(FailingBlocklistStore), &BlocklistConfig::default());
    assert!(service.should_block_request("192.0.2.1", "", "/").await.is_err());
    assert!(service.add_block("192.0.2.1", "x", None).await.is_err());
    assert!(service.remove_block("192.0.2.1").await.is_err());
}
