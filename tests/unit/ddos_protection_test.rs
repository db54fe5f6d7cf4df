#[path = "../test_utils.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use request_shield::config::{BlocklistConfig, DdosConfig};
use request_shield::core::{DdosProtectionService, IpBlockingService};
use request_shield::store::{MemoryBlocklistStore, MemoryTrafficStore};
use request_shield::utils::SecurityResult;
use test_utils::{random_ip, setup_test_env, wait};

fn service(config: DdosConfig) -> (Arc<IpBlockingService>, DdosProtectionService) {
    let blocking = Arc::new(IpBlockingService::new(
        Arc::new(MemoryBlocklistStore::default()),
        &BlocklistConfig::default(),
    ));
    let ddos = DdosProtectionService::new(Arc::new(MemoryTrafficStore::new()), blocking.clone(), config);
    (blocking, ddos)
}

#[test_log::test(tokio::test)]
async fn test_burst_flips_attack_and_installs_block() -> SecurityResult<()> {
    setup_test_env().await?;
    let threshold = 10;
    let (blocking, ddos) = service(DdosConfig {
        burst_threshold: threshold,
        burst_window_ms: 200,
        sustained_window_ms: 200,
        sustained_threshold: 1_000,
        block_ms: 500,
        ..DdosConfig::default()
    });
    let ip = random_ip();

    for call in 1..=threshold + 1 {
        let decision = ddos.monitor_traffic(&ip, "/", "test").await?;
        assert_eq!(decision.is_attack, call > threshold, "call {}", call);
    }
    assert!(blocking.should_block_request(&ip, "test", "/").await?.should_block);

    // Traffic subsides, the block stays
    wait(Duration::from_millis(300)).await;
    assert!(!ddos.monitor_traffic(&ip, "/", "test").await?.is_attack);
    assert!(ddos.is_ip_blocked_for_ddos(&ip).await?);

    // Until the TTL runs out
    wait(Duration::from_millis(300)).await;
    assert!(!ddos.is_ip_blocked_for_ddos(&ip).await?);
    Ok(())
}

#[tokio::test]
async fn test_sustained_threshold() -> SecurityResult<()> {
    let (_, ddos) = service(DdosConfig {
        burst_threshold: 1_000,
        sustained_threshold: 3,
        ..DdosConfig::default()
    });
    let ip = random_ip();

    for _ in 0..3 {
        assert!(!ddos.monitor_traffic(&ip, "/", "test").await?.is_attack);
    }
    let decision = ddos.monitor_traffic(&ip, "/", "test").await?;
    assert!(decision.is_attack);
    assert!(decision.reason.unwrap().starts_with("Sustained threshold exceeded"));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_are_all_counted() -> SecurityResult<()> {
    let ddos = Arc::new(service(DdosConfig::default()).1);
    let ip = random_ip();

    let calls = (0..64).map(|_| {
        let ddos = ddos.clone();
        let ip = ip.clone();
        tokio::spawn(async move { ddos.monitor_traffic(&ip, "/", "test").await })
    });
    for result in join_all(calls).await {
        result.unwrap()?;
    }

    let stats = ddos.traffic_stats(&ip).await?;
    assert_eq!(stats.burst_count, 64);
    assert_eq!(stats.sustained_count, 64);
    Ok(())
}

#[tokio::test]
async fn test_clients_are_independent() -> SecurityResult<()> {
    let (_, ddos) = service(DdosConfig {
        burst_threshold: 2,
        ..DdosConfig::default()
    });
    let noisy = random_ip();
    let quiet = format!("{}-quiet", random_ip());

    for _ in 0..5 {
        ddos.monitor_traffic(&noisy, "/", "test").await?;
    }
    assert!(ddos.is_ip_blocked_for_ddos(&noisy).await?);
    assert!(!ddos.monitor_traffic(&quiet, "/", "test").await?.is_attack);
    assert!(!ddos.is_ip_blocked_for_ddos(&quiet).await?);
    Ok(())
}

#[tokio::test]
async fn test_evicted_client_starts_fresh() -> SecurityResult<()> {
    let (_, ddos) = service(DdosConfig {
        idle_eviction_ms: 20,
        ..DdosConfig::default()
    });
    let ip = random_ip();

    for _ in 0..5 {
        ddos.monitor_traffic(&ip, "/", "test").await?;
    }
    wait(Duration::from_millis(40)).await;
    assert_eq!(ddos.evict_idle().await?, 1);

    ddos.monitor_traffic(&ip, "/", "test").await?;
    assert_eq!(ddos.traffic_stats(&ip).await?.burst_count, 1);
    Ok(())
}
