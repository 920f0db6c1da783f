//! Entropy engine scenarios: degraded pools and the isolated daemon.

use std::collections::HashSet;
use std::sync::Arc;

use witnessd_core::NoopPrivilegeDropper;
use witnessd_entropy::{
    BlendedEntropyPool, DaemonConfig, EntropyClient, EntropyDaemon, EntropyError, ExternalSource,
    HardenedEntropyPool, OsSource, PoolConfig,
};

fn spread_source(name: &str) -> ExternalSource {
    let counter = std::sync::atomic::AtomicU64::new(0);
    ExternalSource::new(name, move |n| {
        let base = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok((0..n)
            .map(|i| (base.wrapping_mul(197).wrapping_add(i as u64 * 11) % 253) as u8)
            .collect())
    })
}

#[test]
fn degraded_pool_recovers_when_second_source_arrives() {
    let pool = HardenedEntropyPool::new(PoolConfig {
        min_healthy_sources: 2,
        ..PoolConfig::default()
    });
    pool.add_source(Box::new(spread_source("first")));

    // One healthy source below the minimum of two: every draw refuses.
    for _ in 0..3 {
        assert!(matches!(
            pool.get_bytes(32),
            Err(EntropyError::NoHealthySources {
                healthy: 1,
                required: 2
            })
        ));
    }
    assert!(!pool.is_healthy());

    pool.add_source(Box::new(spread_source("second")));
    assert!(pool.is_healthy());
    assert_eq!(pool.get_bytes(32).unwrap().len(), 32);
}

#[test]
fn pool_draws_never_collide() {
    let pool = HardenedEntropyPool::new(PoolConfig::default());
    pool.add_source(Box::new(OsSource::new()));

    let mut seen = HashSet::new();
    for _ in 0..10_000 {
        assert!(seen.insert(pool.get_bytes(32).unwrap()));
    }
}

#[tokio::test]
async fn daemon_round_trip_through_client() {
    let dir = tempfile::tempdir().unwrap();
    let config = DaemonConfig {
        socket_path: dir.path().join("entropy.sock"),
        ..DaemonConfig::default()
    };
    let socket_path = config.socket_path.clone();

    let pool = BlendedEntropyPool::new(PoolConfig::default());
    pool.add_source(Box::new(OsSource::new()));
    let daemon = EntropyDaemon::bind(config, Arc::new(pool), &NoopPrivilegeDropper).unwrap();

    let (shutdown, shutdown_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(daemon.run(shutdown_rx));

    let client = EntropyClient::new(&socket_path);
    let mut seen = HashSet::new();
    for _ in 0..50 {
        let draw = client.get_bytes(64).await.unwrap();
        assert_eq!(draw.len(), 64);
        assert!(seen.insert(draw));
    }
    assert!(!client.is_degraded());

    shutdown.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn client_degrades_and_recovers_across_daemon_restart() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("entropy.sock");

    // No daemon yet: fallback serves and flags degradation.
    let client = EntropyClient::new(&socket_path);
    assert_eq!(client.get_bytes(32).await.unwrap().len(), 32);
    assert!(client.is_degraded());

    let pool = BlendedEntropyPool::new(PoolConfig::default());
    pool.add_source(Box::new(OsSource::new()));
    let config = DaemonConfig {
        socket_path: socket_path.clone(),
        ..DaemonConfig::default()
    };
    let daemon = EntropyDaemon::bind(config, Arc::new(pool), &NoopPrivilegeDropper).unwrap();
    let (shutdown, shutdown_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(daemon.run(shutdown_rx));

    client.get_bytes(32).await.unwrap();
    assert!(!client.is_degraded());

    shutdown.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[test]
fn secret_writes_leave_no_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("seed");
    for round in 0u8..5 {
        witnessd_core::write_secret_file(&target, &[round; 32]).unwrap();
    }

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp."))
        .collect();
    assert!(leftovers.is_empty());
    assert_eq!(std::fs::read(&target).unwrap(), vec![4u8; 32]);
}
