//! Performance benchmarks for the hot paths of the engine

use bincode::{deserialize, serialize};
use server::config::EngineConfig;
use server::registry::SessionRegistry;
use shared::{haversine_m, GameSnapshot, JoinTarget, LatLon, Packet, Response};
use std::time::{Duration, Instant};

/// Benchmarks the distance computation behind every capture check
#[test]
fn benchmark_haversine() {
    let a = LatLon::new(52.52, 13.405).unwrap();
    let b = LatLon::new(48.8566, 2.3522).unwrap();

    let iterations = 100_000;
    let start = Instant::now();

    let mut total = 0.0;
    for _ in 0..iterations {
        total += haversine_m(&a, &b);
    }

    let duration = start.elapsed();
    println!(
        "Haversine: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(total > 0.0);
    // Should complete in under 100ms for 100k iterations
    assert!(duration.as_millis() < 100);
}

/// Benchmarks position updates against a map with many regions
#[tokio::test(start_paused = true)]
async fn benchmark_position_updates() {
    let config = EngineConfig {
        extra_regions: 500,
        region_spread_m: 5_000.0,
        region_seed: Some(42),
        ..EngineConfig::default()
    };
    let registry = SessionRegistry::new(config).unwrap();
    let james = registry.users().create("james", "pw", None).await.unwrap();
    let game = registry.create("room1", james.id, 10.0, 10.0).await.unwrap();

    let iterations = 1_000;
    let start = Instant::now();

    for i in 0..iterations {
        let offset = (i % 100) as f64 * 0.0005;
        game.set_geolocation(james.id, 10.0 + offset, 10.0).await.unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Position updates: {} updates over 501 regions in {:?} ({:.2} μs/update)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks snapshot encoding for the datagram front
#[tokio::test(start_paused = true)]
async fn benchmark_snapshot_serialization() {
    let config = EngineConfig {
        extra_regions: 50,
        region_seed: Some(1),
        ..EngineConfig::default()
    };
    let registry = SessionRegistry::new(config).unwrap();
    let creator = registry.users().create("user0", "pw", None).await.unwrap();
    let game = registry.create("room1", creator.id, 0.0, 0.0).await.unwrap();
    for i in 1..32 {
        let user = registry
            .users()
            .create(&format!("user{}", i), "pw", None)
            .await
            .unwrap();
        registry
            .join(JoinTarget::Game(game.id()), user.id, None)
            .await
            .unwrap();
    }
    let snapshot = game.snapshot().await;

    let iterations = 1_000;
    let start = Instant::now();

    for i in 0..iterations {
        let packet = Packet::Response {
            id: i,
            response: Response::Game(snapshot.clone()),
        };
        let bytes = serialize(&packet).unwrap();
        let decoded: Packet = deserialize(&bytes).unwrap();
        assert!(matches!(decoded, Packet::Response { .. }));
    }

    let duration = start.elapsed();
    println!(
        "Snapshot serialization: {} snapshots of {} players in {:?}",
        iterations,
        snapshot.player_count(),
        duration
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Stress tests many sessions ticking side by side
#[tokio::test(start_paused = true)]
async fn stress_test_many_sessions() {
    let config = EngineConfig {
        tick_interval_ms: 1_000,
        win_score: 1_000,
        max_duration_secs: 3_600,
        ..EngineConfig::default()
    };
    let registry = SessionRegistry::new(config).unwrap();
    let james = registry.users().create("james", "pw", None).await.unwrap();

    let start = Instant::now();
    let mut games = Vec::new();
    for i in 0..200 {
        let lat = (i % 80) as f64;
        let game = registry.create("room", james.id, lat, 0.0).await.unwrap();
        game.set_geolocation(james.id, 0.0, lat).await.unwrap();
        games.push(game);
    }

    tokio::time::sleep(Duration::from_millis(10_500)).await;

    let mut snapshots: Vec<GameSnapshot> = Vec::new();
    for game in &games {
        snapshots.push(game.snapshot().await);
    }
    let duration = start.elapsed();
    println!("{} sessions ticked 10 times in {:?}", games.len(), duration);

    for snapshot in &snapshots {
        assert_eq!(snapshot.tick, 10);
        assert_eq!(snapshot.regions[0].garrison, 11);
    }
    assert_eq!(registry.len().await, 200);
}
