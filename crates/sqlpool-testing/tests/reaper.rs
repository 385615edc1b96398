//! Background reaper integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::thread;
use std::time::{Duration, Instant};

use sqlpool::{OwnerId, Pool, PoolConfig};
use sqlpool_testing::{MockAdapter, MockFactory, init_tracing};

fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_no_reaper_without_frequency() {
    init_tracing();
    let pool: Pool<MockAdapter> = Pool::new(PoolConfig::new(), MockFactory::new()).unwrap();
    assert!(!pool.is_reaping());
}

#[test]
fn test_reaper_reclaims_connection_of_dead_owner() {
    init_tracing();
    let factory = MockFactory::new();
    let pool: Pool<MockAdapter> = Pool::<MockAdapter>::builder()
        .pool_size(1)
        .checkout_timeout(Duration::from_secs(5))
        .dead_connection_timeout(Duration::from_millis(20))
        .reaping_frequency(Duration::from_millis(10))
        .build(factory.clone())
        .unwrap();
    assert!(pool.is_reaping());

    // The owner leases the only connection and goes away without releasing it.
    {
        let pool = pool.clone();
        thread::spawn(move || {
            pool.connection_for(OwnerId::new(1)).unwrap();
        })
        .join()
        .unwrap();
    }
    factory.session(0).unwrap().kill();
    factory.session(0).unwrap().refuse_reconnect(true);

    wait_for("reaper to run", || pool.metrics().connections_reaped == 1);
    assert_eq!(factory.session(0).unwrap().disconnects(), 1);
    assert!(!pool.is_active_connection(OwnerId::new(1)));

    // The capacity is usable again.
    let conn = pool.connection_for(OwnerId::new(2)).unwrap();
    assert_eq!(factory.connects(), 2);
    assert!(conn.in_use());
}

#[test]
fn test_reaper_hands_capacity_to_blocked_waiter() {
    init_tracing();
    let factory = MockFactory::new();
    let pool: Pool<MockAdapter> = Pool::<MockAdapter>::builder()
        .pool_size(1)
        .checkout_timeout(Duration::from_secs(5))
        .dead_connection_timeout(Duration::from_millis(20))
        .reaping_frequency(Duration::from_millis(10))
        .build(factory.clone())
        .unwrap();

    let abandoned = pool.checkout().unwrap();
    factory.session(0).unwrap().kill();

    let started = Instant::now();
    let conn = pool.checkout().unwrap();
    assert_ne!(conn.id(), abandoned.id());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_reaper_leaves_live_connections_alone() {
    init_tracing();
    let factory = MockFactory::new();
    let pool: Pool<MockAdapter> = Pool::<MockAdapter>::builder()
        .pool_size(2)
        .dead_connection_timeout(Duration::from_millis(5))
        .reaping_frequency(Duration::from_millis(5))
        .build(factory.clone())
        .unwrap();

    let conn = pool.checkout().unwrap();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(pool.metrics().connections_reaped, 0);
    assert!(conn.in_use());
    assert_eq!(pool.status().total, 1);
}
