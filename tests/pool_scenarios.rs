//! End-to-end pool behaviour: hand-off, eviction, maintenance, shutdown and
//! creation failures.

mod common;

use std::sync::{Arc, Barrier};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use common::{pool, pool_with};
use crossbeam::channel;
use esox_resourcepool::{MaintenanceOutcome, PoolConfiguration, PoolError};

fn wait_for_waiters<F>(pool: &esox_resourcepool::ResourcePool<F>, count: usize)
where
    F: esox_resourcepool::ResourceFactory,
{
    while pool.waiting_count() < count {
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn release_then_acquire_returns_same_resource() {
    let pool = pool(1, 1);

    let first = pool.acquire().unwrap();
    let id = first.id;
    pool.release(first);

    let again = pool.acquire().unwrap();
    assert_eq!(again.id, id);
    assert_eq!(pool.factory().created(), 1);
}

#[test]
fn blocked_acquire_receives_released_resource() {
    let pool = Arc::new(pool(1, 1));

    let r1 = pool.acquire().unwrap();
    let r1_id = r1.id;

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire().map(|conn| conn.id))
    };
    wait_for_waiters(&pool, 1);
    assert_eq!(pool.get_metrics().exhaustion_stalls, 1);

    pool.release(r1);

    assert_eq!(waiter.join().unwrap().unwrap(), r1_id);
    assert_eq!(pool.factory().created(), 1);
    assert_eq!(pool.cached_count(), 1);
}

#[test]
fn waiters_are_served_in_arrival_order() {
    let pool = Arc::new(pool(1, 2));
    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    let (served_tx, served_rx) = channel::unbounded();
    let (done_tx, done_rx) = channel::unbounded::<()>();

    let spawn_waiter = |name: &'static str| {
        let pool = Arc::clone(&pool);
        let served_tx = served_tx.clone();
        let done_rx = done_rx.clone();
        thread::spawn(move || {
            let conn = pool.acquire().unwrap();
            served_tx.send((name, conn.id)).unwrap();
            // Hold on to it until the test is done looking
            let _ = done_rx.recv();
        })
    };

    let first = spawn_waiter("first");
    wait_for_waiters(&pool, 1);
    let second = spawn_waiter("second");
    wait_for_waiters(&pool, 2);

    let a_id = a.id;
    drop(a);
    assert_eq!(served_rx.recv().unwrap(), ("first", a_id));

    let b_id = b.id;
    drop(b);
    assert_eq!(served_rx.recv().unwrap(), ("second", b_id));

    drop(done_tx);
    first.join().unwrap();
    second.join().unwrap();
    assert_eq!(pool.cached_count(), 1);
    assert_eq!(pool.created_count(), 1);
}

#[test]
fn full_cache_discards_oldest_on_release() {
    let pool = pool(1, 2);

    let r1 = pool.acquire().unwrap();
    let r2 = pool.acquire().unwrap();
    let (r1_id, r2_id) = (r1.id, r2.id);
    assert_ne!(r1_id, r2_id);
    assert_eq!(pool.created_count(), 2);

    pool.release(r1);
    pool.release(r2);

    assert_eq!(pool.cached_count(), 1);
    assert_eq!(pool.created_count(), 1);
    assert_eq!(pool.extant_count(), 1);
    assert_eq!(pool.factory().closed_ids(), vec![r1_id]);
    assert_eq!(pool.acquire().unwrap().id, r2_id);
}

#[test]
fn maintenance_evicts_stale_idle_resource() {
    let config = PoolConfiguration::new().with_idle_timeout(Duration::from_millis(20));
    let pool = pool_with(config, 2, 2);

    let conn = pool.acquire().unwrap();
    let id = conn.id;
    drop(conn);
    assert_eq!(pool.created_count(), 1);

    thread::sleep(Duration::from_millis(40));

    assert_eq!(pool.run_maintenance(), MaintenanceOutcome::Expired);
    assert_eq!(pool.created_count(), 0);
    assert_eq!(pool.cached_count(), 0);
    assert_eq!(pool.factory().closed_ids(), vec![id]);
}

#[test]
fn maintenance_discards_only_the_invalid_resource() {
    let pool = pool(2, 2);

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    let (a_id, b_id) = (a.id, b.id);
    drop(a);
    drop(b);
    pool.factory().invalid.lock().insert(a_id);

    assert_eq!(pool.run_maintenance(), MaintenanceOutcome::Invalid);
    assert_eq!(pool.factory().closed_ids(), vec![a_id]);
    assert_eq!(pool.cached_count(), 1);
    assert_eq!(pool.created_count(), 1);

    assert_eq!(pool.run_maintenance(), MaintenanceOutcome::Retained);
    assert_eq!(pool.acquire().unwrap().id, b_id);
    assert_eq!(pool.get_metrics().validation_failures, 1);
}

#[test]
fn maintenance_hands_retained_resource_to_waiter() {
    let pool = Arc::new(pool(1, 1));
    drop(pool.acquire().unwrap());
    let gate = Arc::new(Barrier::new(2));
    *pool.factory().validate_gate.lock() = Some(Arc::clone(&gate));

    let maintenance = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.run_maintenance())
    };
    gate.wait();

    let (got_tx, got_rx) = channel::unbounded();
    let (done_tx, done_rx) = channel::unbounded::<()>();
    let acquirer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let conn = pool.acquire().unwrap();
            got_tx.send(conn.id).unwrap();
            done_rx.recv().unwrap();
        })
    };
    wait_for_waiters(&pool, 1);
    gate.wait();

    assert_eq!(maintenance.join().unwrap(), MaintenanceOutcome::Retained);
    assert_eq!(got_rx.recv().unwrap(), 0);
    assert_eq!(pool.cached_count(), 0);
    assert_eq!(pool.waiting_count(), 0);
    done_tx.send(()).unwrap();
    acquirer.join().unwrap();

    assert_eq!(pool.cached_count(), 1);
    assert_eq!(pool.factory().created(), 1);
}

#[test]
fn shutdown_closes_idle_and_checked_out_resources() {
    let pool = pool(3, 3);
    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    let c = pool.acquire().unwrap();
    drop(a);
    pool.factory().fail_close.store(true, Ordering::SeqCst);

    assert!(pool.shutdown());

    assert_eq!(pool.factory().closed_ids(), vec![0, 1, 2]);
    assert!(!b.is_open());
    assert!(!c.is_open());
    assert!(pool.get_metrics().close_failures >= 3);

    // Late releases do not close twice
    drop(b);
    drop(c);
    assert_eq!(pool.factory().closed.lock().len(), 3);
    assert_eq!(pool.extant_count(), 0);
    assert_eq!(pool.created_count(), 0);
}

#[test]
fn dropping_the_pool_runs_shutdown() {
    let pool = pool(2, 2);
    let conn = pool.acquire().unwrap();
    drop(pool);

    assert!(!conn.is_open());
}

#[test]
fn resource_created_during_shutdown_is_closed_not_handed_out() {
    let pool = Arc::new(pool(1, 1));
    let gate = Arc::new(Barrier::new(2));
    *pool.factory().create_gate.lock() = Some(Arc::clone(&gate));

    let acquirer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire().map(|conn| conn.is_open()))
    };

    gate.wait();
    assert!(pool.shutdown());
    gate.wait();

    assert!(matches!(acquirer.join().unwrap(), Err(PoolError::ShutDown)));
    assert_eq!(pool.factory().created(), 1);
    assert_eq!(pool.factory().closed_ids(), vec![0]);
    assert_eq!(pool.factory().live(), 0);
    assert_eq!(pool.extant_count(), 0);
    assert_eq!(pool.created_count(), 0);
}

#[test]
fn creation_failure_leaves_count_unchanged() {
    let pool = pool(1, 2);
    pool.factory().fail_create.store(true, Ordering::SeqCst);

    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, PoolError::Creation(_)));
    assert_eq!(err.to_string(), "Failed to create resource: connection refused");
    assert_eq!(pool.created_count(), 0);
    assert_eq!(pool.extant_count(), 0);

    // No retry loop: every call reports the failure
    assert!(pool.acquire().unwrap_err().is_creation());
    assert_eq!(pool.get_metrics().creation_failures, 2);

    pool.factory().fail_create.store(false, Ordering::SeqCst);
    assert!(pool.acquire().is_ok());
}

#[test]
fn creation_failure_passes_slot_to_waiter() {
    let pool = Arc::new(pool(1, 1));
    let held = pool.acquire().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire().map(|conn| conn.id))
    };
    wait_for_waiters(&pool, 1);

    pool.factory().fail_create.store(true, Ordering::SeqCst);
    held.discard();

    assert!(waiter.join().unwrap().unwrap_err().is_creation());
    assert_eq!(pool.created_count(), 0);
    assert_eq!(pool.waiting_count(), 0);
}

#[test]
fn acquire_timeout_from_configuration() {
    let config = PoolConfiguration::new().with_acquire_timeout(Duration::from_millis(30));
    let pool = pool_with(config, 1, 1);
    let _held = pool.acquire().unwrap();

    assert!(matches!(pool.acquire(), Err(PoolError::Timeout(d)) if d == Duration::from_millis(30)));
    assert_eq!(pool.waiting_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn async_borrowers_share_a_small_pool() {
    let pool = Arc::new(pool(2, 2));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let conn = pool.acquire_async().await?;
                conn.claim();
                tokio::time::sleep(Duration::from_millis(2)).await;
                conn.unclaim();
                Ok::<_, PoolError>(conn.id)
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(pool.factory().peak_live.load(Ordering::SeqCst) <= 2);
    assert!(pool.created_count() <= 2);
    assert_eq!(pool.waiting_count(), 0);
}

#[tokio::test]
async fn shutdown_handler_wakes_async_waiter() {
    let pool = Arc::new(pool(1, 1));
    let _held = pool.acquire().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire_async().await.map(|conn| conn.id) })
    };
    while pool.waiting_count() == 0 {
        tokio::task::yield_now().await;
    }

    assert!(pool.shutdown_handler().run());
    assert!(matches!(waiter.await.unwrap(), Err(PoolError::ShutDown)));
}
