//! Integration tests for leasehold
//!
//! These tests drive the pool, semaphore and fairness checker together.

mod common;

use common::{counting_holder, EventTally, TestPool};
use futures::poll;
use leasehold_config::Config;
use leasehold_errors::Error;
use leasehold_fairness::FairnessChecker;
use leasehold_resources::{noop_holder, PoolOptions, ResourcePool};
use leasehold_sync::{Caller, Fairness};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use tokio::sync::Barrier;
use tokio::task::JoinSet;

fn long_leases() -> PoolOptions {
    PoolOptions {
        default_lease: Duration::from_secs(60),
        ..PoolOptions::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_never_exceeds_its_resource_count() {
    let mut env = TestPool::new(2, long_leases());
    let holding = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = JoinSet::new();
    for _ in 0..5 {
        let pool = env.pool.clone();
        let holding = holding.clone();
        let peak = peak.clone();
        tasks.spawn(async move {
            let caller = Caller::new();
            for _ in 0..5 {
                let lease = pool.acquire(&caller, noop_holder()).await?;
                let now = holding.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let hold = rand::thread_rng().gen_range(1..=8);
                tokio::time::sleep(Duration::from_millis(hold)).await;

                holding.fetch_sub(1, Ordering::SeqCst);
                assert!(pool.release(lease));
            }
            Ok::<_, Error>(())
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(env.pool.availability().all_available());

    let tally = EventTally::of(&env.drain_pool_events());
    assert_eq!(tally.granted, 25);
    assert_eq!(tally.released, 25);
    assert_eq!(tally.cancelled, 0);
    assert_eq!(tally.violations, 0);
    assert!(env.checker.report().is_fifo());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fair_pool_serves_callers_in_wait_order() {
    let env = TestPool::new(1, long_leases());

    for run in 0..5 {
        env.checker.reset();
        let barrier = Arc::new(Barrier::new(4));
        let mut tasks = JoinSet::new();
        for _ in 0..4 {
            let pool = env.pool.clone();
            let barrier = barrier.clone();
            tasks.spawn(async move {
                let caller = Caller::new();
                barrier.wait().await;
                for _ in 0..3 {
                    let lease = pool.acquire(&caller, noop_holder()).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    assert!(pool.release(lease));
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let report = env
            .checker
            .assert_fifo()
            .unwrap_or_else(|report| panic!("run {run}: {:?}", report.mismatches));
        assert_eq!(report.pending, 0);
        assert!(env.pool.availability().all_available());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callers_checking_their_own_grants_see_wait_order() {
    let pool = ResourcePool::new(vec!["only".to_string()], long_leases()).unwrap();
    let checker = Arc::new(FairnessChecker::new());
    // Recording a caller and entering the queue happen under one turn.
    let turn = Arc::new(tokio::sync::Mutex::new(()));

    let mut tasks = JoinSet::new();
    for _ in 0..6 {
        let pool = pool.clone();
        let checker = checker.clone();
        let turn = turn.clone();
        tasks.spawn(async move {
            let caller = Caller::new();
            for _ in 0..4 {
                let mut wait = std::pin::pin!(pool.acquire(&caller, noop_holder()));
                let entered = {
                    let _turn = turn.lock().await;
                    checker.add_caller(&caller);
                    poll!(wait.as_mut())
                };
                let lease = match entered {
                    Poll::Ready(granted) => granted.unwrap(),
                    Poll::Pending => wait.await.unwrap(),
                };
                assert!(checker.is_fifo_order(caller.id()));
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert!(pool.release(lease));
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let report = checker.assert_fifo().unwrap();
    assert_eq!(report.checked, 24);
    assert_eq!(report.pending, 0);
    assert!(pool.availability().all_available());
}

#[tokio::test]
async fn interrupted_waiters_keep_permits_and_order_intact() {
    let mut env = TestPool::new(1, long_leases());
    let pool = &env.pool;
    let first = pool.acquire(&Caller::new(), noop_holder()).await.unwrap();

    let callers: Vec<Caller> = (0..5).map(|_| Caller::new()).collect();
    let mut waits: Vec<_> = callers
        .iter()
        .map(|caller| Box::pin(pool.acquire(caller, noop_holder())))
        .collect();
    for wait in &mut waits {
        assert!(poll!(wait.as_mut()).is_pending());
    }
    assert_eq!(pool.availability().queued_waiters, 5);

    callers[1].interrupt();
    callers[3].interrupt();
    assert!(matches!(poll!(waits[1].as_mut()), Poll::Ready(Err(Error::Cancelled))));
    assert!(matches!(poll!(waits[3].as_mut()), Poll::Ready(Err(Error::Cancelled))));
    assert_eq!(pool.availability().available_permits, 0);
    assert_eq!(pool.availability().queued_waiters, 3);

    let mut held = first;
    for next in [0, 2, 4] {
        assert!(pool.release(held));
        held = match poll!(waits[next].as_mut()) {
            Poll::Ready(Ok(lease)) => lease,
            other => panic!("waiter {next} not served: {other:?}"),
        };
    }
    assert!(pool.release(held));
    drop(waits);

    assert!(pool.availability().all_available());
    assert!(env.checker.report().is_fifo());
    assert_eq!(env.checker.report().checked, 3);
    let tally = EventTally::of(&env.drain_pool_events());
    assert_eq!(tally.cancelled, 2);
    assert_eq!(tally.granted, 4);
}

#[tokio::test(start_paused = true)]
async fn expired_leases_pass_to_waiters_in_order() {
    let env = TestPool::new(1, PoolOptions::for_testing());
    let pool = &env.pool;
    let (holder, fired) = counting_holder();
    let first = pool.acquire(&Caller::new(), holder.clone()).await.unwrap();

    let (a, b) = (Caller::new(), Caller::new());
    let mut wait_a = Box::pin(pool.acquire(&a, holder.clone()));
    let mut wait_b = Box::pin(pool.acquire(&b, holder));
    assert!(poll!(wait_a.as_mut()).is_pending());
    assert!(poll!(wait_b.as_mut()).is_pending());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    let Poll::Ready(Ok(second)) = poll!(wait_a.as_mut()) else {
        panic!("first waiter was not handed the expired resource");
    };
    assert_eq!(second.generation(), 2);
    assert!(poll!(wait_b.as_mut()).is_pending());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    let Poll::Ready(Ok(third)) = poll!(wait_b.as_mut()) else {
        panic!("second waiter was not handed the expired resource");
    };
    assert_eq!(third.generation(), 3);

    assert!(!pool.release(first));
    assert!(!pool.release(second));
    assert!(pool.release(third));
    assert!(env.checker.report().is_fifo());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn short_leases_end_exactly_once_under_load() {
    let options = PoolOptions {
        default_lease: Duration::from_millis(15),
        ..PoolOptions::default()
    };
    let mut env = TestPool::new(2, options);
    let released = Arc::new(AtomicUsize::new(0));
    let (holder, expired) = counting_holder();

    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let pool = env.pool.clone();
        let released = released.clone();
        let holder = holder.clone();
        tasks.spawn(async move {
            let caller = Caller::new();
            for _ in 0..5 {
                let lease = pool.acquire(&caller, holder.clone()).await.unwrap();
                let hold = rand::thread_rng().gen_range(5..=25);
                tokio::time::sleep(Duration::from_millis(hold)).await;
                if pool.release(lease) {
                    released.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let released = released.load(Ordering::SeqCst);
    let expired = expired.load(Ordering::SeqCst);
    assert_eq!(released + expired, 20);
    assert!(env.pool.availability().all_available());

    let tally = EventTally::of(&env.drain_pool_events());
    assert_eq!(tally.granted, 20);
    assert_eq!(tally.released, released);
    assert_eq!(tally.expired, expired);
}

#[tokio::test]
async fn pool_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    tokio::fs::write(
        &path,
        "[pool]\nresource_count = 3\nfair = false\ndefault_lease_ms = 250\n",
    )
    .await
    .unwrap();

    let config = Config::load_from_file(&path).await.unwrap();
    let pool = ResourcePool::from_config(&config.pool, |id| format!("db-{}", id.index())).unwrap();
    assert_eq!(pool.resource_count(), 3);
    assert_eq!(pool.options().fairness, Fairness::Unfair);
    assert_eq!(pool.options().default_lease, Duration::from_millis(250));
    assert!(pool.options().interruptible);

    let lease = pool.acquire(&Caller::new(), noop_holder()).await.unwrap();
    assert_eq!(lease.as_str(), "db-0");
    assert!(pool.release(lease));
}
