//! Shared fixtures for the cross-crate tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use leasehold_events::{AppEvent, EventReceiver, PoolEvent};
use leasehold_fairness::FairnessChecker;
use leasehold_resources::{ExpiredLease, LeaseHolder, PoolOptions, ResourcePool};

/// A pool wired to a fairness checker and an event channel
pub struct TestPool {
    pub pool: ResourcePool<String>,
    pub checker: Arc<FairnessChecker>,
    pub events: EventReceiver,
}

impl TestPool {
    pub fn new(resource_count: usize, options: PoolOptions) -> Self {
        let (tx, events) = leasehold_events::channel();
        let checker = Arc::new(FairnessChecker::new());
        let payloads = (0..resource_count).map(|i| format!("worker-{i}")).collect();
        let pool = ResourcePool::builder(payloads)
            .options(options)
            .with_observer(checker.clone())
            .with_event_sender(tx)
            .build()
            .expect("test pool");
        Self {
            pool,
            checker,
            events,
        }
    }

    /// Drain every pool event emitted so far
    pub fn drain_pool_events(&mut self) -> Vec<PoolEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let AppEvent::Pool(event) = event {
                drained.push(event);
            }
        }
        drained
    }
}

/// Tallies pool events by kind
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EventTally {
    pub granted: usize,
    pub released: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub violations: usize,
}

impl EventTally {
    pub fn of(events: &[PoolEvent]) -> Self {
        let mut tally = Self::default();
        for event in events {
            match event {
                PoolEvent::LeaseGranted { .. } => tally.granted += 1,
                PoolEvent::LeaseReleased { .. } => tally.released += 1,
                PoolEvent::LeaseExpired { .. } => tally.expired += 1,
                PoolEvent::AcquireCancelled { .. } => tally.cancelled += 1,
                PoolEvent::InvariantViolated { .. } => tally.violations += 1,
                PoolEvent::Created { .. } => {}
            }
        }
        tally
    }
}

/// Holder that counts how often its lease expired
pub fn counting_holder() -> (Arc<dyn LeaseHolder>, Arc<AtomicUsize>) {
    let fired = Arc::new(AtomicUsize::new(0));
    let seen = fired.clone();
    let holder: Arc<dyn LeaseHolder> = Arc::new(move |_: &ExpiredLease| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (holder, fired)
}
