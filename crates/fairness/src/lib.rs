#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Fairness verification for leasehold
//!
//! [`FairnessChecker`] keeps a ledger of callers in the order they started
//! waiting and checks every grant against the head of that ledger. It only
//! observes; it never influences who gets a permit. Plug it into a
//! semaphore or pool as a [`WaitObserver`] and inspect the counters after
//! the run.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use leasehold_sync::{Caller, CallerId, WaitObserver};

/// A grant that did not go to the longest waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Head of the ledger at grant time, `None` if the ledger was empty
    pub expected: Option<CallerId>,
    pub granted: CallerId,
}

/// Snapshot of what the checker has seen
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FairnessReport {
    pub checked: u64,
    pub mismatches: Vec<Mismatch>,
    /// Callers still recorded as waiting
    pub pending: usize,
}

impl FairnessReport {
    /// Every checked grant went to the head of the ledger
    #[must_use]
    pub fn is_fifo(&self) -> bool {
        self.mismatches.is_empty()
    }
}

#[derive(Debug, Default)]
struct Ledger {
    waiting: VecDeque<CallerId>,
    checked: u64,
    mismatches: Vec<Mismatch>,
}

/// Records wait order and verifies grant order
#[derive(Debug, Default)]
pub struct FairnessChecker {
    ledger: Mutex<Ledger>,
}

impl FairnessChecker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that `caller` is about to wait
    pub fn add_caller(&self, caller: &Caller) {
        self.add_new(caller.id());
    }

    /// Record that the caller identified by `id` is about to wait
    pub fn add_new(&self, id: CallerId) {
        self.lock().waiting.push_back(id);
    }

    /// Check that `granted` is the longest waiter.
    ///
    /// The head of the ledger is consumed whatever the outcome.
    #[must_use]
    pub fn is_fifo_order(&self, granted: CallerId) -> bool {
        let mut ledger = self.lock();
        ledger.checked += 1;
        let expected = ledger.waiting.pop_front();
        if expected == Some(granted) {
            return true;
        }

        tracing::debug!(
            expected = ?expected,
            %granted,
            "grant did not go to the longest waiter"
        );
        ledger.mismatches.push(Mismatch { expected, granted });
        false
    }

    /// Forget `caller`'s wait without consuming the head
    #[must_use]
    pub fn remove_caller(&self, caller: &Caller) -> bool {
        self.remove(caller.id())
    }

    /// Forget the wait recorded for `id`, returning whether one existed
    #[must_use]
    pub fn remove(&self, id: CallerId) -> bool {
        let mut ledger = self.lock();
        match ledger.waiting.iter().position(|waiting| *waiting == id) {
            Some(position) => ledger.waiting.remove(position).is_some(),
            None => false,
        }
    }

    /// Clear the ledger and all counters
    pub fn reset(&self) {
        *self.lock() = Ledger::default();
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().waiting.len()
    }

    #[must_use]
    pub fn checked(&self) -> u64 {
        self.lock().checked
    }

    #[must_use]
    pub fn violations(&self) -> usize {
        self.lock().mismatches.len()
    }

    #[must_use]
    pub fn report(&self) -> FairnessReport {
        let ledger = self.lock();
        FairnessReport {
            checked: ledger.checked,
            mismatches: ledger.mismatches.clone(),
            pending: ledger.waiting.len(),
        }
    }

    /// Report of a run where every grant matched wait order.
    ///
    /// # Errors
    ///
    /// Returns the report itself if any grant went out of order.
    pub fn assert_fifo(&self) -> Result<FairnessReport, FairnessReport> {
        let report = self.report();
        if report.is_fifo() {
            Ok(report)
        } else {
            Err(report)
        }
    }
}

impl WaitObserver for FairnessChecker {
    fn waiting(&self, caller: CallerId) {
        self.add_new(caller);
    }

    fn granted(&self, caller: CallerId) {
        let _ = self.is_fifo_order(caller);
    }

    fn abandoned(&self, caller: CallerId) {
        let _ = self.remove(caller);
    }
}
