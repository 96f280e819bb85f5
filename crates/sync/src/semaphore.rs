//! Counting semaphore with selectable fairness
//!
//! The permit count is a signed integer: a semaphore created with `-k`
//! permits needs `k` releases before the first acquire can succeed.
//!
//! # Fair mode
//!
//! Every waiter gets its own oneshot channel and joins a FIFO queue guarded
//! by the semaphore's single lock. A caller only waits when the queue is
//! non-empty or no permit is left. `release` pops the queue head and
//! decrements the count on its behalf in the same critical section, so no
//! other caller can slip in between and no waiter is ever skipped.
//!
//! # Unfair mode
//!
//! Waiters share one [`Notify`]. `release` wakes an arbitrary waiter, which
//! then competes with any caller arriving at the same moment.
//!
//! # Cancellation
//!
//! An interrupted waiter (or a dropped acquire future) removes its own
//! queue entry under the lock. If the entry is already gone, a concurrent
//! `release` has granted it a permit, which is released again so the next
//! waiter gets it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use leasehold_errors::Error;
use tokio::sync::{oneshot, Notify};

use crate::{Caller, CallerId, WaitObserver};

/// Order in which blocked callers are served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fairness {
    /// Strict arrival order
    #[default]
    Fair,
    /// No ordering guarantee
    Unfair,
}

impl Fairness {
    #[must_use]
    pub fn from_flag(fair: bool) -> Self {
        if fair {
            Self::Fair
        } else {
            Self::Unfair
        }
    }

    #[must_use]
    pub fn is_fair(self) -> bool {
        matches!(self, Self::Fair)
    }
}

struct Waiter {
    ticket: u64,
    caller: CallerId,
    wake: oneshot::Sender<()>,
}

#[derive(Default)]
struct State {
    permits: i64,
    /// Fair mode only
    queue: VecDeque<Waiter>,
    next_ticket: u64,
    /// Unfair mode only
    parked: usize,
}

enum Wake {
    Granted,
    Interrupted,
    Lost,
}

/// A counting semaphore
pub struct Semaphore {
    state: Mutex<State>,
    fairness: Fairness,
    notify: Notify,
    observer: Option<Arc<dyn WaitObserver>>,
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("fairness", &self.fairness)
            .field("observed", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl Semaphore {
    /// Create a semaphore with `permits` initial permits (may be negative)
    #[must_use]
    pub fn new(permits: i64, fairness: Fairness) -> Self {
        Self {
            state: Mutex::new(State {
                permits,
                ..State::default()
            }),
            fairness,
            notify: Notify::new(),
            observer: None,
        }
    }

    #[must_use]
    pub fn fair(permits: i64) -> Self {
        Self::new(permits, Fairness::Fair)
    }

    #[must_use]
    pub fn unfair(permits: i64) -> Self {
        Self::new(permits, Fairness::Unfair)
    }

    /// Report wait-point activity to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn WaitObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn fairness(&self) -> Fairness {
        self.fairness
    }

    /// Current permit count, including negative values
    #[must_use]
    pub fn available_permits(&self) -> i64 {
        self.lock().permits
    }

    /// Number of callers currently blocked in an acquire
    #[must_use]
    pub fn queued_waiters(&self) -> usize {
        let state = self.lock();
        match self.fairness {
            Fairness::Fair => state.queue.len(),
            Fairness::Unfair => state.parked,
        }
    }

    /// Take a permit if one is available right now.
    ///
    /// A fair semaphore refuses while anyone is queued, so this never jumps
    /// ahead of a waiter.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        let may_take = match self.fairness {
            Fairness::Fair => state.queue.is_empty(),
            Fairness::Unfair => true,
        };
        if may_take && state.permits > 0 {
            state.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Wait for a permit, giving up if `caller` is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the caller is interrupted before or
    /// while waiting. No permit is held in that case, and the interrupt is
    /// consumed: the caller's flag is clear again.
    pub async fn acquire(&self, caller: &Caller) -> Result<(), Error> {
        if caller.clear_interrupt() {
            return Err(Error::Cancelled);
        }
        let result = self.wait(caller, true).await;
        if matches!(result, Err(Error::Cancelled)) {
            let _ = caller.clear_interrupt();
        }
        result
    }

    /// Wait for a permit, ignoring interrupts
    pub async fn acquire_uninterruptibly(&self, caller: &Caller) {
        let granted = self.wait(caller, false).await;
        debug_assert!(granted.is_ok(), "uninterruptible acquire failed: {granted:?}");
    }

    /// Return one permit, handing it to a waiter if one is queued
    pub fn release(&self) {
        let mut state = self.lock();
        self.release_locked(&mut state);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait(&self, caller: &Caller, interruptible: bool) -> Result<(), Error> {
        match self.fairness {
            Fairness::Fair => self.wait_fair(caller, interruptible).await,
            Fairness::Unfair => self.wait_unfair(caller, interruptible).await,
        }
    }

    async fn wait_fair(&self, caller: &Caller, interruptible: bool) -> Result<(), Error> {
        let (ticket, mut granted) = {
            let mut state = self.lock();
            if state.queue.is_empty() && state.permits > 0 {
                state.permits -= 1;
                return Ok(());
            }

            let (wake, granted) = oneshot::channel();
            let ticket = state.next_ticket;
            state.next_ticket = state.next_ticket.wrapping_add(1);
            state.queue.push_back(Waiter {
                ticket,
                caller: caller.id(),
                wake,
            });
            if let Some(observer) = &self.observer {
                observer.waiting(caller.id());
            }
            tracing::trace!(
                ticket,
                caller = %caller.id(),
                queued = state.queue.len(),
                "waiting for permit"
            );
            (ticket, granted)
        };

        let mut pending = PendingGrant {
            semaphore: self,
            ticket,
            caller: caller.id(),
            armed: true,
        };

        let wake = tokio::select! {
            biased;
            result = &mut granted => {
                if result.is_ok() { Wake::Granted } else { Wake::Lost }
            }
            () = caller.interrupted(), if interruptible => Wake::Interrupted,
        };

        match wake {
            Wake::Granted => {
                pending.armed = false;
                Ok(())
            }
            // Dropping the armed guard dequeues us or forwards the permit.
            Wake::Interrupted => Err(Error::Cancelled),
            Wake::Lost => {
                pending.armed = false;
                Err(Error::internal("semaphore waiter dropped without a grant"))
            }
        }
    }

    async fn wait_unfair(&self, caller: &Caller, interruptible: bool) -> Result<(), Error> {
        let mut parked: Option<Parked<'_>> = None;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            {
                let mut state = self.lock();
                if state.permits > 0 {
                    state.permits -= 1;
                    if let Some(mut guard) = parked.take() {
                        guard.armed = false;
                        state.parked = state.parked.saturating_sub(1);
                        if let Some(observer) = &self.observer {
                            observer.granted(caller.id());
                        }
                    }
                    return Ok(());
                }
                if parked.is_none() {
                    state.parked += 1;
                    if let Some(observer) = &self.observer {
                        observer.waiting(caller.id());
                    }
                    parked = Some(Parked {
                        semaphore: self,
                        caller: caller.id(),
                        armed: true,
                    });
                }
                // Registered under the lock: a release after this point
                // cannot miss us.
                notified.as_mut().enable();
            }

            let woken = tokio::select! {
                biased;
                () = &mut notified => true,
                () = caller.interrupted(), if interruptible => false,
            };
            if !woken {
                return Err(Error::Cancelled);
            }
        }
    }

    fn release_locked(&self, state: &mut State) {
        state.permits += 1;
        if state.permits <= 0 {
            // Still repaying an initial deficit.
            return;
        }
        match self.fairness {
            Fairness::Fair => {
                if let Some(waiter) = state.queue.pop_front() {
                    state.permits -= 1;
                    if let Some(observer) = &self.observer {
                        observer.granted(waiter.caller);
                    }
                    tracing::trace!(
                        ticket = waiter.ticket,
                        caller = %waiter.caller,
                        "handing permit to queue head"
                    );
                    // A closed receiver means the acquire future is being
                    // dropped; its guard finds the entry gone and releases
                    // the permit again.
                    let _ = waiter.wake.send(());
                }
            }
            Fairness::Unfair => self.notify.notify_one(),
        }
    }

    /// Remove a fair-mode waiter that stopped waiting.
    fn abandon(&self, ticket: u64, caller: CallerId) {
        let mut state = self.lock();
        if let Some(position) = state.queue.iter().position(|w| w.ticket == ticket) {
            let _ = state.queue.remove(position);
            if let Some(observer) = &self.observer {
                observer.abandoned(caller);
            }
            tracing::trace!(ticket, %caller, "waiter left the queue before a grant");
        } else {
            tracing::trace!(ticket, %caller, "grant raced with cancellation, forwarding permit");
            self.release_locked(&mut state);
        }
    }
}

/// Outstanding fair-mode queue entry owned by an acquire future
struct PendingGrant<'a> {
    semaphore: &'a Semaphore,
    ticket: u64,
    caller: CallerId,
    armed: bool,
}

impl Drop for PendingGrant<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.semaphore.abandon(self.ticket, self.caller);
        }
    }
}

/// Unfair-mode waiter registration owned by an acquire future
struct Parked<'a> {
    semaphore: &'a Semaphore,
    caller: CallerId,
    armed: bool,
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.semaphore.lock();
            state.parked = state.parked.saturating_sub(1);
            if let Some(observer) = &self.semaphore.observer {
                observer.abandoned(self.caller);
            }
        }
    }
}
