//! Per-caller identity and interrupt flag
//!
//! A [`Caller`] stands in for the waiting thread: it names who is waiting
//! (for fairness bookkeeping) and lets another task interrupt the wait.
//! Clones share the same identity and the same interrupt flag.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use uuid::Uuid;

/// Stable identity of a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallerId(Uuid);

impl CallerId {
    /// Generate a fresh random identity
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CallerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CallerId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Default)]
struct InterruptState {
    flag: AtomicBool,
    notify: Notify,
}

/// Handle passed to every acquire call
#[derive(Debug, Clone)]
pub struct Caller {
    id: CallerId,
    interrupt: Arc<InterruptState>,
}

impl Caller {
    /// Create a caller with a fresh identity
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(CallerId::new())
    }

    /// Create a caller with a known identity
    #[must_use]
    pub fn with_id(id: CallerId) -> Self {
        Self {
            id,
            interrupt: Arc::new(InterruptState::default()),
        }
    }

    #[must_use]
    pub fn id(&self) -> CallerId {
        self.id
    }

    /// Set the interrupt flag and wake any wait observing it.
    ///
    /// An interruptible acquire that fails with `Cancelled` clears the flag
    /// again. Otherwise it stays set until [`Caller::clear_interrupt`].
    pub fn interrupt(&self) {
        self.interrupt.flag.store(true, Ordering::SeqCst);
        self.interrupt.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.flag.load(Ordering::SeqCst)
    }

    /// Clear the interrupt flag, returning whether it was set
    #[must_use]
    pub fn clear_interrupt(&self) -> bool {
        self.interrupt.flag.swap(false, Ordering::SeqCst)
    }

    /// Resolve once the caller is interrupted
    pub async fn interrupted(&self) {
        loop {
            let notified = self.interrupt.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so an interrupt landing in
            // between is not lost.
            notified.as_mut().enable();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Caller {
    fn default() -> Self {
        Self::new()
    }
}
