//! Hooks around the semaphore's wait point

use crate::CallerId;

/// Observes callers entering and leaving the wait queue.
///
/// Every method is invoked while the semaphore holds its internal lock, so
/// the order of calls is the order in which the semaphore made its
/// decisions. Implementations must be quick and must not call back into
/// the semaphore.
pub trait WaitObserver: Send + Sync {
    /// `caller` found no permit and is about to wait.
    fn waiting(&self, caller: CallerId);

    /// `caller`, which had been waiting, now holds a permit.
    fn granted(&self, caller: CallerId);

    /// `caller` stopped waiting without being granted.
    fn abandoned(&self, caller: CallerId) {
        let _ = caller;
    }
}
