//! Lease holder callbacks

use std::sync::Arc;

use leasehold_sync::CallerId;

use crate::ResourceId;

/// What a holder is told when its lease runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredLease {
    pub resource: ResourceId,
    pub generation: u64,
    pub caller: CallerId,
}

/// Per-lease context supplied at acquire time.
///
/// `lease_expired` runs on a timer task after the resource has already been
/// taken back. The holder must stop using the resource; it is not
/// preempted.
pub trait LeaseHolder: Send + Sync {
    fn lease_expired(&self, lease: &ExpiredLease);
}

impl<F> LeaseHolder for F
where
    F: Fn(&ExpiredLease) + Send + Sync,
{
    fn lease_expired(&self, lease: &ExpiredLease) {
        self(lease);
    }
}

/// Holder for callers that do not care about expiry
#[must_use]
pub fn noop_holder() -> Arc<dyn LeaseHolder> {
    Arc::new(|_: &ExpiredLease| {})
}
