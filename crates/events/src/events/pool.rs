use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lease lifecycle events emitted by a resource pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    /// Pool constructed
    Created {
        pool_id: String,
        resource_count: usize,
        fair: bool,
    },

    /// A resource was handed to a caller
    LeaseGranted {
        pool_id: String,
        resource: usize,
        generation: u64,
        caller: String,
        lease: Duration,
    },

    /// A caller returned its resource before the lease ran out
    LeaseReleased {
        pool_id: String,
        resource: usize,
        generation: u64,
        held: Duration,
    },

    /// The lease ran out and the resource was reclaimed
    LeaseExpired {
        pool_id: String,
        resource: usize,
        generation: u64,
    },

    /// A caller stopped waiting before it was granted a resource
    AcquireCancelled { pool_id: String, caller: String },

    /// The registry and semaphore disagreed; the permit was returned
    InvariantViolated { pool_id: String, message: String },
}
