//! Pool options and availability snapshots
//!
//! This module defines the construction-time options of a resource pool and
//! the availability snapshot reported while it runs.

use std::time::Duration;

use leasehold_config::PoolConfig;
use leasehold_sync::Fairness;

/// Construction-time pool options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Order in which blocked callers are served
    pub fairness: Fairness,
    /// Lease used by `acquire` when the caller gives none
    pub default_lease: Duration,
    /// Whether acquires give up when the caller is interrupted
    pub interruptible: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            fairness: Fairness::Fair,
            default_lease: Duration::from_secs(30),
            interruptible: true,
        }
    }
}

impl PoolOptions {
    /// Options for tests: short leases
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            default_lease: Duration::from_millis(100),
            ..Self::default()
        }
    }
}

/// Trait for converting configuration types to pool options
pub trait IntoPoolOptions {
    /// Convert this configuration into `PoolOptions`
    fn into_pool_options(self) -> PoolOptions;
}

impl IntoPoolOptions for PoolOptions {
    fn into_pool_options(self) -> PoolOptions {
        self
    }
}

impl IntoPoolOptions for &PoolConfig {
    fn into_pool_options(self) -> PoolOptions {
        PoolOptions {
            fairness: Fairness::from_flag(self.fair),
            default_lease: self.default_lease_duration(),
            interruptible: self.interruptible,
        }
    }
}

/// Pool availability information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAvailability {
    /// Number of resources the pool manages
    pub resource_count: usize,
    /// Semaphore permits not currently held
    pub available_permits: i64,
    /// Resources currently leased
    pub outstanding_leases: usize,
    /// Callers blocked waiting for a resource
    pub queued_waiters: usize,
}

impl PoolAvailability {
    /// Check if a caller arriving now would be served without waiting
    #[must_use]
    pub fn has_any_available(&self) -> bool {
        self.available_permits > 0 && self.queued_waiters == 0
    }

    /// Check if every resource is back in the pool
    #[must_use]
    pub fn all_available(&self) -> bool {
        self.outstanding_leases == 0
            && usize::try_from(self.available_permits).is_ok_and(|p| p == self.resource_count)
    }
}
