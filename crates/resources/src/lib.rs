#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Leased resource pool for leasehold
//!
//! This crate hands a fixed set of interchangeable resources to concurrent
//! callers. Callers block on a [`leasehold_sync::Semaphore`] until a
//! resource is free, receive it as a [`Lease`], and either release it or
//! have it reclaimed when the lease runs out.

pub mod holder;
pub mod options;
pub mod pool;
pub mod registry;

pub use holder::{noop_holder, ExpiredLease, LeaseHolder};
pub use options::{IntoPoolOptions, PoolAvailability, PoolOptions};
pub use pool::{Lease, PoolBuilder, ResourcePool};
pub use registry::{ActiveLease, Claim, LeaseRegistry, LeaseState, ReleaseOutcome, ResourceId};
