//! Leased resource pool
//!
//! A [`ResourcePool`] owns a fixed set of payloads and hands them out as
//! [`Lease`]s. Access is gated by a [`Semaphore`] with one permit per
//! resource. Once a permit is held, a free slot is claimed in the
//! [`LeaseRegistry`] and an expiration timer is spawned on the tokio runtime.
//!
//! Release and expiration both go through the registry lock, so exactly one
//! of them ends a given lease and exactly one permit is returned for it.

use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use leasehold_config::PoolConfig;
use leasehold_errors::{Error, PoolError};
use leasehold_events::{EventEmitter, EventSender, PoolEvent};
use leasehold_sync::{Caller, CallerId, Fairness, Semaphore, WaitObserver};
use tokio::runtime::Handle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::registry::{LeaseRegistry, ReleaseOutcome};
use crate::{
    ExpiredLease, IntoPoolOptions, LeaseHolder, PoolAvailability, PoolOptions, ResourceId,
};

/// A resource handed out by a pool.
///
/// Give it back with [`ResourcePool::release`]. Dropping it without
/// releasing leaves the resource leased until its timer reclaims it.
#[must_use = "a lease that is never released stays out until it expires"]
pub struct Lease<T> {
    pool_id: Uuid,
    id: ResourceId,
    generation: u64,
    resource: Arc<T>,
}

impl<T> Lease<T> {
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Generation of the resource at grant time
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn pool_id(&self) -> Uuid {
        self.pool_id
    }

    /// Shared handle to the payload
    #[must_use]
    pub fn resource(&self) -> &Arc<T> {
        &self.resource
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("pool_id", &self.pool_id)
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

struct Inner<T> {
    id: Uuid,
    payloads: Vec<Arc<T>>,
    semaphore: Semaphore,
    registry: Mutex<LeaseRegistry>,
    options: PoolOptions,
    events: Option<EventSender>,
}

impl<T> EventEmitter for Inner<T> {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}

impl<T> Inner<T> {
    fn lock_registry(&self) -> MutexGuard<'_, LeaseRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timer path: take the resource back unless the lease already ended
    fn expire(&self, id: ResourceId, generation: u64) {
        let reclaimed = self.lock_registry().expire(id, generation);
        let Some(active) = reclaimed else {
            tracing::trace!(pool = %self.id, resource = %id, generation, "stale lease timer");
            return;
        };

        let expired = ExpiredLease {
            resource: id,
            generation,
            caller: active.caller(),
        };
        let notified = panic::catch_unwind(AssertUnwindSafe(|| {
            active.holder().lease_expired(&expired);
        }));
        self.semaphore.release();
        if notified.is_err() {
            tracing::error!(
                pool = %self.id,
                resource = %id,
                generation,
                "lease holder panicked in its expiry callback"
            );
            self.emit_error(format!("lease holder for resource {id} panicked on expiry"));
        }

        tracing::debug!(pool = %self.id, resource = %id, generation, "lease expired");
        self.emit_pool(PoolEvent::LeaseExpired {
            pool_id: self.id.to_string(),
            resource: id.index(),
            generation,
        });
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.registry
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_timers();
    }
}

/// Pool of interchangeable resources handed out under time-limited leases
pub struct ResourcePool<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("id", &self.inner.id)
            .field("resource_count", &self.inner.payloads.len())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ResourcePool`]
pub struct PoolBuilder<T> {
    payloads: Vec<T>,
    options: PoolOptions,
    observer: Option<Arc<dyn WaitObserver>>,
    events: Option<EventSender>,
}

impl<T: Send + Sync + 'static> PoolBuilder<T> {
    /// Replace all options at once
    #[must_use]
    pub fn options(mut self, options: impl IntoPoolOptions) -> Self {
        self.options = options.into_pool_options();
        self
    }

    #[must_use]
    pub fn fairness(mut self, fairness: Fairness) -> Self {
        self.options.fairness = fairness;
        self
    }

    #[must_use]
    pub fn default_lease(mut self, lease: Duration) -> Self {
        self.options.default_lease = lease;
        self
    }

    #[must_use]
    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.options.interruptible = interruptible;
        self
    }

    /// Report the pool's wait point to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn WaitObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn with_event_sender(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the pool
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Empty`] if no payloads were given.
    pub fn build(self) -> Result<ResourcePool<T>, Error> {
        if self.payloads.is_empty() {
            return Err(PoolError::Empty.into());
        }
        let resource_count = self.payloads.len();
        let permits = i64::try_from(resource_count).map_err(|_| {
            Error::internal(format!("{resource_count} resources exceed the permit range"))
        })?;

        let mut semaphore = Semaphore::new(permits, self.options.fairness);
        if let Some(observer) = self.observer {
            semaphore = semaphore.with_observer(observer);
        }

        let inner = Inner {
            id: Uuid::new_v4(),
            payloads: self.payloads.into_iter().map(Arc::new).collect(),
            semaphore,
            registry: Mutex::new(LeaseRegistry::new(resource_count)),
            options: self.options,
            events: self.events,
        };

        tracing::debug!(
            pool = %inner.id,
            resource_count,
            fair = inner.options.fairness.is_fair(),
            "resource pool created"
        );
        inner.emit_pool(PoolEvent::Created {
            pool_id: inner.id.to_string(),
            resource_count,
            fair: inner.options.fairness.is_fair(),
        });

        Ok(ResourcePool {
            inner: Arc::new(inner),
        })
    }
}

impl<T: Send + Sync + 'static> ResourcePool<T> {
    /// Start building a pool over `payloads`
    #[must_use]
    pub fn builder(payloads: Vec<T>) -> PoolBuilder<T> {
        PoolBuilder {
            payloads,
            options: PoolOptions::default(),
            observer: None,
            events: None,
        }
    }

    /// Create a pool over `payloads`
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Empty`] if no payloads were given.
    pub fn new(payloads: Vec<T>, options: impl IntoPoolOptions) -> Result<Self, Error> {
        Self::builder(payloads).options(options).build()
    }

    /// Create a pool of `config.resource_count` payloads made by `factory`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn from_config<F>(config: &PoolConfig, mut factory: F) -> Result<Self, Error>
    where
        F: FnMut(ResourceId) -> T,
    {
        config.validate()?;
        let payloads = (0..config.resource_count)
            .map(|index| factory(ResourceId::new(index)))
            .collect();
        Self::new(payloads, config)
    }

    /// Identity of this pool, as carried by its leases and events
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.inner.payloads.len()
    }

    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    /// Lease a resource for the pool's default lease duration
    ///
    /// # Errors
    ///
    /// See [`ResourcePool::acquire_for`].
    pub async fn acquire(
        &self,
        caller: &Caller,
        holder: Arc<dyn LeaseHolder>,
    ) -> Result<Lease<T>, Error> {
        self.acquire_for(caller, holder, self.inner.options.default_lease)
            .await
    }

    /// Lease a resource for `lease`, waiting until one is free.
    ///
    /// When the lease runs out the resource is taken back and
    /// `holder.lease_expired` is called.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if the pool is interruptible and `caller` is
    ///   interrupted before a resource is granted.
    /// - [`PoolError::InvalidLease`] for a zero or unrepresentable lease.
    /// - [`PoolError::TimerUnavailable`] outside a tokio runtime.
    /// - [`PoolError::NoFreeResource`] if the registry and the semaphore
    ///   disagree. The permit has been returned.
    pub async fn acquire_for(
        &self,
        caller: &Caller,
        holder: Arc<dyn LeaseHolder>,
        lease: Duration,
    ) -> Result<Lease<T>, Error> {
        let timers = timer_handle()?;
        lease_deadline(Instant::now(), lease)?;

        if self.inner.options.interruptible {
            if let Err(err) = self.inner.semaphore.acquire(caller).await {
                tracing::debug!(pool = %self.inner.id, caller = %caller.id(), "acquire cancelled");
                self.inner.emit_pool(PoolEvent::AcquireCancelled {
                    pool_id: self.inner.id.to_string(),
                    caller: caller.id().to_string(),
                });
                return Err(err);
            }
        } else {
            self.inner.semaphore.acquire_uninterruptibly(caller).await;
        }

        self.grant(&timers, caller.id(), holder, lease)
    }

    /// Lease a resource only if one is free right now
    ///
    /// # Errors
    ///
    /// Same as [`ResourcePool::acquire_for`], except it never waits and so
    /// is never cancelled.
    pub fn try_acquire_for(
        &self,
        caller: &Caller,
        holder: Arc<dyn LeaseHolder>,
        lease: Duration,
    ) -> Result<Option<Lease<T>>, Error> {
        let timers = timer_handle()?;
        lease_deadline(Instant::now(), lease)?;

        if !self.inner.semaphore.try_acquire() {
            return Ok(None);
        }
        self.grant(&timers, caller.id(), holder, lease).map(Some)
    }

    /// Claim a slot for a caller that already holds a permit
    fn grant(
        &self,
        timers: &Handle,
        caller: CallerId,
        holder: Arc<dyn LeaseHolder>,
        lease: Duration,
    ) -> Result<Lease<T>, Error> {
        let inner = &self.inner;
        let now = Instant::now();
        let expires_at = match lease_deadline(now, lease) {
            Ok(expires_at) => expires_at,
            Err(err) => {
                inner.semaphore.release();
                return Err(err.into());
            }
        };

        let mut registry = inner.lock_registry();
        let Some(claim) = registry.claim(now, expires_at, caller, holder) else {
            drop(registry);
            inner.semaphore.release();

            let resource_count = inner.payloads.len();
            tracing::error!(
                pool = %inner.id,
                resource_count,
                "permit granted but every resource is leased"
            );
            inner.emit_pool(PoolEvent::InvariantViolated {
                pool_id: inner.id.to_string(),
                message: format!("no free resource among {resource_count} despite a permit"),
            });
            return Err(PoolError::NoFreeResource { resource_count }.into());
        };

        let weak = Arc::downgrade(inner);
        let timer = timers.spawn(async move {
            tokio::time::sleep_until(claim.expires_at).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(claim.id, claim.generation);
            }
        });
        let attached = registry.attach_timer(claim.id, claim.generation, timer.abort_handle());
        debug_assert!(attached, "claim ended before its timer was attached");
        drop(registry);

        tracing::debug!(
            pool = %inner.id,
            resource = %claim.id,
            generation = claim.generation,
            %caller,
            "lease granted"
        );
        inner.emit_pool(PoolEvent::LeaseGranted {
            pool_id: inner.id.to_string(),
            resource: claim.id.index(),
            generation: claim.generation,
            caller: caller.to_string(),
            lease,
        });

        Ok(Lease {
            pool_id: inner.id,
            id: claim.id,
            generation: claim.generation,
            resource: Arc::clone(&inner.payloads[claim.id.index()]),
        })
    }

    /// Return a lease to the pool.
    ///
    /// Returns whether this call ended the lease. `None`, and a lease that
    /// its timer already reclaimed, are no-ops.
    ///
    /// # Panics
    ///
    /// In debug builds, if the lease belongs to another pool or its
    /// resource was never leased under that generation.
    #[must_use = "returns false if the lease had already been reclaimed"]
    pub fn release(&self, lease: impl Into<Option<Lease<T>>>) -> bool {
        let Some(lease) = lease.into() else {
            return false;
        };
        let inner = &self.inner;
        debug_assert_eq!(lease.pool_id, inner.id, "lease released to the wrong pool");
        if lease.pool_id != inner.id {
            inner.emit_warning_with_context(
                "lease released to the wrong pool",
                format!("lease pool {}, this pool {}", lease.pool_id, inner.id),
            );
            return false;
        }

        let outcome = inner
            .lock_registry()
            .release(lease.id, lease.generation, Instant::now());
        debug_assert_ne!(
            outcome,
            ReleaseOutcome::NotLeased,
            "resource {} was not leased under generation {}",
            lease.id,
            lease.generation
        );
        match outcome {
            ReleaseOutcome::Released { held } => {
                inner.semaphore.release();
                tracing::debug!(
                    pool = %inner.id,
                    resource = %lease.id,
                    generation = lease.generation,
                    held_ms = u64::try_from(held.as_millis()).unwrap_or(u64::MAX),
                    "lease released"
                );
                inner.emit_pool(PoolEvent::LeaseReleased {
                    pool_id: inner.id.to_string(),
                    resource: lease.id.index(),
                    generation: lease.generation,
                    held,
                });
                true
            }
            ReleaseOutcome::Reclaimed | ReleaseOutcome::Superseded => {
                tracing::trace!(
                    pool = %inner.id,
                    resource = %lease.id,
                    generation = lease.generation,
                    "lease already reclaimed"
                );
                false
            }
            ReleaseOutcome::NotLeased => {
                inner.emit_warning_with_context(
                    "released a resource that was not leased",
                    format!("resource {} generation {}", lease.id, lease.generation),
                );
                false
            }
        }
    }

    /// Time left before `lease` expires, zero once it has ended
    #[must_use]
    pub fn remaining_time(&self, lease: &Lease<T>) -> Duration {
        if lease.pool_id != self.inner.id {
            return Duration::ZERO;
        }
        self.inner
            .lock_registry()
            .remaining(lease.id, lease.generation, Instant::now())
    }

    #[must_use]
    pub fn is_leased(&self, id: ResourceId) -> bool {
        self.inner.lock_registry().is_leased(id)
    }

    /// Current generation of `id`, `None` if the pool has no such resource
    #[must_use]
    pub fn generation(&self, id: ResourceId) -> Option<u64> {
        self.inner.lock_registry().generation(id)
    }

    #[must_use]
    pub fn availability(&self) -> PoolAvailability {
        let outstanding_leases = self.inner.lock_registry().outstanding();
        PoolAvailability {
            resource_count: self.inner.payloads.len(),
            available_permits: self.inner.semaphore.available_permits(),
            outstanding_leases,
            queued_waiters: self.inner.semaphore.queued_waiters(),
        }
    }
}

fn timer_handle() -> Result<Handle, PoolError> {
    Handle::try_current().map_err(|err| PoolError::TimerUnavailable {
        message: err.to_string(),
    })
}

fn lease_deadline(now: Instant, lease: Duration) -> Result<Instant, PoolError> {
    if lease.is_zero() {
        return Err(PoolError::InvalidLease {
            message: "lease must be longer than zero".to_string(),
        });
    }
    now.checked_add(lease).ok_or_else(|| PoolError::InvalidLease {
        message: format!("{lease:?} is too far in the future"),
    })
}
