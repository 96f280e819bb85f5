//! Lease bookkeeping for pooled resources
//!
//! Each resource has a slot holding its generation count and its current
//! [`LeaseState`]. The generation is bumped on every grant; release and
//! expiration both name the generation they refer to, so whichever of the
//! two arrives second finds a mismatch (or a free slot) and does nothing.
//!
//! The registry itself is not synchronized. The pool keeps it behind one
//! mutex and never holds that mutex across an `.await`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use leasehold_sync::CallerId;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::LeaseHolder;

/// Index of a resource within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(usize);

impl ResourceId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Live lease on one resource
pub struct ActiveLease {
    generation: u64,
    caller: CallerId,
    granted_at: Instant,
    expires_at: Instant,
    timer: Option<AbortHandle>,
    holder: Arc<dyn LeaseHolder>,
}

impl ActiveLease {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn caller(&self) -> CallerId {
        self.caller
    }

    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    #[must_use]
    pub fn holder(&self) -> &Arc<dyn LeaseHolder> {
        &self.holder
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl fmt::Debug for ActiveLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveLease")
            .field("generation", &self.generation)
            .field("caller", &self.caller)
            .field("expires_at", &self.expires_at)
            .field("timer", &self.timer.is_some())
            .finish_non_exhaustive()
    }
}

/// Lease state of one resource
#[derive(Debug, Default)]
pub enum LeaseState {
    /// Free to be claimed
    #[default]
    NotInUse,
    Leased(ActiveLease),
}

impl LeaseState {
    #[must_use]
    pub fn is_leased(&self) -> bool {
        matches!(self, Self::Leased(_))
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    state: LeaseState,
    /// Last generation taken back by its expiration timer
    reclaimed: Option<u64>,
}

/// A freshly claimed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub id: ResourceId,
    pub generation: u64,
    pub expires_at: Instant,
}

/// Result of returning a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The lease was live and is now ended
    Released { held: Duration },
    /// The expiration timer already took the resource back
    Reclaimed,
    /// The resource was reclaimed and has since been leased again
    Superseded,
    /// The resource was not leased under that generation at all
    NotLeased,
}

/// Slot table for a fixed set of resources
#[derive(Debug)]
pub struct LeaseRegistry {
    slots: Vec<Slot>,
}

impl LeaseRegistry {
    /// Create a registry with `resource_count` free slots
    #[must_use]
    pub fn new(resource_count: usize) -> Self {
        Self {
            slots: (0..resource_count).map(|_| Slot::default()).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of resources currently leased
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.slots.iter().filter(|s| s.state.is_leased()).count()
    }

    #[must_use]
    pub fn state(&self, id: ResourceId) -> Option<&LeaseState> {
        self.slots.get(id.0).map(|s| &s.state)
    }

    #[must_use]
    pub fn generation(&self, id: ResourceId) -> Option<u64> {
        self.slots.get(id.0).map(|s| s.generation)
    }

    #[must_use]
    pub fn is_leased(&self, id: ResourceId) -> bool {
        self.state(id).is_some_and(LeaseState::is_leased)
    }

    /// Lease the first free resource.
    ///
    /// Returns `None` when every resource is leased, which a caller holding
    /// a semaphore permit should never see.
    #[must_use]
    pub fn claim(
        &mut self,
        now: Instant,
        expires_at: Instant,
        caller: CallerId,
        holder: Arc<dyn LeaseHolder>,
    ) -> Option<Claim> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.state.is_leased())?;

        slot.generation += 1;
        slot.state = LeaseState::Leased(ActiveLease {
            generation: slot.generation,
            caller,
            granted_at: now,
            expires_at,
            timer: None,
            holder,
        });

        Some(Claim {
            id: ResourceId(index),
            generation: slot.generation,
            expires_at,
        })
    }

    /// Abort the expiration timer of every live lease
    pub fn cancel_timers(&mut self) {
        for slot in &mut self.slots {
            if let LeaseState::Leased(active) = &mut slot.state {
                active.cancel_timer();
            }
        }
    }

    /// Remember the expiration timer of a claim so release can cancel it.
    ///
    /// If the claim is no longer live the timer is aborted at once.
    #[must_use]
    pub fn attach_timer(&mut self, id: ResourceId, generation: u64, timer: AbortHandle) -> bool {
        match self.slots.get_mut(id.0).map(|s| &mut s.state) {
            Some(LeaseState::Leased(active)) if active.generation == generation => {
                active.timer = Some(timer);
                true
            }
            _ => {
                timer.abort();
                false
            }
        }
    }

    /// End the lease `generation` of `id` on behalf of its holder
    #[must_use]
    pub fn release(&mut self, id: ResourceId, generation: u64, now: Instant) -> ReleaseOutcome {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return ReleaseOutcome::NotLeased;
        };
        if slot.generation > generation {
            return ReleaseOutcome::Superseded;
        }
        if slot.generation < generation {
            return ReleaseOutcome::NotLeased;
        }

        match std::mem::take(&mut slot.state) {
            LeaseState::Leased(mut active) => {
                active.cancel_timer();
                ReleaseOutcome::Released {
                    held: now.saturating_duration_since(active.granted_at),
                }
            }
            LeaseState::NotInUse if slot.reclaimed == Some(generation) => {
                ReleaseOutcome::Reclaimed
            }
            LeaseState::NotInUse => ReleaseOutcome::NotLeased,
        }
    }

    /// Take back the lease `generation` of `id` when its timer fires.
    ///
    /// Returns `None` for a stale timer: the lease was released, or the
    /// resource now belongs to a later generation.
    #[must_use]
    pub fn expire(&mut self, id: ResourceId, generation: u64) -> Option<ActiveLease> {
        let slot = self.slots.get_mut(id.0)?;
        let live = matches!(&slot.state, LeaseState::Leased(a) if a.generation == generation);
        if !live {
            return None;
        }

        slot.reclaimed = Some(generation);
        match std::mem::take(&mut slot.state) {
            LeaseState::Leased(mut active) => {
                // Dropping the handle is enough; this runs on the timer task.
                active.timer = None;
                Some(active)
            }
            LeaseState::NotInUse => None,
        }
    }

    /// Time left on lease `generation` of `id`, zero if it is not live
    #[must_use]
    pub fn remaining(&self, id: ResourceId, generation: u64, now: Instant) -> Duration {
        match self.state(id) {
            Some(LeaseState::Leased(active)) if active.generation == generation => {
                active.expires_at.saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        }
    }
}
