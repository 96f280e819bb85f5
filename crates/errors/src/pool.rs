//! Resource pool and semaphore error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// A permit was granted but every slot was already leased. This means the
    /// permit count and the lease registry disagree.
    #[error("no free resource despite a granted permit ({resource_count} resources)")]
    NoFreeResource { resource_count: usize },

    /// Expiration timers need a tokio runtime with the time driver enabled.
    #[error("lease timer unavailable: {message}")]
    TimerUnavailable { message: String },

    #[error("pool has no resources")]
    Empty,

    #[error("invalid lease duration: {message}")]
    InvalidLease { message: String },
}

impl UserFacingError for PoolError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::TimerUnavailable { .. } => {
                Some("Call the pool from inside a tokio runtime with time enabled.")
            }
            Self::Empty => Some("Construct the pool with at least one resource."),
            Self::InvalidLease { .. } => Some("Use a non-zero lease duration."),
            Self::NoFreeResource { .. } => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NoFreeResource { .. } => "pool.no_free_resource",
            Self::TimerUnavailable { .. } => "pool.timer_unavailable",
            Self::Empty => "pool.empty",
            Self::InvalidLease { .. } => "pool.invalid_lease",
        };
        Some(code)
    }
}
