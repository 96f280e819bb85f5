use serde::{Deserialize, Serialize};

use crate::EventSource;

pub mod general;
pub mod pool;

pub use general::*;
pub use pool::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Pool-wide warnings and errors
    General(GeneralEvent),

    /// Resource pool events (grants, releases, expirations)
    Pool(PoolEvent),
}

impl AppEvent {
    /// Identify the source domain for this event (used for metadata/logging).
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::GENERAL,
            Self::Pool(_) => EventSource::POOL,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::General(GeneralEvent::Error { .. })
            | Self::Pool(PoolEvent::InvariantViolated { .. }) => Level::ERROR,

            Self::General(GeneralEvent::Warning { .. })
            | Self::Pool(PoolEvent::LeaseExpired { .. }) => Level::WARN,

            Self::Pool(
                PoolEvent::LeaseGranted { .. }
                | PoolEvent::LeaseReleased { .. }
                | PoolEvent::AcquireCancelled { .. },
            ) => Level::DEBUG,

            Self::Pool(PoolEvent::Created { .. }) => Level::INFO,
        }
    }

    /// Get the log target for this event (for structured logging)
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "leasehold::events::general",
            Self::Pool(_) => "leasehold::events::pool",
        }
    }
}
