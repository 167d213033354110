//! Error classification shared by the harvester subsystems
//!
//! Each subsystem owns a focused error type ([`SchedulerError`],
//! [`FetchError`], [`CoordinationError`]). They all implement
//! [`HarvestErrorTrait`] so the scheduler can log and count failures by
//! [`ErrorCategory`] without matching on every concrete variant.
//!
//! # Usage
//!
//! ```rust,ignore
//! use harvester::error::HarvestErrorTrait;
//!
//! fn report(err: &impl HarvestErrorTrait) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = err.category().as_str(), "retrying next tick: {err}");
//!     } else {
//!         tracing::error!(category = err.category().as_str(), "fatal: {err}");
//!     }
//! }
//! ```

// Re-export domain-specific errors for convenience
pub use crate::coordination::CoordinationError;
pub use crate::fetch::FetchError;
pub use crate::scheduler::error::SchedulerError;

/// Common trait for all harvester error types
pub trait HarvestErrorTrait: std::error::Error {
    /// Check if this error is recoverable (the next tick may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Lock store or ranked-set failures
    Coordination,
    /// Durable store and I/O errors
    Storage,
    /// Transport errors talking to the remote service
    Network,
    /// Session rejected or throttled
    Credential,
    /// Scheduler bookkeeping errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordination => "coordination",
            Self::Storage => "storage",
            Self::Network => "network",
            Self::Credential => "credential",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}
