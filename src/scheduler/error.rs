//! Error types for the scheduler module

use std::fmt;

use crate::coordination::CoordinationError;
use crate::error::{ErrorCategory, HarvestErrorTrait};

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Coordination store unreachable or failing
    Coordination {
        operation: String,
        reason: String,
    },

    /// Task, session or entity store failure
    Store {
        operation: String,
        reason: String,
    },

    /// No usable session in the pool the family needs
    NoSession {
        family: String,
    },

    /// Task params do not name the target the family expects
    InvalidParams {
        task_id: String,
        reason: String,
    },

    /// Family name not recognised
    UnknownFamily {
        name: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordination { operation, reason } => {
                write!(f, "Coordination error during '{}': {}", operation, reason)
            }
            Self::Store { operation, reason } => {
                write!(f, "Store error during '{}': {}", operation, reason)
            }
            Self::NoSession { family } => {
                write!(f, "No usable session for family '{}'", family)
            }
            Self::InvalidParams { task_id, reason } => {
                write!(f, "Invalid params for task '{}': {}", task_id, reason)
            }
            Self::UnknownFamily { name } => {
                write!(
                    f,
                    "Unknown task family '{}'. Valid options: posts, replies, users:posts",
                    name
                )
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<CoordinationError> for SchedulerError {
    fn from(err: CoordinationError) -> Self {
        Self::Coordination {
            operation: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store {
            operation: "unknown".to_string(),
            reason: format!("{err:#}"),
        }
    }
}

impl SchedulerError {
    /// Create a coordination error with context
    pub fn coordination(operation: impl Into<String>, err: CoordinationError) -> Self {
        Self::Coordination {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }

    /// Create a store error with context
    pub fn store(operation: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: format!("{err:#}"),
        }
    }

    /// Create an invalid params error
    pub fn invalid_params(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            task_id: task_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown family error
    pub fn unknown_family(name: impl Into<String>) -> Self {
        Self::UnknownFamily { name: name.into() }
    }
}

impl HarvestErrorTrait for SchedulerError {
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Coordination { .. } | Self::Store { .. } | Self::NoSession { .. }
        )
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Coordination { .. } => ErrorCategory::Coordination,
            Self::Store { .. } => ErrorCategory::Storage,
            Self::NoSession { .. } => ErrorCategory::Credential,
            Self::InvalidParams { .. } | Self::UnknownFamily { .. } => ErrorCategory::Scheduler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_family_lists_options() {
        let err = SchedulerError::unknown_family("media");
        assert!(err.to_string().contains("media"));
        assert!(err.to_string().contains("replies"));
    }

    #[test]
    fn test_is_recoverable() {
        let err = SchedulerError::coordination("zcard", CoordinationError::Pool("timeout".into()));
        assert!(err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Coordination);

        let err = SchedulerError::invalid_params("t1", "expected user_id");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_from_anyhow_keeps_chain() {
        let err: SchedulerError = anyhow::anyhow!("connection reset")
            .context("Failed to rank tasks")
            .into();
        assert!(matches!(err, SchedulerError::Store { .. }));
        assert!(err.to_string().contains("connection reset"));
    }
}
