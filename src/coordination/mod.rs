//! Cross-process coordination primitives
//!
//! Workers never talk to each other directly. Everything that must be agreed
//! on between processes goes through a [`CoordinationStore`]:
//!
//! - [`DistributedMutex`]: per-task lease locks (`SET NX PX` + scripted
//!   check-and-delete)
//! - [`AdmissionSet`]: the capacity-bounded ranked set of task ids a family is
//!   currently working through
//!
//! # Backends
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   DistributedMutex        AdmissionSet       │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │            CoordinationStore trait           │
//! └──────────────────────────────────────────────┘
//!           │                          │
//!           ▼                          ▼
//! ┌───────────────────┐      ┌───────────────────┐
//! │ RedisCoordinator  │      │ MemoryCoordinator │
//! │  (deadpool-redis) │      │  (tests, single   │
//! │                   │      │   process runs)   │
//! └───────────────────┘      └───────────────────┘
//! ```

pub mod admission;
pub mod memory;
pub mod mutex;
pub mod redis;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::{ErrorCategory, HarvestErrorTrait};

pub use admission::{AdmissionPlan, AdmissionSet};
pub use memory::MemoryCoordinator;
pub use mutex::DistributedMutex;
pub use self::redis::RedisCoordinator;

/// Coordination store failures
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Could not obtain a connection
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Command failed on the backend
    #[error("backend error: {0}")]
    Backend(String),
}

impl HarvestErrorTrait for CoordinationError {
    fn is_recoverable(&self) -> bool {
        true
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Coordination
    }
}

impl From<::redis::RedisError> for CoordinationError {
    fn from(err: ::redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for CoordinationError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

/// Result type for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Shared key-value store with atomic conditional writes and ranked sets
///
/// Scores are microsecond timestamps stored as `f64`, which is exact for any
/// epoch time before the year 2255.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Set `key` to `value` only if absent, expiring after `ttl`
    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> CoordinationResult<bool>;

    /// Delete `key` only if it still holds `value`, atomically
    async fn compare_and_delete(&self, key: &str, value: &str) -> CoordinationResult<bool>;

    /// Add or update a ranked-set member
    async fn zadd(&self, key: &str, member: &str, score: f64) -> CoordinationResult<()>;

    /// Number of members in a ranked set
    async fn zcard(&self, key: &str) -> CoordinationResult<usize>;

    /// Score of a member, `None` if absent
    async fn zscore(&self, key: &str, member: &str) -> CoordinationResult<Option<f64>>;

    /// Members by rank, inclusive; negative indices count from the end
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> CoordinationResult<Vec<String>>;

    /// Remove a member; returns whether it was present
    async fn zrem(&self, key: &str, member: &str) -> CoordinationResult<bool>;
}

/// Thread-safe shared coordination store
pub type SharedCoordinator = Arc<dyn CoordinationStore>;
