//! harvester - distributed crawl scheduler
//!
//! Schedules paginated crawl work across any number of worker processes that
//! share a PostgreSQL task store and a Redis coordination store.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`clock`] - Microsecond time source, real or manual
//! - [`models`] - Tasks, sessions and crawl targets
//! - [`coordination`] - Distributed mutex and bounded admission sets
//! - [`storage`] - Task, session and entity repositories
//! - [`fetch`] - Boundary to the remote fetch capability
//! - [`scheduler`] - Process, flush, apply and seed operations
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use harvester::clock::SystemClock;
//! use harvester::config::Config;
//! use harvester::coordination::RedisCoordinator;
//! use harvester::fetch::RemoteFetcher;
//! use harvester::scheduler::{CrawlScheduler, SchedulerDeps, TaskFamily};
//! use harvester::storage::{self, PostgresEntityRepository, PostgresSessionRepository, PostgresTaskRepository};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let pool = storage::create_pool(&config.database)?;
//!     let deps = SchedulerDeps {
//!         tasks: Arc::new(PostgresTaskRepository::new(pool.clone())),
//!         sessions: Arc::new(PostgresSessionRepository::new(pool.clone())),
//!         entities: Arc::new(PostgresEntityRepository::new(pool)),
//!         fetcher: Arc::new(RemoteFetcher::new(&config.fetcher)?),
//!         coordinator: Arc::new(RedisCoordinator::new(&config.redis).await?),
//!         clock: Arc::new(SystemClock),
//!     };
//!     let scheduler = CrawlScheduler::new(config.scheduler.clone(), deps);
//!     scheduler.process(&TaskFamily::POSTS, 5).await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod coordination;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, Micros, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{ErrorCategory, HarvestErrorTrait};
    pub use crate::models::{Session, SessionStatus, Task, TaskAction, TaskParams, TaskStatus};
    pub use crate::scheduler::{CrawlScheduler, SchedulerDeps, TaskFamily, TaskOutcome, TickReport};
}

// Direct re-exports for convenience
pub use models::{Task, TaskAction, TaskStatus};
