//! Distributed crawl scheduling
//!
//! Any number of worker processes run ticks against the same task store and
//! coordination store. Nothing is assigned up front: each worker ranks the
//! eligible tasks of a family and competes for a per-task lock, so a task is
//! handled by at most one worker at a time and everything else is skipped.
//!
//! # Overview
//!
//! - **Admission control**: a capacity-bounded ranked set per family keeps a
//!   working set of tasks paginating until they finish, instead of spreading
//!   every tick over all eligible tasks
//! - **Minimum poll interval**: a task touched recently is skipped even when
//!   selected, bounding the remote call rate per task
//! - **Cursor continuation**: resumption tokens are stored per session account
//!   inside the task params; an empty token exhausts the task
//! - **Stall guard**: low-yield pages advance the cursor but hold back the
//!   admission score until the stall timeout has passed
//! - **Session backoff**: rejected credentials leave rotation, throttled ones
//!   cool down and are refused without a network call
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        CrawlScheduler                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────┐   │
//! │  │ AdmissionSet │  │ SessionPool  │  │    StallGuard     │   │
//! │  └──────┬───────┘  └──────┬───────┘  └───────────────────┘   │
//! └─────────┼─────────────────┼──────────────────────────────────┘
//!           │                 │
//!    ┌──────▼──────┐   ┌──────▼──────┐   ┌──────────────┐
//!    │    Redis    │   │  PostgreSQL │   │   Fetcher    │
//!    │ locks, sets │   │ tasks, etc. │   │ (remote API) │
//!    └─────────────┘   └─────────────┘   └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`family`] - Task family constants and coordination key layout
//! - [`cursor`] - Page outcome rules and the stall guard
//! - [`session_pool`] - Session selection, touch and backoff
//! - [`runner`] - Process, flush, apply and seed operations
//!
//! # Quick Start
//!
//! ```ignore
//! use harvester::scheduler::{CrawlScheduler, SchedulerDeps, TaskFamily};
//!
//! let scheduler = CrawlScheduler::new(config.scheduler.clone(), deps);
//!
//! scheduler.apply_replies("post-id").await?;
//!
//! let report = scheduler.process(&TaskFamily::REPLIES, 30).await?;
//! println!("advanced {} exhausted {}", report.advanced, report.exhausted);
//! ```

pub mod cursor;
pub mod error;
pub mod family;
pub mod runner;
pub mod session_pool;

pub use cursor::{CursorStep, StallGuard};
pub use error::{SchedulerError, SchedulerResult};
pub use family::{TargetKind, TaskFamily};
pub use runner::{CrawlScheduler, SchedulerDeps, SessionFailureKind, TaskOutcome, TickReport};
pub use session_pool::{SessionHealth, SessionPool};
