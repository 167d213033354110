pub mod cron;
pub mod db;
pub mod sessions;
pub mod tasks;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use harvester::clock::SystemClock;
use harvester::config::Config;
use harvester::coordination::RedisCoordinator;
use harvester::fetch::RemoteFetcher;
use harvester::scheduler::{CrawlScheduler, SchedulerDeps};
use harvester::storage::{
    self, PostgresEntityRepository, PostgresSessionRepository, PostgresTaskRepository,
};

// Re-export command functions for convenience
pub use cron::{cron, CronParams};
pub use db::migrate;
pub use sessions::{apply_session, current_session, list_sessions};
pub use tasks::{apply_task, count_tasks, flush, process, process_task, seed_replies};

/// Load configuration from a TOML file, or from the environment
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

/// Connect every backend and build the scheduler
pub async fn connect(config: &Config) -> Result<CrawlScheduler> {
    let pool = storage::create_pool(&config.database)?;
    let coordinator = RedisCoordinator::new(&config.redis)
        .await
        .context("Failed to connect to the coordination store")?;
    let fetcher = RemoteFetcher::new(&config.fetcher).context("Failed to create fetcher")?;

    let deps = SchedulerDeps {
        tasks: Arc::new(PostgresTaskRepository::new(pool.clone())),
        sessions: Arc::new(PostgresSessionRepository::new(pool.clone())),
        entities: Arc::new(PostgresEntityRepository::new(pool)),
        fetcher: Arc::new(fetcher),
        coordinator: Arc::new(coordinator),
        clock: Arc::new(SystemClock),
    };

    Ok(CrawlScheduler::new(config.scheduler.clone(), deps))
}
