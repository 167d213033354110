//! Durable storage for tasks, sessions and crawl targets
//!
//! Every table is reached through a repository trait so the scheduler can run
//! against PostgreSQL in production and the in-memory `Mock*` implementations
//! in tests.

pub mod entities;
pub mod sessions;
pub mod tasks;

use anyhow::{Context, Result};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::config::DatabaseConfig;

pub use entities::{
    EntityRepository, MockEntityRepository, PostgresEntityRepository, SharedEntityRepository,
};
pub use sessions::{
    MockSessionRepository, NewSession, PostgresSessionRepository, SessionRepository,
    SessionUpdate, SharedSessionRepository,
};
pub use tasks::{
    ApplyOutcome, MockTaskRepository, PostgresTaskRepository, RankQuery, SharedTaskRepository,
    SortDirection, SortField, StatusFilter, TaskRepository, TaskUpdate,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    action INTEGER NOT NULL,
    params JSONB NOT NULL,
    timestamp BIGINT NOT NULL DEFAULT 0,
    status INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_tasks_schedule
    ON tasks(action, status, timestamp);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    account TEXT NOT NULL UNIQUE,
    node INTEGER NOT NULL,
    agent TEXT NOT NULL,
    cookie TEXT NOT NULL,
    slot INTEGER NOT NULL DEFAULT 0,
    data JSONB NOT NULL DEFAULT '{}',
    unblocked_at BIGINT NOT NULL DEFAULT 0,
    timestamp BIGINT NOT NULL DEFAULT 0,
    status INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_sessions_rotation
    ON sessions(node, status, timestamp);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    account TEXT NOT NULL,
    remote_id BIGINT NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    remote_id BIGINT NOT NULL UNIQUE,
    timestamp BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_posts_user
    ON posts(user_id, timestamp);

CREATE TABLE IF NOT EXISTS replies (
    id TEXT PRIMARY KEY,
    post_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    remote_id BIGINT NOT NULL UNIQUE,
    status INTEGER NOT NULL DEFAULT 1,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_replies_user
    ON replies(user_id, status);
"#;

/// Create the PostgreSQL connection pool
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool> {
    let mut cfg = PoolConfig::new();
    cfg.url = Some(config.url.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.pool_size));

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .context("Failed to create PostgreSQL connection pool")
}

/// Create tables and indexes if they do not exist
pub async fn migrate(pool: &Pool) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get PostgreSQL connection")?;

    client
        .batch_execute(SCHEMA)
        .await
        .context("Failed to create schema")?;

    tracing::info!("Database schema is up to date");
    Ok(())
}

/// Generate a new row id
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_is_unique() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_create_pool_is_lazy() {
        // No connection is attempted until the first checkout
        let pool = create_pool(&DatabaseConfig::default());
        assert!(pool.is_ok());
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL"]
    async fn test_migrate_is_idempotent() {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/harvester_test".into()),
            pool_size: 2,
        };
        let pool = create_pool(&config).unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
    }
}
