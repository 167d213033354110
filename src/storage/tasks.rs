//! Task store
//!
//! Tasks are deduplicated by `name`. `apply` is the only way rows are created
//! and is safe to repeat; the scheduler mutates rows exclusively through
//! [`TaskUpdate`] while holding the task's lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use super::new_id;
use crate::clock::Micros;
use crate::models::{Task, TaskAction, TaskParams, TaskStatus};

// ============================================================================
// Core Types
// ============================================================================

/// What `apply` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new row was inserted
    Created(String),
    /// An existing terminal row was reset to pending
    Reactivated(String),
    /// An existing eligible row was left alone
    Unchanged(String),
}

impl ApplyOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Reactivated(id) | Self::Unchanged(id) => id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Reactivated(_) => "reactivated",
            Self::Unchanged(_) => "unchanged",
        }
    }
}

/// Status condition for listing queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StatusFilter {
    /// Pending work only
    #[default]
    Default,
    Is(TaskStatus),
    AnyOf(Vec<TaskStatus>),
}

impl StatusFilter {
    pub fn matches(&self, status: TaskStatus) -> bool {
        match self {
            Self::Default => status == TaskStatus::Pending,
            Self::Is(expected) => status == *expected,
            Self::AnyOf(set) => set.contains(&status),
        }
    }

    fn codes(&self) -> Vec<i32> {
        match self {
            Self::Default => vec![TaskStatus::Pending.code()],
            Self::Is(status) => vec![status.code()],
            Self::AnyOf(set) => set.iter().map(TaskStatus::code).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Timestamp,
    CreatedAt,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Filtered, sorted task listing
///
/// The timestamp cutoff is one-sided and follows the sort direction:
/// ascending keeps rows after the cutoff, descending keeps rows before it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankQuery {
    pub action: Option<TaskAction>,
    pub ids: Option<Vec<String>>,
    pub timestamp_cutoff: Option<Micros>,
    pub status: StatusFilter,
    pub sort: SortField,
    pub direction: SortDirection,
    pub limit: usize,
}

impl RankQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn action(mut self, action: TaskAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn cutoff(mut self, timestamp: Micros) -> Self {
        self.timestamp_cutoff = Some(timestamp);
        self
    }

    pub fn status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn sort_by(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort = field;
        self.direction = direction;
        self
    }

    fn matches(&self, task: &Task) -> bool {
        if self.action.is_some_and(|action| task.action != action) {
            return false;
        }
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| *id == task.id) {
                return false;
            }
        }
        if let Some(cutoff) = self.timestamp_cutoff {
            let inside = match self.direction {
                SortDirection::Asc => task.timestamp > cutoff,
                SortDirection::Desc => task.timestamp < cutoff,
            };
            if !inside {
                return false;
            }
        }
        self.status.matches(task.status)
    }
}

/// Partial task mutation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub timestamp: Option<Micros>,
    pub params: Option<TaskParams>,
    pub status: Option<TaskStatus>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the last-activity time
    pub fn touch(mut self, timestamp: Micros) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn params(mut self, params: TaskParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_none() && self.params.is_none() && self.status.is_none()
    }

    fn apply_to(&self, task: &mut Task) {
        if let Some(timestamp) = self.timestamp {
            task.timestamp = timestamp;
        }
        if let Some(params) = &self.params {
            task.params = params.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        task.updated_at = Utc::now();
    }
}

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository for task rows
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Get task by ID
    ///
    /// Rows whose codes or params cannot be decoded are marked invalid and
    /// reported as missing, here and in `rank`.
    async fn find(&self, id: &str) -> Result<Option<Task>>;

    /// Create the task, or reset it to pending if it went terminal
    async fn apply(&self, name: &str, action: TaskAction, params: &TaskParams)
        -> Result<ApplyOutcome>;

    /// List tasks matching the query
    async fn rank(&self, query: &RankQuery) -> Result<Vec<Task>>;

    /// Apply a partial update; returns whether the row exists
    async fn update(&self, id: &str, update: &TaskUpdate) -> Result<bool>;

    /// Delete task by ID
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Count tasks by family and status
    async fn count(&self, action: Option<TaskAction>, status: &StatusFilter) -> Result<u64>;
}

// ============================================================================
// PostgreSQL Implementation
// ============================================================================

const TASK_COLUMNS: &str = "id, name, action, params, timestamp, status, created_at, updated_at";

/// PostgreSQL implementation of TaskRepository
pub struct PostgresTaskRepository {
    pool: Pool,
}

impl PostgresTaskRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .context("Failed to get PostgreSQL connection")
    }

    /// Decode rows and mark the malformed ones invalid so no tick selects them again
    async fn decode_or_invalidate(
        &self,
        client: &deadpool_postgres::Object,
        rows: &[Row],
    ) -> Result<Vec<Task>> {
        let stored = rows
            .iter()
            .map(StoredTask::from_row)
            .collect::<Result<Vec<_>>>()
            .context("Failed to read task row")?;
        let (tasks, malformed) = decode_rows(stored);

        if !malformed.is_empty() {
            if let Err(e) = client
                .execute(
                    "UPDATE tasks SET status = $2, updated_at = now() WHERE id = ANY($1)",
                    &[&malformed, &TaskStatus::Invalid.code()],
                )
                .await
            {
                tracing::warn!(count = malformed.len(), error = %e, "Failed to mark malformed tasks invalid");
            }
        }
        Ok(tasks)
    }
}

/// Task row before its codes and params are decoded
#[derive(Debug, Clone)]
struct StoredTask {
    id: String,
    name: String,
    action: i32,
    params: serde_json::Value,
    timestamp: Micros,
    status: i32,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl StoredTask {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            action: row.try_get("action")?,
            params: row.try_get("params")?,
            timestamp: row.try_get("timestamp")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn decode(self) -> Result<Task> {
        let id = self.id;
        Ok(Task {
            action: TaskAction::from_code(self.action)
                .ok_or_else(|| anyhow!("task {id} has unknown action {}", self.action))?,
            status: TaskStatus::from_code(self.status)
                .ok_or_else(|| anyhow!("task {id} has unknown status {}", self.status))?,
            params: TaskParams::from_json(self.params)
                .with_context(|| format!("task {id} has malformed params"))?,
            name: self.name,
            timestamp: self.timestamp,
            created_at: self.created_at,
            updated_at: self.updated_at,
            id,
        })
    }
}

/// Decode rows one by one; returns the tasks and the ids of rows that failed
fn decode_rows(rows: Vec<StoredTask>) -> (Vec<Task>, Vec<String>) {
    let mut tasks = Vec::with_capacity(rows.len());
    let mut malformed = Vec::new();
    for row in rows {
        let id = row.id.clone();
        match row.decode() {
            Ok(task) => tasks.push(task),
            Err(e) => {
                tracing::warn!(task_id = %id, error = %format!("{e:#}"), "Skipping malformed task row");
                malformed.push(id);
            }
        }
    }
    (tasks, malformed)
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn find(&self, id: &str) -> Result<Option<Task>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"),
                &[&id],
            )
            .await
            .context("Failed to load task")?;
        Ok(self.decode_or_invalidate(&client, &rows).await?.pop())
    }

    async fn apply(
        &self,
        name: &str,
        action: TaskAction,
        params: &TaskParams,
    ) -> Result<ApplyOutcome> {
        let client = self.client().await?;
        let id = new_id();
        let params = params.to_json()?;

        let row = client
            .query_opt(
                "INSERT INTO tasks (id, name, action, params, timestamp, status)
                 VALUES ($1, $2, $3, $4, 0, $5)
                 ON CONFLICT (name) DO UPDATE
                    SET status = EXCLUDED.status, updated_at = now()
                    WHERE tasks.status NOT IN (1, 2)
                 RETURNING id, (xmax = 0) AS inserted",
                &[&id, &name, &action.code(), &params, &TaskStatus::Pending.code()],
            )
            .await
            .context("Failed to apply task")?;

        match row {
            Some(row) => {
                let id: String = row.try_get("id")?;
                let inserted: bool = row.try_get("inserted")?;
                Ok(if inserted {
                    ApplyOutcome::Created(id)
                } else {
                    ApplyOutcome::Reactivated(id)
                })
            }
            None => {
                let row = client
                    .query_one("SELECT id FROM tasks WHERE name = $1", &[&name])
                    .await
                    .context("Failed to load existing task")?;
                Ok(ApplyOutcome::Unchanged(row.try_get("id")?))
            }
        }
    }

    async fn rank(&self, query: &RankQuery) -> Result<Vec<Task>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

        if let Some(action) = query.action {
            args.push(Box::new(action.code()));
            clauses.push(format!("action = ${}", args.len()));
        }
        if let Some(ids) = &query.ids {
            args.push(Box::new(ids.clone()));
            clauses.push(format!("id = ANY(${})", args.len()));
        }
        if let Some(cutoff) = query.timestamp_cutoff {
            args.push(Box::new(cutoff));
            let op = match query.direction {
                SortDirection::Asc => ">",
                SortDirection::Desc => "<",
            };
            clauses.push(format!("timestamp {op} ${}", args.len()));
        }
        args.push(Box::new(query.status.codes()));
        clauses.push(format!("status = ANY(${})", args.len()));

        let direction = match query.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        args.push(Box::new(i64::try_from(query.limit).unwrap_or(i64::MAX)));
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE {} ORDER BY {} {direction}, id LIMIT ${}",
            clauses.join(" AND "),
            query.sort.column(),
            args.len()
        );

        let refs: Vec<&(dyn ToSql + Sync)> = args
            .iter()
            .map(|arg| arg.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let client = self.client().await?;
        let rows = client
            .query(&sql, &refs)
            .await
            .context("Failed to rank tasks")?;
        self.decode_or_invalidate(&client, &rows).await
    }

    async fn update(&self, id: &str, update: &TaskUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(self.find(id).await?.is_some());
        }

        let mut sets: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn ToSql + Sync + Send>> = vec![Box::new(id.to_string())];

        if let Some(timestamp) = update.timestamp {
            args.push(Box::new(timestamp));
            sets.push(format!("timestamp = ${}", args.len()));
        }
        if let Some(params) = &update.params {
            args.push(Box::new(params.to_json()?));
            sets.push(format!("params = ${}", args.len()));
        }
        if let Some(status) = update.status {
            args.push(Box::new(status.code()));
            sets.push(format!("status = ${}", args.len()));
        }
        sets.push("updated_at = now()".to_string());

        let sql = format!("UPDATE tasks SET {} WHERE id = $1", sets.join(", "));
        let refs: Vec<&(dyn ToSql + Sync)> = args
            .iter()
            .map(|arg| arg.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let client = self.client().await?;
        let updated = client
            .execute(&sql, &refs)
            .await
            .context("Failed to update task")?;
        Ok(updated > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let client = self.client().await?;
        let deleted = client
            .execute("DELETE FROM tasks WHERE id = $1", &[&id])
            .await
            .context("Failed to delete task")?;
        Ok(deleted > 0)
    }

    async fn count(&self, action: Option<TaskAction>, status: &StatusFilter) -> Result<u64> {
        let client = self.client().await?;
        let action = action.map(|a| a.code());
        let row = client
            .query_one(
                "SELECT count(*) AS total FROM tasks
                 WHERE ($1::INTEGER IS NULL OR action = $1) AND status = ANY($2)",
                &[&action, &status.codes()],
            )
            .await
            .context("Failed to count tasks")?;
        let total: i64 = row.try_get("total")?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

/// In-memory task repository
#[derive(Default)]
pub struct MockTaskRepository {
    tasks: RwLock<HashMap<String, Task>>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Task>>> {
        self.tasks
            .read()
            .map_err(|_| anyhow!("task store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Task>>> {
        self.tasks
            .write()
            .map_err(|_| anyhow!("task store lock poisoned"))
    }

    /// Insert a fully formed row
    pub fn insert(&self, task: Task) -> Result<()> {
        self.write()?.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().map(|tasks| tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn find(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn apply(
        &self,
        name: &str,
        action: TaskAction,
        params: &TaskParams,
    ) -> Result<ApplyOutcome> {
        let mut tasks = self.write()?;
        if let Some(task) = tasks.values_mut().find(|t| t.name == name) {
            if task.status.is_eligible() {
                return Ok(ApplyOutcome::Unchanged(task.id.clone()));
            }
            task.status = TaskStatus::Pending;
            task.updated_at = Utc::now();
            return Ok(ApplyOutcome::Reactivated(task.id.clone()));
        }

        let now = Utc::now();
        let task = Task {
            id: new_id(),
            name: name.to_string(),
            action,
            params: params.clone(),
            timestamp: 0,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let id = task.id.clone();
        tasks.insert(id.clone(), task);
        Ok(ApplyOutcome::Created(id))
    }

    async fn rank(&self, query: &RankQuery) -> Result<Vec<Task>> {
        let tasks = self.read()?;
        let mut matched: Vec<Task> = tasks.values().filter(|t| query.matches(t)).cloned().collect();

        matched.sort_by(|a, b| {
            let ordering = match query.sort {
                SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            let ordering = match query.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            ordering.then_with(|| a.id.cmp(&b.id))
        });
        matched.truncate(query.limit);
        Ok(matched)
    }

    async fn update(&self, id: &str, update: &TaskUpdate) -> Result<bool> {
        let mut tasks = self.write()?;
        match tasks.get_mut(id) {
            Some(task) => {
                update.apply_to(task);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    async fn count(&self, action: Option<TaskAction>, status: &StatusFilter) -> Result<u64> {
        let tasks = self.read()?;
        Ok(tasks
            .values()
            .filter(|t| action.map_or(true, |a| t.action == a) && status.matches(t.status))
            .count() as u64)
    }
}

// ============================================================================
// Shared Repository Types
// ============================================================================

/// Thread-safe shared task repository
pub type SharedTaskRepository = Arc<dyn TaskRepository>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Target;

    fn params(user: &str) -> TaskParams {
        TaskParams::new(Target::user(user))
    }

    #[tokio::test]
    async fn test_apply_is_idempotent_on_name() {
        let repo = MockTaskRepository::new();
        let first = repo.apply("42@posts", TaskAction::Posts, &params("42")).await.unwrap();
        let second = repo.apply("42@posts", TaskAction::Posts, &params("42")).await.unwrap();

        assert!(matches!(first, ApplyOutcome::Created(_)));
        assert_eq!(second, ApplyOutcome::Unchanged(first.id().to_string()));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_reactivates_terminal_tasks_only() {
        let repo = MockTaskRepository::new();
        let id = repo
            .apply("42@posts", TaskAction::Posts, &params("42"))
            .await
            .unwrap()
            .id()
            .to_string();

        repo.update(&id, &TaskUpdate::new().status(TaskStatus::FlushPending))
            .await
            .unwrap();
        let outcome = repo.apply("42@posts", TaskAction::Posts, &params("42")).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Unchanged(_)));
        assert_eq!(repo.find(&id).await.unwrap().unwrap().status, TaskStatus::FlushPending);

        repo.update(&id, &TaskUpdate::new().status(TaskStatus::Done))
            .await
            .unwrap();
        let outcome = repo.apply("42@posts", TaskAction::Posts, &params("42")).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Reactivated(id.clone()));
        assert_eq!(repo.find(&id).await.unwrap().unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_rank_filters_and_sorts() {
        let repo = MockTaskRepository::new();
        let mut ids = Vec::new();
        for (i, ts) in [300, 100, 200].into_iter().enumerate() {
            let id = repo
                .apply(&format!("{i}@posts"), TaskAction::Posts, &params(&i.to_string()))
                .await
                .unwrap()
                .id()
                .to_string();
            repo.update(&id, &TaskUpdate::new().touch(ts)).await.unwrap();
            ids.push(id);
        }
        repo.apply("9@replies", TaskAction::Replies, &TaskParams::new(Target::post("9")))
            .await
            .unwrap();

        let ranked = repo.rank(&RankQuery::new(10).action(TaskAction::Posts)).await.unwrap();
        let stamps: Vec<i64> = ranked.iter().map(|t| t.timestamp).collect();
        assert_eq!(stamps, vec![100, 200, 300]);

        let ranked = repo
            .rank(
                &RankQuery::new(10)
                    .action(TaskAction::Posts)
                    .sort_by(SortField::Timestamp, SortDirection::Desc)
                    .cutoff(300),
            )
            .await
            .unwrap();
        let stamps: Vec<i64> = ranked.iter().map(|t| t.timestamp).collect();
        assert_eq!(stamps, vec![200, 100]);

        let ranked = repo
            .rank(&RankQuery::new(1).ids(vec![ids[0].clone(), ids[2].clone()]))
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, ids[2]);
    }

    #[tokio::test]
    async fn test_rank_defaults_to_pending() {
        let repo = MockTaskRepository::new();
        let id = repo
            .apply("42@posts", TaskAction::Posts, &params("42"))
            .await
            .unwrap()
            .id()
            .to_string();
        repo.update(&id, &TaskUpdate::new().status(TaskStatus::FlushPending))
            .await
            .unwrap();

        assert!(repo.rank(&RankQuery::new(10)).await.unwrap().is_empty());
        let flush = repo
            .rank(&RankQuery::new(10).status(StatusFilter::Is(TaskStatus::FlushPending)))
            .await
            .unwrap();
        assert_eq!(flush.len(), 1);

        let eligible = StatusFilter::AnyOf(vec![TaskStatus::Pending, TaskStatus::FlushPending]);
        assert_eq!(repo.count(Some(TaskAction::Posts), &eligible).await.unwrap(), 1);
        assert_eq!(repo.count(None, &StatusFilter::Default).await.unwrap(), 0);
    }

    fn stored(id: &str, params: serde_json::Value) -> StoredTask {
        StoredTask {
            id: id.to_string(),
            name: format!("{id}@posts"),
            action: TaskAction::Posts.code(),
            params,
            timestamp: 0,
            status: TaskStatus::Pending.code(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_malformed_rows_do_not_fail_the_batch() {
        let mut unknown_status = stored("t4", serde_json::json!({"user_id": "u4"}));
        unknown_status.status = 42;

        let (tasks, malformed) = decode_rows(vec![
            stored("t1", serde_json::json!({"user_id": "u1"})),
            stored("t2", serde_json::json!({"cursors": {"alice": "tok"}})),
            stored("t3", serde_json::json!({"post_id": "p3", "cursors": {"bob": "c"}})),
            unknown_status,
        ]);

        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t3"]);
        assert_eq!(malformed, vec!["t2".to_string(), "t4".to_string()]);
        assert_eq!(tasks[1].params.cursor_for("bob"), Some("c"));
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL"]
    async fn test_postgres_rank_invalidates_malformed_rows() {
        let config = crate::config::DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/harvester_test".into()),
            pool_size: 2,
        };
        let pool = crate::storage::create_pool(&config).unwrap();
        crate::storage::migrate(&pool).await.unwrap();
        let repo = PostgresTaskRepository::new(pool.clone());

        let bad_id = new_id();
        let client = pool.get().await.unwrap();
        client
            .execute(
                "INSERT INTO tasks (id, name, action, params, timestamp, status)
                 VALUES ($1, $2, 1, $3, 0, 1)",
                &[&bad_id, &format!("{bad_id}@posts"), &serde_json::json!({"cursors": {}})],
            )
            .await
            .unwrap();
        let good = repo
            .apply(&format!("{}@posts", new_id()), TaskAction::Posts, &params("u1"))
            .await
            .unwrap();

        let ranked = repo
            .rank(&RankQuery::new(1000).ids(vec![bad_id.clone(), good.id().to_string()]))
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, good.id());

        let row = client
            .query_one("SELECT status FROM tasks WHERE id = $1", &[&bad_id])
            .await
            .unwrap();
        assert_eq!(row.get::<_, i32>("status"), TaskStatus::Invalid.code());
        assert!(repo.find(&bad_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_rows() {
        let repo = MockTaskRepository::new();
        assert!(!repo.update("missing", &TaskUpdate::new().touch(1)).await.unwrap());
        assert!(!repo.delete("missing").await.unwrap());
    }
}
