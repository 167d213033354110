//! Session store
//!
//! Rotation is least-recently-used: the pool accessors return the session
//! with the oldest `timestamp` for a node and status, and callers touch the
//! timestamp when they take it.

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
use crate::models::{Session, SessionStatus};

/// Credential registration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub account: String,
    pub cookie: String,
    pub slot: i32,
    pub node: i32,
    pub agent: String,
}

/// Partial session mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub timestamp: Option<Micros>,
    pub unblocked_at: Option<Micros>,
    pub status: Option<SessionStatus>,
}

impl SessionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the last-used time
    pub fn touch(mut self, timestamp: Micros) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn unblocked_at(mut self, at: Micros) -> Self {
        self.unblocked_at = Some(at);
        self
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_none() && self.unblocked_at.is_none() && self.status.is_none()
    }

    fn apply_to(&self, session: &mut Session) {
        if let Some(timestamp) = self.timestamp {
            session.timestamp = timestamp;
        }
        if let Some(at) = self.unblocked_at {
            session.unblocked_at = at;
        }
        if let Some(status) = self.status {
            session.status = status;
        }
        session.updated_at = Utc::now();
    }
}

/// Repository for session rows
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Get session by ID
    async fn find(&self, id: &str) -> Result<Option<Session>>;

    /// Get session by remote account
    async fn get_by_account(&self, account: &str) -> Result<Option<Session>>;

    /// Register a credential, refreshing it if the account is known
    ///
    /// A revoked session comes back into the default pool; a privileged one
    /// keeps its status.
    async fn apply(&self, new: &NewSession) -> Result<Session>;

    /// Least-recently-used session in the default pool of `node`
    async fn current(&self, node: i32) -> Result<Option<Session>>;

    /// Least-recently-used session in the privileged pool of `node`
    async fn special(&self, node: i32) -> Result<Option<Session>>;

    /// Apply a partial update; returns whether the row exists
    async fn update(&self, id: &str, update: &SessionUpdate) -> Result<bool>;

    /// All sessions of `node`, least recently used first
    async fn list(&self, node: i32) -> Result<Vec<Session>>;
}

// ============================================================================
// PostgreSQL Implementation
// ============================================================================

const SESSION_COLUMNS: &str = "id, account, node, agent, cookie, slot, data, unblocked_at, \
                               timestamp, status, created_at, updated_at";

/// PostgreSQL implementation of SessionRepository
pub struct PostgresSessionRepository {
    pool: Pool,
}

impl PostgresSessionRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .context("Failed to get PostgreSQL connection")
    }

    async fn lru(&self, node: i32, status: SessionStatus) -> Result<Option<Session>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE node = $1 AND status = $2
                     ORDER BY timestamp ASC, id LIMIT 1"
                ),
                &[&node, &status.code()],
            )
            .await
            .context("Failed to select session")?;
        row.as_ref().map(session_from_row).transpose()
    }
}

fn session_from_row(row: &Row) -> Result<Session> {
    let id: String = row.try_get("id")?;
    let status: i32 = row.try_get("status")?;

    Ok(Session {
        status: SessionStatus::from_code(status)
            .ok_or_else(|| anyhow!("session {id} has unknown status {status}"))?,
        account: row.try_get("account")?,
        node: row.try_get("node")?,
        agent: row.try_get("agent")?,
        cookie: row.try_get("cookie")?,
        slot: row.try_get("slot")?,
        data: row.try_get("data")?,
        unblocked_at: row.try_get("unblocked_at")?,
        timestamp: row.try_get("timestamp")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        id,
    })
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn find(&self, id: &str) -> Result<Option<Session>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"),
                &[&id],
            )
            .await
            .context("Failed to load session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn get_by_account(&self, account: &str) -> Result<Option<Session>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE account = $1"),
                &[&account],
            )
            .await
            .context("Failed to load session by account")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn apply(&self, new: &NewSession) -> Result<Session> {
        let client = self.client().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO sessions (id, account, node, agent, cookie, slot, status)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     ON CONFLICT (account) DO UPDATE SET
                        cookie = EXCLUDED.cookie,
                        slot = EXCLUDED.slot,
                        agent = EXCLUDED.agent,
                        status = CASE WHEN sessions.status = $8 THEN EXCLUDED.status
                                      ELSE sessions.status END,
                        updated_at = now()
                     RETURNING {SESSION_COLUMNS}"
                ),
                &[
                    &new_id(),
                    &new.account,
                    &new.node,
                    &new.agent,
                    &new.cookie,
                    &new.slot,
                    &SessionStatus::Current.code(),
                    &SessionStatus::Revoked.code(),
                ],
            )
            .await
            .context("Failed to apply session")?;
        session_from_row(&row)
    }

    async fn current(&self, node: i32) -> Result<Option<Session>> {
        self.lru(node, SessionStatus::Current).await
    }

    async fn special(&self, node: i32) -> Result<Option<Session>> {
        self.lru(node, SessionStatus::Special).await
    }

    async fn update(&self, id: &str, update: &SessionUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(self.find(id).await?.is_some());
        }

        let mut sets: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn ToSql + Sync + Send>> = vec![Box::new(id.to_string())];

        if let Some(timestamp) = update.timestamp {
            args.push(Box::new(timestamp));
            sets.push(format!("timestamp = ${}", args.len()));
        }
        if let Some(at) = update.unblocked_at {
            args.push(Box::new(at));
            sets.push(format!("unblocked_at = ${}", args.len()));
        }
        if let Some(status) = update.status {
            args.push(Box::new(status.code()));
            sets.push(format!("status = ${}", args.len()));
        }
        sets.push("updated_at = now()".to_string());

        let sql = format!("UPDATE sessions SET {} WHERE id = $1", sets.join(", "));
        let refs: Vec<&(dyn ToSql + Sync)> = args
            .iter()
            .map(|arg| arg.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let client = self.client().await?;
        let updated = client
            .execute(&sql, &refs)
            .await
            .context("Failed to update session")?;
        Ok(updated > 0)
    }

    async fn list(&self, node: i32) -> Result<Vec<Session>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE node = $1
                     ORDER BY timestamp ASC, id"
                ),
                &[&node],
            )
            .await
            .context("Failed to list sessions")?;
        rows.iter().map(session_from_row).collect()
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

/// In-memory session repository
#[derive(Default)]
pub struct MockSessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MockSessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Session>>> {
        self.sessions
            .read()
            .map_err(|_| anyhow!("session store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Session>>> {
        self.sessions
            .write()
            .map_err(|_| anyhow!("session store lock poisoned"))
    }

    /// Insert a fully formed row
    pub fn insert(&self, session: Session) -> Result<()> {
        self.write()?.insert(session.id.clone(), session);
        Ok(())
    }

    fn lru(&self, node: i32, status: SessionStatus) -> Result<Option<Session>> {
        Ok(self
            .read()?
            .values()
            .filter(|s| s.node == node && s.status == status)
            .min_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }
}

#[async_trait]
impl SessionRepository for MockSessionRepository {
    async fn find(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn get_by_account(&self, account: &str) -> Result<Option<Session>> {
        Ok(self.read()?.values().find(|s| s.account == account).cloned())
    }

    async fn apply(&self, new: &NewSession) -> Result<Session> {
        let mut sessions = self.write()?;
        if let Some(session) = sessions.values_mut().find(|s| s.account == new.account) {
            session.cookie = new.cookie.clone();
            session.slot = new.slot;
            session.agent = new.agent.clone();
            if session.status == SessionStatus::Revoked {
                session.status = SessionStatus::Current;
            }
            session.updated_at = Utc::now();
            return Ok(session.clone());
        }

        let now = Utc::now();
        let session = Session {
            id: new_id(),
            account: new.account.clone(),
            node: new.node,
            agent: new.agent.clone(),
            cookie: new.cookie.clone(),
            slot: new.slot,
            data: serde_json::json!({}),
            unblocked_at: 0,
            timestamp: 0,
            status: SessionStatus::Current,
            created_at: now,
            updated_at: now,
        };
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn current(&self, node: i32) -> Result<Option<Session>> {
        self.lru(node, SessionStatus::Current)
    }

    async fn special(&self, node: i32) -> Result<Option<Session>> {
        self.lru(node, SessionStatus::Special)
    }

    async fn update(&self, id: &str, update: &SessionUpdate) -> Result<bool> {
        let mut sessions = self.write()?;
        match sessions.get_mut(id) {
            Some(session) => {
                update.apply_to(session);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, node: i32) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .read()?
            .values()
            .filter(|s| s.node == node)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }
}

/// Thread-safe shared session repository
pub type SharedSessionRepository = Arc<dyn SessionRepository>;

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(account: &str) -> NewSession {
        NewSession {
            account: account.to_string(),
            cookie: format!("auth_token={account}"),
            slot: 0,
            node: 1,
            agent: "harvester-test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_current_is_least_recently_used() {
        let repo = MockSessionRepository::new();
        let a = repo.apply(&registration("alice")).await.unwrap();
        let b = repo.apply(&registration("bob")).await.unwrap();

        repo.update(&a.id, &SessionUpdate::new().touch(200)).await.unwrap();
        repo.update(&b.id, &SessionUpdate::new().touch(100)).await.unwrap();
        assert_eq!(repo.current(1).await.unwrap().unwrap().account, "bob");

        repo.update(&b.id, &SessionUpdate::new().touch(300)).await.unwrap();
        assert_eq!(repo.current(1).await.unwrap().unwrap().account, "alice");
        assert!(repo.current(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pools_are_separate() {
        let repo = MockSessionRepository::new();
        let a = repo.apply(&registration("alice")).await.unwrap();
        assert!(repo.special(1).await.unwrap().is_none());

        repo.update(&a.id, &SessionUpdate::new().status(SessionStatus::Special))
            .await
            .unwrap();
        assert!(repo.current(1).await.unwrap().is_none());
        assert_eq!(repo.special(1).await.unwrap().unwrap().id, a.id);
    }

    #[tokio::test]
    async fn test_apply_revives_revoked_and_keeps_special() {
        let repo = MockSessionRepository::new();
        let a = repo.apply(&registration("alice")).await.unwrap();
        repo.update(&a.id, &SessionUpdate::new().status(SessionStatus::Revoked))
            .await
            .unwrap();

        let again = repo.apply(&registration("alice")).await.unwrap();
        assert_eq!(again.id, a.id);
        assert_eq!(again.status, SessionStatus::Current);

        repo.update(&a.id, &SessionUpdate::new().status(SessionStatus::Special))
            .await
            .unwrap();
        let again = repo.apply(&registration("alice")).await.unwrap();
        assert_eq!(again.status, SessionStatus::Special);
        assert_eq!(repo.list(1).await.unwrap().len(), 1);
    }
}
