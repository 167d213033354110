//! Read access to the crawled entities a task targets
//!
//! The fetch capability owns writes to these tables. The scheduler only
//! resolves targets, creates stub users for on-demand applies, and reads the
//! aggregates used to seed reply crawls.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use super::new_id;
use crate::models::{Post, User};

/// Repository for crawl target rows
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Get user by ID
    async fn find_user(&self, id: &str) -> Result<Option<User>>;

    /// Get post by ID
    async fn find_post(&self, id: &str) -> Result<Option<Post>>;

    /// Get the user row for a remote id, creating a stub if absent
    async fn ensure_user(&self, account: &str, remote_id: i64) -> Result<User>;

    /// Users with the most stored replies, most active first
    async fn top_reply_authors(&self, limit: usize) -> Result<Vec<String>>;

    /// Most recent posts of a user
    async fn recent_posts(&self, user_id: &str, limit: usize) -> Result<Vec<Post>>;
}

// ============================================================================
// PostgreSQL Implementation
// ============================================================================

/// PostgreSQL implementation of EntityRepository
pub struct PostgresEntityRepository {
    pool: Pool,
}

impl PostgresEntityRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .context("Failed to get PostgreSQL connection")
    }
}

fn user_from_row(row: &Row) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        account: row.try_get("account")?,
        remote_id: row.try_get("remote_id")?,
    })
}

fn post_from_row(row: &Row) -> Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        remote_id: row.try_get("remote_id")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn limit_arg(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl EntityRepository for PostgresEntityRepository {
    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT id, account, remote_id FROM users WHERE id = $1",
                &[&id],
            )
            .await
            .context("Failed to load user")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_post(&self, id: &str) -> Result<Option<Post>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT id, user_id, remote_id, timestamp FROM posts WHERE id = $1",
                &[&id],
            )
            .await
            .context("Failed to load post")?;
        row.as_ref().map(post_from_row).transpose()
    }

    async fn ensure_user(&self, account: &str, remote_id: i64) -> Result<User> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO users (id, account, remote_id) VALUES ($1, $2, $3)
                 ON CONFLICT (remote_id) DO NOTHING",
                &[&new_id(), &account, &remote_id],
            )
            .await
            .context("Failed to create user")?;

        let row = client
            .query_one(
                "SELECT id, account, remote_id FROM users WHERE remote_id = $1",
                &[&remote_id],
            )
            .await
            .context("Failed to load user by remote id")?;
        user_from_row(&row)
    }

    async fn top_reply_authors(&self, limit: usize) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT user_id, count(id) AS replies_count FROM replies
                 WHERE status = 1
                 GROUP BY user_id
                 ORDER BY replies_count DESC, user_id
                 LIMIT $1",
                &[&limit_arg(limit)],
            )
            .await
            .context("Failed to rank reply authors")?;
        rows.iter()
            .map(|row| row.try_get("user_id").map_err(Into::into))
            .collect()
    }

    async fn recent_posts(&self, user_id: &str, limit: usize) -> Result<Vec<Post>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id, user_id, remote_id, timestamp FROM posts
                 WHERE user_id = $1
                 ORDER BY timestamp DESC, id
                 LIMIT $2",
                &[&user_id, &limit_arg(limit)],
            )
            .await
            .context("Failed to list recent posts")?;
        rows.iter().map(post_from_row).collect()
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

#[derive(Default)]
struct EntityTables {
    users: HashMap<String, User>,
    posts: HashMap<String, Post>,
    /// (reply id, author user id)
    replies: Vec<(String, String)>,
}

/// In-memory entity repository
#[derive(Default)]
pub struct MockEntityRepository {
    tables: RwLock<EntityTables>,
}

impl MockEntityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, EntityTables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("entity store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, EntityTables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("entity store lock poisoned"))
    }

    pub fn insert_user(&self, user: User) -> Result<()> {
        self.write()?.users.insert(user.id.clone(), user);
        Ok(())
    }

    pub fn insert_post(&self, post: Post) -> Result<()> {
        self.write()?.posts.insert(post.id.clone(), post);
        Ok(())
    }

    /// Record a stored reply written by `user_id`
    pub fn insert_reply(&self, reply_id: &str, user_id: &str) -> Result<()> {
        self.write()?
            .replies
            .push((reply_id.to_string(), user_id.to_string()));
        Ok(())
    }

    pub fn remove_user(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.users.remove(id).is_some())
    }

    pub fn remove_post(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.posts.remove(id).is_some())
    }
}

#[async_trait]
impl EntityRepository for MockEntityRepository {
    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.read()?.users.get(id).cloned())
    }

    async fn find_post(&self, id: &str) -> Result<Option<Post>> {
        Ok(self.read()?.posts.get(id).cloned())
    }

    async fn ensure_user(&self, account: &str, remote_id: i64) -> Result<User> {
        let mut tables = self.write()?;
        if let Some(user) = tables.users.values().find(|u| u.remote_id == remote_id) {
            return Ok(user.clone());
        }
        let user = User {
            id: new_id(),
            account: account.to_string(),
            remote_id,
        };
        tables.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn top_reply_authors(&self, limit: usize) -> Result<Vec<String>> {
        let tables = self.read()?;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for (_, user_id) in &tables.replies {
            *counts.entry(user_id.as_str()).or_default() += 1;
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(user_id, _)| user_id.to_string())
            .collect())
    }

    async fn recent_posts(&self, user_id: &str, limit: usize) -> Result<Vec<Post>> {
        let tables = self.read()?;
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        posts.truncate(limit);
        Ok(posts)
    }
}

/// Thread-safe shared entity repository
pub type SharedEntityRepository = Arc<dyn EntityRepository>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_user_is_idempotent() {
        let repo = MockEntityRepository::new();
        let a = repo.ensure_user("alice", 42).await.unwrap();
        let b = repo.ensure_user("alice", 42).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(repo.find_user(&a.id).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn test_reply_author_ranking_and_recent_posts() {
        let repo = MockEntityRepository::new();
        for (reply, user) in [("r1", "u1"), ("r2", "u2"), ("r3", "u2")] {
            repo.insert_reply(reply, user).unwrap();
        }
        assert_eq!(repo.top_reply_authors(1).await.unwrap(), vec!["u2".to_string()]);
        assert_eq!(repo.top_reply_authors(5).await.unwrap(), vec!["u2", "u1"]);

        for (id, ts) in [("p1", 10), ("p2", 30), ("p3", 20)] {
            repo.insert_post(Post {
                id: id.to_string(),
                user_id: "u2".to_string(),
                remote_id: ts,
                timestamp: ts,
            })
            .unwrap();
        }
        let recent: Vec<String> = repo
            .recent_posts("u2", 2)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(recent, vec!["p2", "p3"]);
    }
}
