//! Session selection and backoff
//!
//! The pool is an explicit object handed to the scheduler rather than global
//! rotation state. Selection prefers the account that owns a task's cursor,
//! so pagination continues with the credential that issued the token.
//! Remote outcomes feed back into the session row: a rejected credential
//! leaves rotation, a throttled one cools down for a fixed window.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::clock::{as_micros, Clock};
use crate::fetch::FetchError;
use crate::metrics;
use crate::models::{Cursors, Session, SessionStatus};
use crate::storage::{SessionUpdate, SharedSessionRepository};

/// Session pool scoped to one storage node
#[derive(Clone)]
pub struct SessionPool {
    repo: SharedSessionRepository,
    node: i32,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionPool {
    pub fn new(
        repo: SharedSessionRepository,
        node: i32,
        cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            node,
            cooldown,
            clock,
        }
    }

    pub fn node(&self) -> i32 {
        self.node
    }

    /// Least-recently-used session in the default pool
    pub async fn current(&self) -> Result<Option<Session>> {
        self.repo.current(self.node).await
    }

    /// Least-recently-used session in the privileged pool
    pub async fn special(&self) -> Result<Option<Session>> {
        self.repo.special(self.node).await
    }

    /// Least-recently-used session with the given pool status
    pub async fn from_pool(&self, pool: SessionStatus) -> Result<Option<Session>> {
        match pool {
            SessionStatus::Special => self.special().await,
            SessionStatus::Current => self.current().await,
            SessionStatus::Revoked => Ok(None),
        }
    }

    /// Pick the session for a task
    ///
    /// A cursor owner in `pool` that is not cooling down wins; otherwise the
    /// pool's least-recently-used session is returned.
    pub async fn resolve(&self, pool: SessionStatus, cursors: &Cursors) -> Result<Option<Session>> {
        let now = self.clock.now_micros();
        for account in cursors.accounts() {
            if let Some(session) = self.repo.get_by_account(account).await? {
                if session.status == pool && session.node == self.node && !session.is_blocked(now) {
                    tracing::debug!(account = %session.account, "Continuing with cursor owner");
                    return Ok(Some(session));
                }
            }
        }
        self.from_pool(pool).await
    }

    /// Move the session to the back of the rotation
    pub async fn touch(&self, session: &Session) -> Result<()> {
        self.repo
            .update(&session.id, &SessionUpdate::new().touch(self.clock.now_micros()))
            .await?;
        Ok(())
    }

    /// Reject a session that may not be used right now, without a network call
    pub fn ensure_usable(&self, session: &Session) -> Result<(), FetchError> {
        if session.status == SessionStatus::Revoked {
            return Err(FetchError::Unauthorized);
        }
        let now = self.clock.now_micros();
        if session.is_blocked(now) {
            return Err(FetchError::Blocked {
                until: session.unblocked_at,
            });
        }
        Ok(())
    }

    /// Apply a fetch failure to the session row
    pub async fn record_failure(&self, session: &Session, err: &FetchError) -> Result<()> {
        match err {
            FetchError::Unauthorized => {
                tracing::warn!(account = %session.account, "Session credential rejected, revoking");
                metrics::record_session_failure("revoked");
                self.repo
                    .update(
                        &session.id,
                        &SessionUpdate::new().status(SessionStatus::Revoked),
                    )
                    .await?;
            }
            FetchError::RateLimited => {
                let until = self.clock.now_micros().saturating_add(as_micros(self.cooldown));
                tracing::warn!(
                    account = %session.account,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Session rate limited, cooling down"
                );
                metrics::record_session_failure("rate_limited");
                self.repo
                    .update(&session.id, &SessionUpdate::new().unblocked_at(until))
                    .await?;
            }
            FetchError::Blocked { until } => {
                tracing::debug!(account = %session.account, until, "Session still cooling down");
                metrics::record_session_failure("blocked");
            }
            _ => {}
        }
        Ok(())
    }

    /// Report on the pool the scheduler would draw from next
    pub async fn health_check(&self) -> Result<SessionHealth> {
        let now = self.clock.now_micros();
        let sessions = self.repo.list(self.node).await?;
        let mut health = SessionHealth::default();
        for session in &sessions {
            match session.status {
                SessionStatus::Revoked => health.revoked += 1,
                _ if session.is_blocked(now) => health.blocked += 1,
                SessionStatus::Current => health.current += 1,
                SessionStatus::Special => health.special += 1,
            }
        }
        health.next = self.current().await?.map(|s| {
            let blocked = s.is_blocked(now);
            (s.account, blocked)
        });
        Ok(health)
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("node", &self.node)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

/// Usable and unusable session counts for one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHealth {
    pub current: usize,
    pub special: usize,
    pub blocked: usize,
    pub revoked: usize,
    /// Next default-pool session and whether it is cooling down
    pub next: Option<(String, bool)>,
}

impl SessionHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self.next, Some((_, false)))
    }
}
