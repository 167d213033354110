// Core data structures for the crawl scheduler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clock::Micros;

// ============================================================================
// Task
// ============================================================================

/// Task family codes
///
/// The numeric codes are persisted in the `action` column and must stay stable
/// across deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum TaskAction {
    Posts = 1,
    Replies = 2,
    MediaUsers = 3,
    MediaPosts = 4,
    MediaReplies = 5,
    UserPosts = 6,
}

impl TaskAction {
    /// Create from the stored code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Posts),
            2 => Some(Self::Replies),
            3 => Some(Self::MediaUsers),
            4 => Some(Self::MediaPosts),
            5 => Some(Self::MediaReplies),
            6 => Some(Self::UserPosts),
            _ => None,
        }
    }

    /// Stored code
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Replies => "replies",
            Self::MediaUsers => "media_users",
            Self::MediaPosts => "media_posts",
            Self::MediaReplies => "media_replies",
            Self::UserPosts => "user_posts",
        }
    }
}

impl TryFrom<i32> for TaskAction {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown task action code {code}"))
    }
}

impl From<TaskAction> for i32 {
    fn from(action: TaskAction) -> Self {
        action.code()
    }
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task status codes
///
/// | code | status | scheduled by |
/// |------|--------|--------------|
/// | 1 | `Pending` (not started or mid-crawl) | process ticks |
/// | 2 | `FlushPending` (crawl exhausted, waiting for flush) | flush ticks |
/// | 3 | `Done` | - |
/// | 4 | `Invalid` | - |
/// | 5 | `Deferred` | - |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum TaskStatus {
    Pending = 1,
    FlushPending = 2,
    Done = 3,
    Invalid = 4,
    Deferred = 5,
}

impl TaskStatus {
    /// Create from the stored code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Pending),
            2 => Some(Self::FlushPending),
            3 => Some(Self::Done),
            4 => Some(Self::Invalid),
            5 => Some(Self::Deferred),
            _ => None,
        }
    }

    /// Stored code
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Whether a scheduler tick may pick this task up
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Pending | Self::FlushPending)
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::FlushPending => "flush_pending",
            Self::Done => "done",
            Self::Invalid => "invalid",
            Self::Deferred => "deferred",
        }
    }
}

impl TryFrom<i32> for TaskStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown task status code {code}"))
    }
}

impl From<TaskStatus> for i32 {
    fn from(status: TaskStatus) -> Self {
        status.code()
    }
}

/// Where a task is in its pagination lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    /// Pending with no resumption token yet
    Start,
    /// Pending with at least one stored resumption token
    InProgress,
    /// Feed exhausted, waiting for the flush pass
    FlushPending,
    /// Not schedulable
    Terminal,
}

/// Resumption tokens keyed by session account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursors(BTreeMap<String, String>);

impl Cursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token stored for an account
    pub fn get(&self, account: &str) -> Option<&str> {
        self.0.get(account).map(String::as_str)
    }

    /// Store the token for an account
    pub fn set(&mut self, account: impl Into<String>, token: impl Into<String>) {
        self.0.insert(account.into(), token.into());
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Accounts holding a token, in stable order
    pub fn accounts(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// The entity a task crawls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    User { user_id: String },
    Post { post_id: String },
    Reply { reply_id: String },
}

impl Target {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User {
            user_id: user_id.into(),
        }
    }

    pub fn post(post_id: impl Into<String>) -> Self {
        Self::Post {
            post_id: post_id.into(),
        }
    }

    /// Identifier of the targeted row
    pub fn id(&self) -> &str {
        match self {
            Self::User { user_id } => user_id,
            Self::Post { post_id } => post_id,
            Self::Reply { reply_id } => reply_id,
        }
    }

    /// Target kind, as used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Post { .. } => "post",
            Self::Reply { .. } => "reply",
        }
    }
}

/// Task parameter bag
///
/// Serializes to the flat JSON stored in the `params` column, e.g.
/// `{"user_id": "u1", "cursors": {"acct": "token"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParams {
    #[serde(flatten)]
    pub target: Target,

    #[serde(default, skip_serializing_if = "Cursors::is_empty")]
    pub cursors: Cursors,
}

impl TaskParams {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            cursors: Cursors::new(),
        }
    }

    /// Resumption token for the session account, if any
    pub fn cursor_for(&self, account: &str) -> Option<&str> {
        self.cursors.get(account)
    }

    /// Decode the stored JSON
    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Encode for storage
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Unit of crawl work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub action: TaskAction,
    pub params: TaskParams,
    /// Last-activity time in microseconds
    pub timestamp: Micros,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Derived lifecycle phase
    pub fn phase(&self) -> CrawlPhase {
        match self.status {
            TaskStatus::Pending if self.params.cursors.is_empty() => CrawlPhase::Start,
            TaskStatus::Pending => CrawlPhase::InProgress,
            TaskStatus::FlushPending => CrawlPhase::FlushPending,
            _ => CrawlPhase::Terminal,
        }
    }

    /// Dedup name for a target and family suffix, e.g. `42@posts`
    pub fn name_for(target_id: &str, suffix: &str) -> String {
        format!("{target_id}@{suffix}")
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session pool membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum SessionStatus {
    /// Credential rejected by the remote service
    Revoked = 0,
    /// Default rotation pool
    Current = 1,
    /// Privileged pool
    Special = 8,
}

impl SessionStatus {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Revoked),
            1 => Some(Self::Current),
            8 => Some(Self::Special),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Revoked => "revoked",
            Self::Current => "current",
            Self::Special => "special",
        }
    }
}

impl TryFrom<i32> for SessionStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown session status code {code}"))
    }
}

impl From<SessionStatus> for i32 {
    fn from(status: SessionStatus) -> Self {
        status.code()
    }
}

/// Credentialed session bound to one remote account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub account: String,
    /// Storage node this session belongs to
    pub node: i32,
    /// Client identity string
    pub agent: String,
    pub cookie: String,
    /// Egress path selector (0 = default route)
    pub slot: i32,
    /// Opaque credential extras
    pub data: serde_json::Value,
    pub unblocked_at: Micros,
    /// Last-used time, drives LRU rotation
    pub timestamp: Micros,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session is cooling down at `now`
    pub fn is_blocked(&self, now: Micros) -> bool {
        self.unblocked_at > now
    }

    pub fn is_usable(&self, now: Micros) -> bool {
        self.status != SessionStatus::Revoked && !self.is_blocked(now)
    }

    /// Proxy URL for a dedicated egress slot
    pub fn egress(&self, proxy_base_port: u16) -> Option<String> {
        if self.slot <= 0 {
            return None;
        }
        let port = i32::from(proxy_base_port) + self.slot;
        Some(format!("socks5://127.0.0.1:{port}"))
    }
}

// ============================================================================
// Crawl targets
// ============================================================================

/// Stored remote user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub account: String,
    /// Identifier on the remote service
    pub remote_id: i64,
}

/// Stored remote post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub remote_id: i64,
    /// Publication time in microseconds
    pub timestamp: Micros,
}

/// Resolved crawl target handed to the fetcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    User(User),
    Post(Post),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Self::User(user) => &user.id,
            Self::Post(post) => &post.id,
        }
    }
}
