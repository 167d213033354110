//! Boundary to the remote fetch capability
//!
//! A [`Fetcher`] retrieves one page of an entity's feed with a session's
//! credentials, persists whatever it discovers, and reports where the feed
//! continues. It must tolerate stale or repeated cursors: the scheduler gives
//! at-least-once delivery and relies on the fetcher upserting by remote id.

pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::clock::Micros;
use crate::error::{ErrorCategory, HarvestErrorTrait};
use crate::models::{Entity, Session, TaskAction, TaskParams};

pub use remote::RemoteFetcher;

/// One fetched page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPage {
    /// Resumption token for the next page, empty when the feed is exhausted
    pub cursor: String,
    /// Items seen on this page
    pub items: usize,
}

impl FetchPage {
    pub fn new(cursor: impl Into<String>, items: usize) -> Self {
        Self {
            cursor: cursor.into(),
            items,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_empty()
    }
}

/// Errors that can occur while fetching a page
#[derive(Error, Debug)]
pub enum FetchError {
    /// Credential rejected (HTTP 401)
    #[error("session credential rejected")]
    Unauthorized,

    /// Session throttled (HTTP 429)
    #[error("rate limit exceeded")]
    RateLimited,

    /// Session still cooling down; no request was sent
    #[error("session blocked until {until}")]
    Blocked { until: Micros },

    /// Network failure or timeout
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("decoding error: {0}")]
    Decode(String),

    /// Other non-success status
    #[error("unexpected status: {0}")]
    Status(u16),
}

impl FetchError {
    /// Whether the failure is attributable to the session rather than the request
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::RateLimited | Self::Blocked { .. })
    }
}

impl HarvestErrorTrait for FetchError {
    fn is_recoverable(&self) -> bool {
        // The task is retried next tick in every case; an unauthorized
        // session is not.
        !matches!(self, Self::Unauthorized)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Unauthorized | Self::RateLimited | Self::Blocked { .. } => {
                ErrorCategory::Credential
            }
            Self::Transport(_) | Self::Status(_) => ErrorCategory::Network,
            Self::Decode(_) => ErrorCategory::Other,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Fetch capability used by the scheduler
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the next page of `entity`'s feed for `action`
    ///
    /// The resumption token is `params.cursors[session.account]`; no entry
    /// means the first page.
    async fn process(
        &self,
        action: TaskAction,
        session: &Session,
        entity: &Entity,
        params: &TaskParams,
    ) -> Result<FetchPage, FetchError>;
}

/// Thread-safe shared fetcher
pub type SharedFetcher = Arc<dyn Fetcher>;
