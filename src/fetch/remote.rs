//! HTTP bridge to the fetch service
//!
//! The remote protocol itself lives in a separate service. This client posts
//! the session, the resolved entity and the resumption token as JSON and maps
//! the response status onto [`FetchError`].

use async_trait::async_trait;
use reqwest::{Client, Proxy, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{FetchError, FetchPage, Fetcher};
use crate::config::FetcherConfig;
use crate::models::{Entity, Session, TaskAction, TaskParams};

/// Session fields forwarded to the fetch service
#[derive(Debug, Serialize)]
struct SessionPayload<'a> {
    account: &'a str,
    agent: &'a str,
    cookie: &'a str,
    data: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct FetchRequest<'a> {
    action: &'static str,
    session: SessionPayload<'a>,
    entity: &'a Entity,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    cursor: String,
    #[serde(default)]
    items: usize,
}

/// Fetcher that delegates to an HTTP fetch service
pub struct RemoteFetcher {
    client: Client,
    endpoint: String,
    timeout: Duration,
    proxy_base_port: u16,
}

impl RemoteFetcher {
    /// Create a new fetcher
    ///
    /// # Arguments
    ///
    /// * `config` - Endpoint, timeout and egress settings
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Transport` if the HTTP client cannot be created
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            timeout,
            proxy_base_port: config.proxy_base_port,
        })
    }

    /// Client routed through the session's egress slot, if it has one
    fn client_for(&self, session: &Session) -> Result<Client, FetchError> {
        match session.egress(self.proxy_base_port) {
            Some(proxy) => {
                let proxy = Proxy::all(&proxy)?;
                Ok(Client::builder()
                    .timeout(self.timeout)
                    .proxy(proxy)
                    .build()?)
            }
            None => Ok(self.client.clone()),
        }
    }
}

#[async_trait]
impl Fetcher for RemoteFetcher {
    async fn process(
        &self,
        action: TaskAction,
        session: &Session,
        entity: &Entity,
        params: &TaskParams,
    ) -> Result<FetchPage, FetchError> {
        let request = FetchRequest {
            action: action.as_str(),
            session: SessionPayload {
                account: &session.account,
                agent: &session.agent,
                cookie: &session.cookie,
                data: &session.data,
            },
            entity,
            cursor: params.cursor_for(&session.account),
        };

        let client = self.client_for(session)?;
        let response = client
            .post(&self.endpoint)
            .header(reqwest::header::USER_AGENT, &session.agent)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: FetchResponse = response
                .json()
                .await
                .map_err(|e| FetchError::Decode(e.to_string()))?;
            Ok(FetchPage::new(body.cursor, body.items))
        } else if status == StatusCode::UNAUTHORIZED {
            Err(FetchError::Unauthorized)
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Err(FetchError::RateLimited)
        } else {
            Err(FetchError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionStatus, Target, User};
    use chrono::Utc;
    use serde_json::json;

    fn session(slot: i32) -> Session {
        Session {
            id: "s1".to_string(),
            account: "alice".to_string(),
            node: 1,
            agent: "agent/1.0".to_string(),
            cookie: "auth_token=x".to_string(),
            slot,
            data: json!({}),
            unblocked_at: 0,
            timestamp: 0,
            status: SessionStatus::Current,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_request_shape() {
        let session = session(0);
        let entity = Entity::User(User {
            id: "u1".to_string(),
            account: "bob".to_string(),
            remote_id: 42,
        });
        let mut params = TaskParams::new(Target::user("u1"));
        params.cursors.set("alice", "abc");

        let request = FetchRequest {
            action: TaskAction::Posts.as_str(),
            session: SessionPayload {
                account: &session.account,
                agent: &session.agent,
                cookie: &session.cookie,
                data: &session.data,
            },
            entity: &entity,
            cursor: params.cursor_for(&session.account),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["action"], "posts");
        assert_eq!(value["cursor"], "abc");
        assert_eq!(value["entity"]["kind"], "user");
        assert_eq!(value["entity"]["remote_id"], 42);
    }

    #[test]
    fn test_proxy_client_for_slot() {
        let fetcher = RemoteFetcher::new(&FetcherConfig::default()).unwrap();
        assert!(fetcher.client_for(&session(0)).is_ok());
        assert!(fetcher.client_for(&session(2)).is_ok());
    }
}
