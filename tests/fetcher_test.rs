//! Integration tests for RemoteFetcher using wiremock
//!
//! These tests validate how fetch service responses map onto pages and
//! session failures.

use chrono::Utc;
use harvester::config::FetcherConfig;
use harvester::fetch::{FetchError, FetchPage, Fetcher, RemoteFetcher};
use harvester::models::{
    Cursors, Entity, Session, SessionStatus, Target, TaskAction, TaskParams, User,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(server: &MockServer) -> RemoteFetcher {
    RemoteFetcher::new(&FetcherConfig {
        endpoint: format!("{}/fetch", server.uri()),
        timeout_secs: 5,
        ..Default::default()
    })
    .unwrap()
}

fn session() -> Session {
    Session {
        id: "s1".to_string(),
        account: "alice".to_string(),
        node: 1,
        agent: "harvester-test/1.0".to_string(),
        cookie: "auth_token=abc".to_string(),
        slot: 0,
        data: json!({}),
        unblocked_at: 0,
        timestamp: 0,
        status: SessionStatus::Special,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn user() -> Entity {
    Entity::User(User {
        id: "42".to_string(),
        account: "bob".to_string(),
        remote_id: 4242,
    })
}

fn params(cursor: Option<&str>) -> TaskParams {
    let mut params = TaskParams::new(Target::user("42"));
    if let Some(cursor) = cursor {
        let mut cursors = Cursors::new();
        cursors.set("alice", cursor);
        params.cursors = cursors;
    }
    params
}

/// Test a successful page with a continuation cursor
#[tokio::test]
async fn test_fetch_page() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/fetch"))
        .and(header("user-agent", "harvester-test/1.0"))
        .and(body_partial_json(json!({
            "action": "posts",
            "cursor": "p2",
            "session": { "account": "alice" },
            "entity": { "kind": "user", "id": "42" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cursor": "p3",
            "items": 17
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = fetcher(&server)
        .process(TaskAction::Posts, &session(), &user(), &params(Some("p2")))
        .await
        .unwrap();

    assert_eq!(page, FetchPage::new("p3", 17));
    assert!(!page.is_exhausted());
}

/// Test that the first page omits the cursor and an empty cursor exhausts
#[tokio::test]
async fn test_first_page_and_exhaustion() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/fetch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let page = fetcher(&server)
        .process(TaskAction::Posts, &session(), &user(), &params(None))
        .await
        .unwrap();
    assert!(page.is_exhausted());
    assert_eq!(page.items, 0);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body.get("cursor").is_none());
}

/// Test that 401 maps to a rejected credential
#[tokio::test]
async fn test_unauthorized() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = fetcher(&server)
        .process(TaskAction::Posts, &session(), &user(), &params(None))
        .await;

    assert!(matches!(result, Err(FetchError::Unauthorized)));
}

/// Test that 429 maps to a rate limit
#[tokio::test]
async fn test_rate_limited() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = fetcher(&server)
        .process(TaskAction::Replies, &session(), &user(), &params(None))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::RateLimited));
    assert!(err.is_credential_failure());
}

/// Test that other statuses are plain fetch failures
#[tokio::test]
async fn test_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = fetcher(&server)
        .process(TaskAction::Posts, &session(), &user(), &params(None))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Status(503)));
    assert!(!err.is_credential_failure());
}

/// Test that a malformed body is a decode failure
#[tokio::test]
async fn test_malformed_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = fetcher(&server)
        .process(TaskAction::Posts, &session(), &user(), &params(None))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Decode(_)));
}

/// Test that an unreachable service is a transport failure
#[tokio::test]
async fn test_unreachable_service() {
    let fetcher = RemoteFetcher::new(&FetcherConfig {
        endpoint: "http://127.0.0.1:1/fetch".to_string(),
        timeout_secs: 2,
        ..Default::default()
    })
    .unwrap();

    let err = fetcher
        .process(TaskAction::Posts, &session(), &user(), &params(None))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Transport(_)));
}
