//! Common test utilities

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use harvester::clock::{Clock, ManualClock, Micros};
use harvester::config::SchedulerConfig;
use harvester::coordination::{AdmissionSet, MemoryCoordinator, SharedCoordinator};
use harvester::fetch::{FetchError, FetchPage, Fetcher};
use harvester::models::{Entity, Post, Session, SessionStatus, Task, TaskAction, TaskParams, User};
use harvester::scheduler::{CrawlScheduler, SchedulerDeps, TaskFamily};
use harvester::storage::{
    MockEntityRepository, MockSessionRepository, MockTaskRepository, TaskRepository,
};

/// Fixed start time for the manual clock
pub const START: Micros = 1_700_000_000_000_000;

/// One call seen by the stub fetcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub entity_id: String,
    pub account: String,
    pub cursor: Option<String>,
}

/// Fetcher returning scripted pages per entity
///
/// Entities without a script get a full page that continues.
pub struct StubFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Result<FetchPage, FetchError>>>>,
    calls: AtomicUsize,
    log: Mutex<Vec<FetchCall>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Queue pages for an entity
    pub fn script(&self, entity_id: &str, pages: &[(&str, usize)]) {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.entry(entity_id.to_string()).or_default();
        for (cursor, items) in pages {
            queue.push_back(Ok(FetchPage::new(*cursor, *items)));
        }
    }

    /// Queue a failure for an entity
    pub fn fail(&self, entity_id: &str, err: FetchError) {
        self.scripts
            .lock()
            .unwrap()
            .entry(entity_id.to_string())
            .or_default()
            .push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<FetchCall> {
        self.log.lock().unwrap().clone()
    }

    /// Cursors sent for one entity, in call order
    pub fn cursors_for(&self, entity_id: &str) -> Vec<Option<String>> {
        self.log()
            .into_iter()
            .filter(|call| call.entity_id == entity_id)
            .map(|call| call.cursor)
            .collect()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn process(
        &self,
        _action: TaskAction,
        session: &Session,
        entity: &Entity,
        params: &TaskParams,
    ) -> Result<FetchPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(FetchCall {
            entity_id: entity.id().to_string(),
            account: session.account.clone(),
            cursor: params.cursor_for(&session.account).map(str::to_string),
        });

        self.scripts
            .lock()
            .unwrap()
            .get_mut(entity.id())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(FetchPage::new("more", 100)))
    }
}

/// Scheduler wired to in-memory backends and a manual clock
pub struct Harness {
    pub tasks: Arc<MockTaskRepository>,
    pub sessions: Arc<MockSessionRepository>,
    pub entities: Arc<MockEntityRepository>,
    pub fetcher: Arc<StubFetcher>,
    pub coordinator: SharedCoordinator,
    pub clock: Arc<ManualClock>,
    pub scheduler: CrawlScheduler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let coordinator: SharedCoordinator = Arc::new(MemoryCoordinator::with_clock(clock.clone()));
        Self::build(config, clock, coordinator, Arc::new(StubFetcher::new()))
    }

    fn build(
        config: SchedulerConfig,
        clock: Arc<ManualClock>,
        coordinator: SharedCoordinator,
        fetcher: Arc<StubFetcher>,
    ) -> Self {
        let tasks = Arc::new(MockTaskRepository::new());
        let sessions = Arc::new(MockSessionRepository::new());
        let entities = Arc::new(MockEntityRepository::new());

        let scheduler = CrawlScheduler::new(
            config,
            SchedulerDeps {
                tasks: tasks.clone(),
                sessions: sessions.clone(),
                entities: entities.clone(),
                fetcher: fetcher.clone(),
                coordinator: coordinator.clone(),
                clock: clock.clone(),
            },
        );

        Self {
            tasks,
            sessions,
            entities,
            fetcher,
            coordinator,
            clock,
            scheduler,
        }
    }

    /// A second worker sharing every store and the clock
    pub fn worker(&self) -> CrawlScheduler {
        CrawlScheduler::new(
            self.scheduler.config().clone(),
            SchedulerDeps {
                tasks: self.tasks.clone(),
                sessions: self.sessions.clone(),
                entities: self.entities.clone(),
                fetcher: self.fetcher.clone(),
                coordinator: self.coordinator.clone(),
                clock: self.clock.clone(),
            },
        )
    }

    pub fn add_session(&self, account: &str, status: SessionStatus) -> Session {
        let session = Session {
            id: format!("session-{account}"),
            account: account.to_string(),
            node: self.scheduler.config().storage_node,
            agent: "harvester-test".to_string(),
            cookie: format!("auth_token={account}"),
            slot: 0,
            data: json!({}),
            unblocked_at: 0,
            timestamp: 0,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.sessions.insert(session.clone()).unwrap();
        session
    }

    pub fn add_user(&self, id: &str) -> User {
        let user = User {
            id: id.to_string(),
            account: format!("user-{id}"),
            remote_id: id.bytes().map(i64::from).sum(),
        };
        self.entities.insert_user(user.clone()).unwrap();
        user
    }

    pub fn add_post(&self, id: &str, user_id: &str, timestamp: Micros) -> Post {
        let post = Post {
            id: id.to_string(),
            user_id: user_id.to_string(),
            remote_id: timestamp,
            timestamp,
        };
        self.entities.insert_post(post.clone()).unwrap();
        post
    }

    /// Store a user and apply its posts task; returns the task id
    pub async fn posts_task(&self, user_id: &str) -> String {
        self.add_user(user_id);
        self.scheduler
            .apply(&TaskFamily::POSTS, user_id)
            .await
            .unwrap()
            .id()
            .to_string()
    }

    pub async fn task(&self, id: &str) -> Task {
        self.tasks.find(id).await.unwrap().expect("task exists")
    }

    pub async fn session(&self, account: &str) -> Session {
        use harvester::storage::SessionRepository;
        self.sessions
            .get_by_account(account)
            .await
            .unwrap()
            .expect("session exists")
    }

    pub fn admission(&self, family: &TaskFamily) -> AdmissionSet {
        self.scheduler.admission(family)
    }

    pub async fn members(&self, family: &TaskFamily) -> Vec<String> {
        let mut members = self.admission(family).members().await.unwrap();
        members.sort();
        members
    }

    pub fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }

    pub fn now(&self) -> Micros {
        self.clock.now_micros()
    }
}
