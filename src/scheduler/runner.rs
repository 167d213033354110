//! Crawl scheduler
//!
//! One [`CrawlScheduler`] drives every task family. Each tick selects
//! candidates through the family's admission set, then handles every task
//! inside its own distributed lock:
//!
//! ```text
//! lock ─► re-read ─► admit ─► poll interval ─► touch ─► entity ─► session ─► fetch ─► cursor step ─► release
//!   │        │                     │                      │          │         │
//!   └ skip   └ vanished            └ skip (recent)        └ delete   └ abort   └ session backoff
//! ```
//!
//! Failures never escape a single task except "no session" (which ends the
//! family's tick) and coordination failures while planning (which skip it).

use std::collections::HashSet;
use std::sync::Arc;

use crate::clock::{as_micros, Clock, Micros};
use crate::config::{FamilyLimits, SchedulerConfig};
use crate::coordination::{AdmissionPlan, AdmissionSet, DistributedMutex, SharedCoordinator};
use crate::error::HarvestErrorTrait;
use crate::fetch::{FetchError, SharedFetcher};
use crate::metrics;
use crate::models::{Entity, Session, Target, Task, TaskParams, TaskStatus};
use crate::storage::{
    ApplyOutcome, RankQuery, SharedEntityRepository, SharedSessionRepository,
    SharedTaskRepository, SortDirection, SortField, StatusFilter, TaskUpdate,
};

use super::cursor::{CursorStep, StallGuard};
use super::error::{SchedulerError, SchedulerResult};
use super::family::{TargetKind, TaskFamily};
use super::session_pool::SessionPool;

// ============================================================================
// Outcomes
// ============================================================================

/// What happened to one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Another worker holds the lock
    Locked,
    /// Task deleted or no longer in the expected status
    Vanished,
    /// Touched within the minimum poll interval
    Recent,
    /// Target row is gone; task deleted
    EntityGone,
    /// Params name the wrong kind of target; task marked invalid
    Invalid,
    /// No session in the family's pool
    NoSession,
    /// Session rejected before or during the call
    SessionFailure(SessionFailureKind),
    /// Network or remote failure; retried next tick
    FetchFailed(String),
    /// Cursor advanced and score refreshed
    Advanced,
    /// Cursor advanced, score held back by the stall guard
    Stalled,
    /// Feed exhausted, task waits for flush
    Exhausted,
    /// Flush pass fetched the first page
    Flushed { items: usize },
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Vanished => "vanished",
            Self::Recent => "recent",
            Self::EntityGone => "entity_gone",
            Self::Invalid => "invalid",
            Self::NoSession => "no_session",
            Self::SessionFailure(_) => "session_failure",
            Self::FetchFailed(_) => "fetch_failed",
            Self::Advanced => "advanced",
            Self::Stalled => "stalled",
            Self::Exhausted => "exhausted",
            Self::Flushed { .. } => "flushed",
        }
    }

    /// Whether a remote call was made
    pub fn fetched(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed(_)
                | Self::Advanced
                | Self::Stalled
                | Self::Exhausted
                | Self::Flushed { .. }
        ) || matches!(self, Self::SessionFailure(kind) if *kind != SessionFailureKind::Blocked)
    }
}

/// Why a session could not serve a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFailureKind {
    /// Credential rejected; the session is revoked
    Unauthorized,
    /// Throttled by the remote; the session cools down
    RateLimited,
    /// Still cooling down; no remote call was made
    Blocked,
}

impl SessionFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::Blocked => "blocked",
        }
    }
}

/// Summary of one family tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub family: &'static str,
    pub candidates: usize,
    pub locked: usize,
    pub recent: usize,
    pub advanced: usize,
    pub stalled: usize,
    pub exhausted: usize,
    pub flushed: usize,
    pub entity_gone: usize,
    pub invalid: usize,
    pub vanished: usize,
    pub session_failures: usize,
    pub fetch_failures: usize,
    pub errors: usize,
    /// Admission members dropped because they stopped being eligible
    pub evicted: usize,
    /// Tick ended early for lack of a session
    pub aborted: bool,
}

impl TickReport {
    fn new(family: &TaskFamily) -> Self {
        Self {
            family: family.name,
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Locked => self.locked += 1,
            TaskOutcome::Vanished => self.vanished += 1,
            TaskOutcome::Recent => self.recent += 1,
            TaskOutcome::EntityGone => self.entity_gone += 1,
            TaskOutcome::Invalid => self.invalid += 1,
            TaskOutcome::NoSession => self.aborted = true,
            TaskOutcome::SessionFailure(_) => self.session_failures += 1,
            TaskOutcome::FetchFailed(_) => self.fetch_failures += 1,
            TaskOutcome::Advanced => self.advanced += 1,
            TaskOutcome::Stalled => self.stalled += 1,
            TaskOutcome::Exhausted => self.exhausted += 1,
            TaskOutcome::Flushed { .. } => self.flushed += 1,
        }
    }

    /// Count a step that failed outright; returns its category label
    fn record_error(&mut self, err: &SchedulerError) -> &'static str {
        self.errors += 1;
        err.category().as_str()
    }

    fn result(&self) -> &'static str {
        if self.aborted {
            "aborted"
        } else if self.errors > 0 {
            "partial"
        } else {
            "ok"
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Collaborators the scheduler runs against
#[derive(Clone)]
pub struct SchedulerDeps {
    pub tasks: SharedTaskRepository,
    pub sessions: SharedSessionRepository,
    pub entities: SharedEntityRepository,
    pub fetcher: SharedFetcher,
    pub coordinator: SharedCoordinator,
    pub clock: Arc<dyn Clock>,
}

/// Which pass a locked task is handled by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Process,
    Flush,
}

/// Crawl scheduler for every task family
pub struct CrawlScheduler {
    tasks: SharedTaskRepository,
    entities: SharedEntityRepository,
    sessions: SessionPool,
    fetcher: SharedFetcher,
    coordinator: SharedCoordinator,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl CrawlScheduler {
    pub fn new(config: SchedulerConfig, deps: SchedulerDeps) -> Self {
        let sessions = SessionPool::new(
            deps.sessions,
            config.storage_node,
            config.rate_limit_cooldown(),
            deps.clock.clone(),
        );
        Self {
            tasks: deps.tasks,
            entities: deps.entities,
            sessions,
            fetcher: deps.fetcher,
            coordinator: deps.coordinator,
            clock: deps.clock,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionPool {
        &self.sessions
    }

    /// Admission set of a family
    pub fn admission(&self, family: &TaskFamily) -> AdmissionSet {
        AdmissionSet::new(
            self.coordinator.clone(),
            family.admission_key(&self.config.key_prefix),
            family.capacity,
        )
    }

    /// Configured batch sizes of a family
    pub fn limits(&self, family: &TaskFamily) -> FamilyLimits {
        match family.action {
            crate::models::TaskAction::Replies => self.config.replies,
            crate::models::TaskAction::UserPosts => self.config.user_posts,
            _ => self.config.posts,
        }
    }

    /// Count a family's tasks by status
    pub async fn count_tasks(
        &self,
        family: &TaskFamily,
        status: &StatusFilter,
    ) -> SchedulerResult<u64> {
        self.tasks
            .count(Some(family.action), status)
            .await
            .map_err(|e| SchedulerError::store("count tasks", e))
    }

    fn now(&self) -> Micros {
        self.clock.now_micros()
    }

    fn stall_guard(&self, family: &TaskFamily) -> StallGuard {
        StallGuard::new(family.low_yield_threshold, self.config.stall_timeout())
    }

    // ------------------------------------------------------------------------
    // Ticks
    // ------------------------------------------------------------------------

    /// Run one process tick for a family
    pub async fn process(&self, family: &TaskFamily, limit: usize) -> SchedulerResult<TickReport> {
        let mut report = TickReport::new(family);
        let set = self.admission(family);

        let mut plan = set
            .plan()
            .await
            .map_err(|e| SchedulerError::coordination("admission plan", e))?;

        let candidates = self.candidates(&set, &mut plan, family, limit, &mut report).await?;
        report.candidates = candidates.len();
        metrics::set_admission_size(family.name, plan.size);

        tracing::debug!(
            family = family.name,
            candidates = candidates.len(),
            admitted = plan.size,
            capacity = plan.capacity,
            restricted = plan.is_restricted(),
            "Process tick"
        );

        for task in &candidates {
            match self.run_locked(Pass::Process, family, &set, &mut plan, &task.id).await {
                Ok(outcome) => {
                    metrics::record_task_outcome(family.name, outcome.as_str());
                    report.record(&outcome);
                    if outcome == TaskOutcome::NoSession {
                        tracing::warn!(family = family.name, "No usable session, aborting tick");
                        break;
                    }
                }
                Err(e) => {
                    let category = report.record_error(&e);
                    tracing::warn!(
                        family = family.name,
                        task_id = %task.id,
                        category,
                        recoverable = e.is_recoverable(),
                        error = %e,
                        "Task failed"
                    );
                    metrics::record_task_error(family.name, category);
                }
            }
        }

        metrics::set_admission_size(family.name, plan.size);
        metrics::record_tick(family.name, report.result());
        Ok(report)
    }

    /// Run one flush tick for a family
    ///
    /// Exhausted tasks get their first page re-fetched so items published
    /// since the crawl finished are picked up. Status is left unchanged.
    pub async fn flush(&self, family: &TaskFamily, limit: usize) -> SchedulerResult<TickReport> {
        let mut report = TickReport::new(family);
        let set = self.admission(family);
        let mut plan = AdmissionPlan {
            size: 0,
            capacity: 0,
            restrict_to: None,
        };

        let query = RankQuery::new(limit)
            .action(family.action)
            .status(StatusFilter::Is(TaskStatus::FlushPending))
            .sort_by(SortField::Timestamp, SortDirection::Asc);
        let candidates = self
            .tasks
            .rank(&query)
            .await
            .map_err(|e| SchedulerError::store("rank flush candidates", e))?;
        report.candidates = candidates.len();

        for task in &candidates {
            match self.run_locked(Pass::Flush, family, &set, &mut plan, &task.id).await {
                Ok(outcome) => {
                    metrics::record_task_outcome(family.name, outcome.as_str());
                    report.record(&outcome);
                    if outcome == TaskOutcome::NoSession {
                        tracing::warn!(family = family.name, "No usable session, aborting flush");
                        break;
                    }
                }
                Err(e) => {
                    let category = report.record_error(&e);
                    tracing::warn!(
                        family = family.name,
                        task_id = %task.id,
                        category,
                        recoverable = e.is_recoverable(),
                        error = %e,
                        "Flush failed"
                    );
                    metrics::record_task_error(family.name, category);
                }
            }
        }

        metrics::record_tick(family.name, report.result());
        Ok(report)
    }

    /// Handle a single task outside a tick
    pub async fn process_task(
        &self,
        family: &TaskFamily,
        task_id: &str,
    ) -> SchedulerResult<TaskOutcome> {
        let set = self.admission(family);
        let mut plan = set
            .plan()
            .await
            .map_err(|e| SchedulerError::coordination("admission plan", e))?;
        let outcome = self
            .run_locked(Pass::Process, family, &set, &mut plan, task_id)
            .await?;
        metrics::record_task_outcome(family.name, outcome.as_str());
        Ok(outcome)
    }

    /// Select this tick's candidates
    ///
    /// At capacity, only members are candidates; members the store no longer
    /// reports as pending are evicted so the set cannot wedge.
    async fn candidates(
        &self,
        set: &AdmissionSet,
        plan: &mut AdmissionPlan,
        family: &TaskFamily,
        limit: usize,
        report: &mut TickReport,
    ) -> SchedulerResult<Vec<Task>> {
        let query = RankQuery::new(limit)
            .action(family.action)
            .sort_by(SortField::Timestamp, SortDirection::Asc);

        let Some(members) = plan.restrict_to.clone() else {
            return self
                .tasks
                .rank(&query)
                .await
                .map_err(|e| SchedulerError::store("rank candidates", e));
        };

        let mut query = query.ids(members.clone());
        query.limit = limit.max(members.len());
        let mut tasks = self
            .tasks
            .rank(&query)
            .await
            .map_err(|e| SchedulerError::store("rank members", e))?;

        let evicted = {
            let live: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
            set.reconcile(&members, &live)
                .await
                .map_err(|e| SchedulerError::coordination("reconcile admission", e))?
        };
        plan.size = plan.size.saturating_sub(evicted.len());
        report.evicted = evicted.len();

        tasks.truncate(limit);
        Ok(tasks)
    }

    /// Hold the task's lock for the duration of one pass
    async fn run_locked(
        &self,
        pass: Pass,
        family: &TaskFamily,
        set: &AdmissionSet,
        plan: &mut AdmissionPlan,
        task_id: &str,
    ) -> SchedulerResult<TaskOutcome> {
        let prefix = &self.config.key_prefix;
        let key = match pass {
            Pass::Process => family.process_lock_key(prefix, task_id),
            Pass::Flush => family.flush_lock_key(prefix, task_id),
        };
        let mutex = DistributedMutex::new(self.coordinator.clone(), key);
        if !mutex.acquire(self.config.lock_ttl()).await {
            tracing::debug!(family = family.name, task_id, "Task locked by another worker");
            return Ok(TaskOutcome::Locked);
        }

        let result = match pass {
            Pass::Process => self.process_locked(family, set, plan, task_id).await,
            Pass::Flush => self.flush_locked(family, task_id).await,
        };

        if !mutex.release().await {
            tracing::warn!(family = family.name, task_id, "Lock lease expired before release");
        }
        result
    }

    // ------------------------------------------------------------------------
    // Critical sections
    // ------------------------------------------------------------------------

    async fn process_locked(
        &self,
        family: &TaskFamily,
        set: &AdmissionSet,
        plan: &mut AdmissionPlan,
        task_id: &str,
    ) -> SchedulerResult<TaskOutcome> {
        let now = self.now();

        let task = self
            .tasks
            .find(task_id)
            .await
            .map_err(|e| SchedulerError::store("load task", e))?;
        let mut task = match task {
            Some(task) if task.status == TaskStatus::Pending && task.action == family.action => {
                task
            }
            other => {
                if other.map_or(true, |t| !t.status.is_eligible()) {
                    set.remove(task_id)
                        .await
                        .map_err(|e| SchedulerError::coordination("admission remove", e))?;
                }
                return Ok(TaskOutcome::Vanished);
            }
        };

        let mut score = set
            .score(task_id)
            .await
            .map_err(|e| SchedulerError::coordination("admission score", e))?;
        if score.is_none()
            && set
                .admit(plan, task_id, now)
                .await
                .map_err(|e| SchedulerError::coordination("admission admit", e))?
        {
            tracing::debug!(family = family.name, task_id, size = plan.size, "Task admitted");
            score = Some(now);
        }

        if self.polled_recently(&task, now) {
            tracing::debug!(family = family.name, task_id, "Polled too recently, skipping");
            return Ok(TaskOutcome::Recent);
        }
        self.touch(task_id, now).await?;

        let entity = match self.resolve_entity(family, &task).await? {
            Resolved::Found(entity) => entity,
            Resolved::Gone => {
                self.drop_task(set, task_id).await?;
                tracing::info!(family = family.name, task_id, "Target gone, task deleted");
                return Ok(TaskOutcome::EntityGone);
            }
            Resolved::WrongKind => {
                self.invalidate(family, set, &task).await?;
                return Ok(TaskOutcome::Invalid);
            }
        };

        let session = match self
            .sessions
            .resolve(family.pool, &task.params.cursors)
            .await
            .map_err(|e| SchedulerError::store("resolve session", e))?
        {
            Some(session) => session,
            None => return Ok(TaskOutcome::NoSession),
        };

        let page = match self.fetch(family, &session, &entity, &task.params).await? {
            Ok(page) => page,
            Err(outcome) => return Ok(outcome),
        };

        let step = self.stall_guard(family).evaluate(&page, score, now);
        match &step {
            CursorStep::Exhaust => {
                task.params.cursors.clear();
                self.tasks
                    .update(
                        task_id,
                        &TaskUpdate::new()
                            .params(task.params)
                            .status(TaskStatus::FlushPending),
                    )
                    .await
                    .map_err(|e| SchedulerError::store("mark exhausted", e))?;
                if set
                    .remove(task_id)
                    .await
                    .map_err(|e| SchedulerError::coordination("admission remove", e))?
                {
                    plan.size = plan.size.saturating_sub(1);
                }
                tracing::info!(
                    family = family.name,
                    task_id,
                    name = %task.name,
                    account = %session.account,
                    "Feed exhausted, waiting for flush"
                );
                Ok(TaskOutcome::Exhausted)
            }
            CursorStep::Advance {
                cursor,
                refresh_score,
            } => {
                if *refresh_score {
                    set.refresh(task_id, now)
                        .await
                        .map_err(|e| SchedulerError::coordination("admission refresh", e))?;
                } else if family.is_low_yield(page.items) {
                    tracing::info!(
                        family = family.name,
                        task_id,
                        items = page.items,
                        threshold = family.low_yield_threshold,
                        "Low-yield page, holding admission score"
                    );
                }

                task.params.cursors.set(session.account.clone(), cursor.clone());
                self.tasks
                    .update(
                        task_id,
                        &TaskUpdate::new()
                            .params(task.params)
                            .status(TaskStatus::Pending),
                    )
                    .await
                    .map_err(|e| SchedulerError::store("store cursor", e))?;

                tracing::debug!(
                    family = family.name,
                    task_id,
                    account = %session.account,
                    items = page.items,
                    outcome = step.as_str(),
                    "Cursor advanced"
                );
                Ok(if *refresh_score {
                    TaskOutcome::Advanced
                } else {
                    TaskOutcome::Stalled
                })
            }
        }
    }

    async fn flush_locked(&self, family: &TaskFamily, task_id: &str) -> SchedulerResult<TaskOutcome> {
        let now = self.now();

        let task = self
            .tasks
            .find(task_id)
            .await
            .map_err(|e| SchedulerError::store("load task", e))?;
        let task = match task {
            Some(task) if task.status == TaskStatus::FlushPending => task,
            _ => return Ok(TaskOutcome::Vanished),
        };

        if self.polled_recently(&task, now) {
            tracing::debug!(family = family.name, task_id, "Flushed too recently, skipping");
            return Ok(TaskOutcome::Recent);
        }
        self.touch(task_id, now).await?;

        let entity = match self.resolve_entity(family, &task).await? {
            Resolved::Found(entity) => entity,
            Resolved::Gone => {
                self.tasks
                    .delete(task_id)
                    .await
                    .map_err(|e| SchedulerError::store("delete task", e))?;
                tracing::info!(family = family.name, task_id, "Target gone, task deleted");
                return Ok(TaskOutcome::EntityGone);
            }
            Resolved::WrongKind => {
                let set = self.admission(family);
                self.invalidate(family, &set, &task).await?;
                return Ok(TaskOutcome::Invalid);
            }
        };

        let session = match self
            .sessions
            .current()
            .await
            .map_err(|e| SchedulerError::store("resolve session", e))?
        {
            Some(session) => session,
            None => return Ok(TaskOutcome::NoSession),
        };

        let first_page = TaskParams::new(task.params.target.clone());
        match self.fetch(family, &session, &entity, &first_page).await? {
            Ok(page) => {
                tracing::info!(
                    family = family.name,
                    task_id,
                    name = %task.name,
                    items = page.items,
                    "Flushed first page"
                );
                Ok(TaskOutcome::Flushed { items: page.items })
            }
            Err(outcome) => Ok(outcome),
        }
    }

    fn polled_recently(&self, task: &Task, now: Micros) -> bool {
        now.saturating_sub(task.timestamp) < as_micros(self.config.min_poll_interval())
    }

    async fn touch(&self, task_id: &str, now: Micros) -> SchedulerResult<()> {
        self.tasks
            .update(task_id, &TaskUpdate::new().touch(now))
            .await
            .map_err(|e| SchedulerError::store("touch task", e))?;
        Ok(())
    }

    /// Take the session, fast-fail if it is cooling down, then call the fetcher
    ///
    /// The inner `Err` is the outcome to report when the call did not yield a
    /// page; session state has already been updated for it.
    async fn fetch(
        &self,
        family: &TaskFamily,
        session: &Session,
        entity: &Entity,
        params: &TaskParams,
    ) -> SchedulerResult<Result<crate::fetch::FetchPage, TaskOutcome>> {
        self.sessions
            .touch(session)
            .await
            .map_err(|e| SchedulerError::store("touch session", e))?;

        let result = match self.sessions.ensure_usable(session) {
            Ok(()) => {
                let _timer = metrics::start_fetch_timer(family.name);
                self.fetcher
                    .process(family.action, session, entity, params)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(page) => Ok(Ok(page)),
            Err(e) => {
                self.sessions
                    .record_failure(session, &e)
                    .await
                    .map_err(|e| SchedulerError::store("record session failure", e))?;
                Ok(Err(failure_outcome(family, entity, session, &e)))
            }
        }
    }

    async fn resolve_entity(&self, family: &TaskFamily, task: &Task) -> SchedulerResult<Resolved> {
        if !family.target.matches(&task.params.target) {
            return Ok(Resolved::WrongKind);
        }
        let id = task.params.target.id();
        let entity = match family.target {
            TargetKind::User => self
                .entities
                .find_user(id)
                .await
                .map_err(|e| SchedulerError::store("load user", e))?
                .map(Entity::User),
            TargetKind::Post => self
                .entities
                .find_post(id)
                .await
                .map_err(|e| SchedulerError::store("load post", e))?
                .map(Entity::Post),
        };
        Ok(entity.map_or(Resolved::Gone, Resolved::Found))
    }

    async fn drop_task(&self, set: &AdmissionSet, task_id: &str) -> SchedulerResult<()> {
        self.tasks
            .delete(task_id)
            .await
            .map_err(|e| SchedulerError::store("delete task", e))?;
        set.remove(task_id)
            .await
            .map_err(|e| SchedulerError::coordination("admission remove", e))?;
        Ok(())
    }

    async fn invalidate(
        &self,
        family: &TaskFamily,
        set: &AdmissionSet,
        task: &Task,
    ) -> SchedulerResult<()> {
        let err = SchedulerError::invalid_params(
            &task.id,
            format!(
                "expected a {} target, found {}",
                family.target.as_str(),
                task.params.target.kind()
            ),
        );
        tracing::warn!(task_id = %task.id, name = %task.name, error = %err, "Marking task invalid");
        self.tasks
            .update(&task.id, &TaskUpdate::new().status(TaskStatus::Invalid))
            .await
            .map_err(|e| SchedulerError::store("mark invalid", e))?;
        set.remove(&task.id)
            .await
            .map_err(|e| SchedulerError::coordination("admission remove", e))?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Apply
    // ------------------------------------------------------------------------

    /// Create or reactivate the task of a family for a target id
    pub async fn apply(&self, family: &TaskFamily, target_id: &str) -> SchedulerResult<ApplyOutcome> {
        let target = match family.target {
            TargetKind::User => Target::user(target_id),
            TargetKind::Post => Target::post(target_id),
        };
        let name = Task::name_for(target_id, family.suffix);
        let outcome = self
            .tasks
            .apply(&name, family.action, &TaskParams::new(target))
            .await
            .map_err(|e| SchedulerError::store("apply task", e))?;
        tracing::info!(family = family.name, name = %name, outcome = outcome.as_str(), "Task applied");
        Ok(outcome)
    }

    /// Ensure the user exists, then apply its posts crawl
    pub async fn apply_user_posts(
        &self,
        account: &str,
        remote_user_id: i64,
    ) -> SchedulerResult<ApplyOutcome> {
        let user = self
            .entities
            .ensure_user(account, remote_user_id)
            .await
            .map_err(|e| SchedulerError::store("ensure user", e))?;
        self.apply(&TaskFamily::POSTS, &user.id).await
    }

    pub async fn apply_replies(&self, post_id: &str) -> SchedulerResult<ApplyOutcome> {
        self.apply(&TaskFamily::REPLIES, post_id).await
    }

    pub async fn apply_user_timeline(&self, user_id: &str) -> SchedulerResult<ApplyOutcome> {
        self.apply(&TaskFamily::USER_TIMELINE, user_id).await
    }

    /// Apply replies crawls for the recent posts of the most active repliers
    ///
    /// Returns the number of tasks created or reactivated.
    pub async fn seed_replies(&self, limit: usize) -> SchedulerResult<usize> {
        let authors = self
            .entities
            .top_reply_authors(limit)
            .await
            .map_err(|e| SchedulerError::store("rank reply authors", e))?;

        let mut applied = 0;
        for user_id in &authors {
            let user = self
                .entities
                .find_user(user_id)
                .await
                .map_err(|e| SchedulerError::store("load user", e))?;
            if user.is_none() {
                tracing::debug!(user_id = %user_id, "Reply author not stored, skipping");
                continue;
            }

            let posts = self
                .entities
                .recent_posts(user_id, limit)
                .await
                .map_err(|e| SchedulerError::store("list recent posts", e))?;
            for post in &posts {
                if !matches!(self.apply_replies(&post.id).await?, ApplyOutcome::Unchanged(_)) {
                    applied += 1;
                }
            }
        }

        tracing::info!(authors = authors.len(), applied, "Seeded replies tasks");
        Ok(applied)
    }
}

impl std::fmt::Debug for CrawlScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlScheduler")
            .field("sessions", &self.sessions)
            .field("key_prefix", &self.config.key_prefix)
            .finish()
    }
}

enum Resolved {
    Found(Entity),
    Gone,
    WrongKind,
}

fn failure_outcome(
    family: &TaskFamily,
    entity: &Entity,
    session: &Session,
    err: &FetchError,
) -> TaskOutcome {
    if !err.is_credential_failure() {
        tracing::warn!(
            family = family.name,
            entity = %entity.id(),
            account = %session.account,
            category = err.category().as_str(),
            error = %err,
            "Fetch failed, retrying next tick"
        );
        return TaskOutcome::FetchFailed(err.to_string());
    }
    let kind = match err {
        FetchError::Unauthorized => SessionFailureKind::Unauthorized,
        FetchError::RateLimited => SessionFailureKind::RateLimited,
        _ => SessionFailureKind::Blocked,
    };
    if kind != SessionFailureKind::Blocked {
        tracing::warn!(
            family = family.name,
            entity = %entity.id(),
            account = %session.account,
            kind = kind.as_str(),
            error = %err,
            "Session failure"
        );
    }
    TaskOutcome::SessionFailure(kind)
}
