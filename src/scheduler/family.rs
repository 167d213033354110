//! Task family constants
//!
//! A family is one kind of crawl work sharing an admission set and a cursor
//! protocol instance. The action codes and capacities are shared with every
//! other worker reading the same task rows, so they must not drift.

use crate::models::{SessionStatus, TaskAction, Target};

use super::error::{SchedulerError, SchedulerResult};

/// What a family's tasks point at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    User,
    Post,
}

impl TargetKind {
    pub fn matches(&self, target: &Target) -> bool {
        matches!(
            (self, target),
            (Self::User, Target::User { .. }) | (Self::Post, Target::Post { .. })
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Post => "post",
        }
    }
}

/// Static description of a task family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFamily {
    /// Name used in coordination keys, logs and metrics
    pub name: &'static str,
    pub action: TaskAction,
    /// Admission set capacity
    pub capacity: usize,
    /// Pages with fewer items than this are low-yield
    pub low_yield_threshold: usize,
    /// Pool sessions are drawn from when no cursor owner is usable
    pub pool: SessionStatus,
    /// Suffix of the dedup name, `<target>@<suffix>`
    pub suffix: &'static str,
    pub target: TargetKind,
}

impl TaskFamily {
    /// Per-user timelines, first crawled with the privileged pool
    pub const POSTS: TaskFamily = TaskFamily {
        name: "posts",
        action: TaskAction::Posts,
        capacity: 20,
        low_yield_threshold: 20,
        pool: SessionStatus::Special,
        suffix: "posts",
        target: TargetKind::User,
    };

    /// Reply threads under a post
    pub const REPLIES: TaskFamily = TaskFamily {
        name: "replies",
        action: TaskAction::Replies,
        capacity: 50,
        low_yield_threshold: 10,
        pool: SessionStatus::Current,
        suffix: "replies",
        target: TargetKind::Post,
    };

    /// Posts and replies of a user, crawled on demand
    pub const USER_TIMELINE: TaskFamily = TaskFamily {
        name: "user_posts",
        action: TaskAction::UserPosts,
        capacity: 50,
        low_yield_threshold: 20,
        pool: SessionStatus::Special,
        suffix: "users:posts",
        target: TargetKind::User,
    };

    pub const ALL: [TaskFamily; 3] = [Self::POSTS, Self::REPLIES, Self::USER_TIMELINE];

    /// Look a family up by name or dedup suffix
    pub fn from_name(name: &str) -> SchedulerResult<Self> {
        Self::ALL
            .into_iter()
            .find(|family| family.name == name || family.suffix == name)
            .ok_or_else(|| SchedulerError::unknown_family(name))
    }

    /// Admission set key
    pub fn admission_key(&self, prefix: &str) -> String {
        format!("{prefix}:tasks:{}:target", self.name)
    }

    /// Lock key guarding a task's process step
    pub fn process_lock_key(&self, prefix: &str, task_id: &str) -> String {
        format!("locks:{prefix}:tasks:{}:process:{task_id}", self.name)
    }

    /// Lock key guarding a task's flush step
    pub fn flush_lock_key(&self, prefix: &str, task_id: &str) -> String {
        format!("locks:{prefix}:tasks:{}:flush:{task_id}", self.name)
    }

    /// Whether a page is below the stall-guard threshold
    pub fn is_low_yield(&self, items: usize) -> bool {
        items < self.low_yield_threshold
    }
}

impl std::fmt::Display for TaskFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_constants() {
        assert_eq!(TaskFamily::POSTS.action.code(), 1);
        assert_eq!(TaskFamily::REPLIES.action.code(), 2);
        assert_eq!(TaskFamily::USER_TIMELINE.action.code(), 6);
        assert_eq!(TaskFamily::POSTS.low_yield_threshold, 20);
        assert_eq!(TaskFamily::REPLIES.low_yield_threshold, 10);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(TaskFamily::from_name("posts").unwrap(), TaskFamily::POSTS);
        assert_eq!(
            TaskFamily::from_name("users:posts").unwrap(),
            TaskFamily::USER_TIMELINE
        );
        assert!(TaskFamily::from_name("media").is_err());
    }

    #[test]
    fn test_keys() {
        let family = TaskFamily::REPLIES;
        assert_eq!(family.admission_key("harvester"), "harvester:tasks:replies:target");
        assert_eq!(
            family.process_lock_key("harvester", "t1"),
            "locks:harvester:tasks:replies:process:t1"
        );
        assert_ne!(
            family.process_lock_key("harvester", "t1"),
            family.flush_lock_key("harvester", "t1")
        );
    }

    #[test]
    fn test_target_kind() {
        assert!(TargetKind::User.matches(&Target::user("u1")));
        assert!(!TargetKind::User.matches(&Target::post("p1")));
        assert!(TaskFamily::POSTS.is_low_yield(19));
        assert!(!TaskFamily::POSTS.is_low_yield(20));
    }
}
