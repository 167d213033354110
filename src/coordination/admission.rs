//! Bounded active-set admission control
//!
//! One ranked set per task family holds the ids of the tasks currently being
//! paginated, scored by their last page advance. While the set is below its
//! capacity, ticks pick from every eligible task and admit the ones they
//! touch. Once it is full, ticks only see the members, and nothing new gets in
//! until a member is removed on exhaustion.

use std::collections::HashSet;

use super::{CoordinationResult, SharedCoordinator};
use crate::clock::Micros;

/// Result of reading the set at the start of a tick
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionPlan {
    /// Members counted so far this tick
    pub size: usize,
    pub capacity: usize,
    /// Set when the family is at capacity: candidates must come from these ids
    pub restrict_to: Option<Vec<String>>,
}

impl AdmissionPlan {
    /// Whether another task may still be admitted this tick
    pub fn has_room(&self) -> bool {
        self.size < self.capacity
    }

    pub fn is_restricted(&self) -> bool {
        self.restrict_to.is_some()
    }
}

/// Capacity-bounded ranked set of task ids for one family
#[derive(Clone)]
pub struct AdmissionSet {
    store: SharedCoordinator,
    key: String,
    capacity: usize,
}

impl AdmissionSet {
    pub fn new(store: SharedCoordinator, key: impl Into<String>, capacity: usize) -> Self {
        Self {
            store,
            key: key.into(),
            capacity,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn cardinality(&self) -> CoordinationResult<usize> {
        self.store.zcard(&self.key).await
    }

    /// All members, oldest score first
    pub async fn members(&self) -> CoordinationResult<Vec<String>> {
        self.store.zrange(&self.key, 0, -1).await
    }

    /// Last refresh time of a member
    pub async fn score(&self, task_id: &str) -> CoordinationResult<Option<Micros>> {
        let score = self.store.zscore(&self.key, task_id).await?;
        Ok(score.map(|s| s as Micros))
    }

    /// Read the cardinality and decide how this tick selects candidates
    pub async fn plan(&self) -> CoordinationResult<AdmissionPlan> {
        let size = self.cardinality().await?;
        let restrict_to = if size >= self.capacity {
            Some(self.members().await?)
        } else {
            None
        };
        Ok(AdmissionPlan {
            size,
            capacity: self.capacity,
            restrict_to,
        })
    }

    /// Insert a non-member scored at `now` if the plan still has room
    pub async fn admit(
        &self,
        plan: &mut AdmissionPlan,
        task_id: &str,
        now: Micros,
    ) -> CoordinationResult<bool> {
        if !plan.has_room() {
            return Ok(false);
        }
        self.store.zadd(&self.key, task_id, now as f64).await?;
        plan.size += 1;
        Ok(true)
    }

    /// Mark a member as having made progress at `now`
    pub async fn refresh(&self, task_id: &str, now: Micros) -> CoordinationResult<()> {
        self.store.zadd(&self.key, task_id, now as f64).await
    }

    pub async fn remove(&self, task_id: &str) -> CoordinationResult<bool> {
        self.store.zrem(&self.key, task_id).await
    }

    /// Drop members of a full set that are no longer eligible
    ///
    /// `members` is the membership the plan was built from and `live` the
    /// subset the task store still reports as schedulable. Returns the ids
    /// that were removed.
    pub async fn reconcile(
        &self,
        members: &[String],
        live: &HashSet<&str>,
    ) -> CoordinationResult<Vec<String>> {
        let mut removed = Vec::new();
        for member in members {
            if live.contains(member.as_str()) {
                continue;
            }
            if self.store.zrem(&self.key, member).await? {
                removed.push(member.clone());
            }
        }
        if !removed.is_empty() {
            tracing::info!(key = %self.key, removed = ?removed, "Evicted stale admission members");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for AdmissionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionSet")
            .field("key", &self.key)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryCoordinator;
    use std::sync::Arc;

    fn set(capacity: usize) -> AdmissionSet {
        AdmissionSet::new(Arc::new(MemoryCoordinator::new()), "harvester:tasks:posts:target", capacity)
    }

    #[tokio::test]
    async fn test_plan_is_open_below_capacity() {
        let set = set(2);
        let mut plan = set.plan().await.unwrap();
        assert_eq!(plan.size, 0);
        assert!(!plan.is_restricted());

        assert!(set.admit(&mut plan, "t1", 100).await.unwrap());
        assert!(set.admit(&mut plan, "t2", 200).await.unwrap());
        assert!(!set.admit(&mut plan, "t3", 300).await.unwrap());
        assert_eq!(set.cardinality().await.unwrap(), 2);
        assert_eq!(set.score("t3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_plan_restricts_to_members_at_capacity() {
        let set = set(2);
        let mut plan = set.plan().await.unwrap();
        set.admit(&mut plan, "t2", 200).await.unwrap();
        set.admit(&mut plan, "t1", 100).await.unwrap();

        let plan = set.plan().await.unwrap();
        assert!(!plan.has_room());
        assert_eq!(plan.restrict_to, Some(vec!["t1".to_string(), "t2".to_string()]));

        set.remove("t1").await.unwrap();
        let plan = set.plan().await.unwrap();
        assert!(plan.has_room());
        assert!(!plan.is_restricted());
    }

    #[tokio::test]
    async fn test_refresh_moves_score() {
        let set = set(3);
        let mut plan = set.plan().await.unwrap();
        set.admit(&mut plan, "t1", 100).await.unwrap();
        set.admit(&mut plan, "t2", 100).await.unwrap();

        set.refresh("t2", 500).await.unwrap();
        assert_eq!(set.score("t2").await.unwrap(), Some(500));
        assert_eq!(set.score("t1").await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_reconcile_drops_non_live_members() {
        let set = set(2);
        let mut plan = set.plan().await.unwrap();
        set.admit(&mut plan, "t1", 100).await.unwrap();
        set.admit(&mut plan, "gone", 200).await.unwrap();

        let members = set.members().await.unwrap();
        let live: HashSet<&str> = ["t1"].into_iter().collect();
        let removed = set.reconcile(&members, &live).await.unwrap();

        assert_eq!(removed, vec!["gone".to_string()]);
        assert_eq!(set.members().await.unwrap(), vec!["t1".to_string()]);
    }
}
