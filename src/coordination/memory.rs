//! In-process coordination store
//!
//! Implements the same contract as the Redis backend against a mutex-guarded
//! map. Expiry is evaluated lazily against the injected [`Clock`], so tests
//! can expire a lease by advancing a [`ManualClock`](crate::clock::ManualClock).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{CoordinationError, CoordinationResult, CoordinationStore};
use crate::clock::{as_micros, Clock, Micros, SystemClock};

#[derive(Default)]
struct MemoryState {
    /// key -> (value, expires_at)
    strings: HashMap<String, (String, Micros)>,
    /// key -> member -> score
    zsets: HashMap<String, HashMap<String, f64>>,
}

impl MemoryState {
    fn live_value(&mut self, key: &str, now: Micros) -> Option<&String> {
        let expired = matches!(self.strings.get(key), Some((_, expires_at)) if *expires_at <= now);
        if expired {
            self.strings.remove(key);
        }
        self.strings.get(key).map(|(value, _)| value)
    }

    fn sorted_members(&self, key: &str) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = self
            .zsets
            .get(key)
            .map(|set| set.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }
}

/// Single-process coordination store
pub struct MemoryCoordinator {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl MemoryCoordinator {
    /// Create a store on the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store whose TTLs follow `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
        }
    }

    fn state(&self) -> CoordinationResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| CoordinationError::Backend("memory store lock poisoned".to_string()))
    }
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve Redis-style inclusive rank bounds against a length
fn rank_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl CoordinationStore for MemoryCoordinator {
    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> CoordinationResult<bool> {
        let now = self.clock.now_micros();
        let mut state = self.state()?;
        if state.live_value(key, now).is_some() {
            return Ok(false);
        }
        let expires_at = now.saturating_add(as_micros(ttl));
        state
            .strings
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> CoordinationResult<bool> {
        let now = self.clock.now_micros();
        let mut state = self.state()?;
        if state.live_value(key, now).map(String::as_str) == Some(value) {
            state.strings.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> CoordinationResult<()> {
        let mut state = self.state()?;
        state
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zcard(&self, key: &str) -> CoordinationResult<usize> {
        let state = self.state()?;
        Ok(state.zsets.get(key).map_or(0, HashMap::len))
    }

    async fn zscore(&self, key: &str, member: &str) -> CoordinationResult<Option<f64>> {
        let state = self.state()?;
        Ok(state.zsets.get(key).and_then(|set| set.get(member).copied()))
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> CoordinationResult<Vec<String>> {
        let state = self.state()?;
        let members = state.sorted_members(key);
        let Some((start, stop)) = rank_bounds(members.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(members[start..=stop].iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> CoordinationResult<bool> {
        let mut state = self.state()?;
        let Some(set) = state.zsets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member).is_some();
        if set.is_empty() {
            state.zsets.remove(key);
        }
        Ok(removed)
    }
}
