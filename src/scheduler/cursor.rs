//! Cursor continuation rules
//!
//! Decides what a fetched page does to a task: exhaust it, or advance its
//! cursor and maybe refresh its admission score. Pure so the stall guard can
//! be tested without a store.

use std::time::Duration;

use crate::clock::{as_micros, Micros};
use crate::fetch::FetchPage;

/// Outcome of applying one page to a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorStep {
    /// Feed exhausted: clear cursors, leave the admission set, flush next
    Exhaust,
    /// Feed continues at `cursor`
    Advance {
        cursor: String,
        /// Whether the admission score moves to now
        refresh_score: bool,
    },
}

impl CursorStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhaust => "exhausted",
            Self::Advance {
                refresh_score: true,
                ..
            } => "advanced",
            Self::Advance { .. } => "stalled",
        }
    }
}

/// Stall guard parameters for one family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallGuard {
    pub threshold: usize,
    pub timeout: Duration,
}

impl StallGuard {
    pub fn new(threshold: usize, timeout: Duration) -> Self {
        Self { threshold, timeout }
    }

    /// Apply a page to a task
    ///
    /// `member_score` is the task's admission score, `None` when the task is
    /// not a member. A zero-item page counts as low-yield like any other page
    /// under the threshold.
    pub fn evaluate(&self, page: &FetchPage, member_score: Option<Micros>, now: Micros) -> CursorStep {
        if page.is_exhausted() {
            return CursorStep::Exhaust;
        }

        let refresh_score = match member_score {
            None => false,
            Some(_) if page.items >= self.threshold => true,
            Some(score) => now.saturating_sub(score) >= as_micros(self.timeout),
        };

        CursorStep::Advance {
            cursor: page.cursor.clone(),
            refresh_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT_MS: u64 = 300_000;

    fn guard() -> StallGuard {
        StallGuard::new(20, Duration::from_millis(TIMEOUT_MS))
    }

    #[test]
    fn test_empty_cursor_exhausts() {
        let step = guard().evaluate(&FetchPage::new("", 50), Some(0), 0);
        assert_eq!(step, CursorStep::Exhaust);
    }

    #[test]
    fn test_full_page_refreshes_member() {
        let step = guard().evaluate(&FetchPage::new("abc", 25), Some(1_000), 2_000);
        assert_eq!(
            step,
            CursorStep::Advance {
                cursor: "abc".to_string(),
                refresh_score: true
            }
        );
        assert_eq!(step.as_str(), "advanced");
    }

    #[test]
    fn test_low_yield_waits_for_timeout() {
        let guard = guard();
        let page = FetchPage::new("xyz", 5);
        let score = 1_000_000;

        let early = guard.evaluate(&page, Some(score), score + 1_000);
        assert_eq!(early.as_str(), "stalled");

        let late = guard.evaluate(&page, Some(score), score + as_micros(Duration::from_millis(TIMEOUT_MS)));
        assert_eq!(late.as_str(), "advanced");
    }

    #[test]
    fn test_zero_items_is_low_yield() {
        let step = guard().evaluate(&FetchPage::new("dup", 0), Some(0), 1);
        assert_eq!(
            step,
            CursorStep::Advance {
                cursor: "dup".to_string(),
                refresh_score: false
            }
        );
    }

    #[test]
    fn test_non_member_never_refreshes() {
        let step = guard().evaluate(&FetchPage::new("abc", 100), None, 0);
        assert_eq!(step.as_str(), "stalled");
    }
}
