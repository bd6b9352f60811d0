//! Per-instance usage accounting.
//!
//! Totals only grow and live as long as the provider that owns them.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Rough token count when no billing API reports one: 1 token ~= 4 characters.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Cumulative usage for one provider instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub tokens_used: u64,
    /// Estimated cost in USD
    pub estimated_cost: f64,
    pub request_count: u64,
}

impl UsageStats {
    pub fn average_cost_per_request(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.estimated_cost / self.request_count as f64
        }
    }
}

/// Running totals shared by every provider.
#[derive(Debug, Default)]
pub struct UsageTracker {
    stats: Mutex<UsageStats>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request. Negative costs are ignored.
    pub fn track(&self, tokens: u64, cost: f64) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.tokens_used = stats.tokens_used.saturating_add(tokens);
        if cost.is_finite() && cost > 0.0 {
            stats.estimated_cost += cost;
        }
        stats.request_count += 1;
    }

    pub fn snapshot(&self) -> UsageStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("héllo wörld!"), 3);
    }

    #[test]
    fn test_starts_empty() {
        let tracker = UsageTracker::new();
        assert_eq!(tracker.snapshot(), UsageStats::default());
        assert_eq!(tracker.snapshot().average_cost_per_request(), 0.0);
    }

    #[test]
    fn test_accumulates() {
        let tracker = UsageTracker::new();
        tracker.track(10, 0.5);
        tracker.track(5, 0.25);
        let stats = tracker.snapshot();
        assert_eq!(stats.tokens_used, 15);
        assert_eq!(stats.request_count, 2);
        assert!((stats.estimated_cost - 0.75).abs() < 1e-12);
        assert!((stats.average_cost_per_request() - 0.375).abs() < 1e-12);
    }

    #[test]
    fn test_never_decreases() {
        let tracker = UsageTracker::new();
        tracker.track(10, 1.0);
        tracker.track(0, -3.0);
        tracker.track(0, f64::NAN);
        let stats = tracker.snapshot();
        assert_eq!(stats.tokens_used, 10);
        assert_eq!(stats.estimated_cost, 1.0);
        assert_eq!(stats.request_count, 3);
    }
}
