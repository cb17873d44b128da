//! Cumulative token/cost/time accounting with per-agent breakdown and
//! budget checks.
//!
//! Follows `CostSummary`'s global-plus-per-scope-map shape, generalized
//! from "per-goal" totals to "per-agent" totals, and extended with the
//! budget-check/remaining-budget operations this spec requires.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::Usage;

/// Optional budget ceilings. Any field left `None` is vacuously satisfied.
#[derive(Debug, Clone, Copy, Default)]
pub struct Budget {
    pub max_tokens: Option<u64>,
    pub max_cost: Option<f64>,
    pub max_duration: Option<Duration>,
}

/// Per-agent accumulated usage.
#[derive(Debug, Clone, Default)]
pub struct AgentUsage {
    pub tokens: u64,
    pub cost: f64,
    pub runs: u64,
    pub duration: Duration,
}

/// One dimension's remaining headroom: a finite amount, or no configured
/// ceiling at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Remaining<T> {
    Unlimited,
    Amount(T),
}

struct Totals {
    tokens: u64,
    cost: f64,
    runs: u64,
}

struct Inner {
    started_at: Instant,
    totals: Totals,
    by_agent: HashMap<String, AgentUsage>,
}

/// Cumulative token/cost/time accounting across every agent invocation in a
/// run, with per-agent breakdown and budget checks.
pub struct ResourceTracker {
    budget: Budget,
    inner: Mutex<Inner>,
}

impl ResourceTracker {
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            inner: Mutex::new(Inner {
                started_at: Instant::now(),
                totals: Totals { tokens: 0, cost: 0.0, runs: 0 },
                by_agent: HashMap::new(),
            }),
        }
    }

    /// Record one agent invocation's usage against the running totals.
    pub fn track_agent_run(&self, agent_name: &str, usage: &Usage) {
        let mut inner = self.inner.lock().expect("resource tracker lock poisoned");
        inner.totals.tokens += usage.total_tokens;
        inner.totals.cost += usage.cost;
        inner.totals.runs += 1;

        let entry = inner.by_agent.entry(agent_name.to_string()).or_default();
        entry.tokens += usage.total_tokens;
        entry.cost += usage.cost;
        entry.runs += 1;
        entry.duration += usage.duration;
    }

    /// Total tokens consumed across every tracked run.
    pub fn total_tokens(&self) -> u64 {
        self.inner.lock().expect("resource tracker lock poisoned").totals.tokens
    }

    /// Total cost accrued across every tracked run.
    pub fn total_cost(&self) -> f64 {
        self.inner.lock().expect("resource tracker lock poisoned").totals.cost
    }

    /// Wall-clock time elapsed since construction or the last `reset()`.
    pub fn elapsed(&self) -> Duration {
        self.inner.lock().expect("resource tracker lock poisoned").started_at.elapsed()
    }

    /// Per-agent usage breakdown.
    pub fn agent_usage(&self, agent_name: &str) -> AgentUsage {
        self.inner
            .lock()
            .expect("resource tracker lock poisoned")
            .by_agent
            .get(agent_name)
            .cloned()
            .unwrap_or_default()
    }

    fn check_limit(current: f64, limit: Option<f64>) -> bool {
        limit.is_none_or(|limit| current < limit)
    }

    /// True iff every configured budget dimension (tokens, cost, time) is
    /// still strictly under its limit. A dimension with no configured limit
    /// is vacuously satisfied.
    pub fn is_within_budget(&self) -> bool {
        let inner = self.inner.lock().expect("resource tracker lock poisoned");
        let tokens_ok = Self::check_limit(inner.totals.tokens as f64, self.budget.max_tokens.map(|v| v as f64));
        let cost_ok = Self::check_limit(inner.totals.cost, self.budget.max_cost);
        let time_ok = Self::check_limit(
            inner.started_at.elapsed().as_secs_f64(),
            self.budget.max_duration.map(|d| d.as_secs_f64()),
        );
        tokens_ok && cost_ok && time_ok
    }

    /// Remaining headroom per dimension: `max(0, limit - used)`, or
    /// `Unlimited` if no ceiling is configured for that dimension.
    pub fn remaining_budget(&self) -> RemainingBudget {
        let inner = self.inner.lock().expect("resource tracker lock poisoned");
        RemainingBudget {
            tokens: match self.budget.max_tokens {
                None => Remaining::Unlimited,
                Some(limit) => Remaining::Amount(limit.saturating_sub(inner.totals.tokens)),
            },
            cost: match self.budget.max_cost {
                None => Remaining::Unlimited,
                Some(limit) => Remaining::Amount((limit - inner.totals.cost).max(0.0)),
            },
            time: match self.budget.max_duration {
                None => Remaining::Unlimited,
                Some(limit) => {
                    let used = inner.started_at.elapsed();
                    Remaining::Amount(limit.saturating_sub(used))
                }
            },
        }
    }

    /// Restart the clock and zero every counter.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("resource tracker lock poisoned");
        inner.started_at = Instant::now();
        inner.totals = Totals { tokens: 0, cost: 0.0, runs: 0 };
        inner.by_agent.clear();
    }
}

/// Remaining headroom across all three tracked dimensions.
#[derive(Debug, Clone, Copy)]
pub struct RemainingBudget {
    pub tokens: Remaining<u64>,
    pub cost: Remaining<f64>,
    pub time: Remaining<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn usage(tokens: u64, cost: f64) -> Usage {
        Usage::new(tokens / 2, tokens - tokens / 2, cost, Duration::from_millis(10))
    }

    #[test]
    fn reset_on_fresh_tracker_is_a_no_op() {
        let tracker = ResourceTracker::new(Budget::default());
        tracker.reset();
        assert_eq!(tracker.total_tokens(), 0);
        assert!(tracker.is_within_budget());
    }

    #[test]
    fn track_run_accumulates_totals_and_per_agent() {
        let tracker = ResourceTracker::new(Budget::default());
        tracker.track_agent_run("a1", &usage(100, 0.5));
        tracker.track_agent_run("a1", &usage(50, 0.25));
        tracker.track_agent_run("a2", &usage(10, 0.1));

        assert_eq!(tracker.total_tokens(), 160);
        assert_eq!(tracker.agent_usage("a1").tokens, 150);
        assert_eq!(tracker.agent_usage("a2").runs, 1);
    }

    #[test]
    fn budget_check_is_vacuous_when_unset() {
        let tracker = ResourceTracker::new(Budget::default());
        tracker.track_agent_run("a1", &usage(1_000_000, 1_000_000.0));
        assert!(tracker.is_within_budget());
    }

    #[test]
    fn budget_check_trips_strictly_at_limit() {
        let tracker = ResourceTracker::new(Budget { max_tokens: Some(100), ..Default::default() });
        tracker.track_agent_run("a1", &usage(100, 0.0));
        assert!(!tracker.is_within_budget());
    }

    #[test]
    fn remaining_budget_floors_at_zero() {
        let tracker = ResourceTracker::new(Budget { max_tokens: Some(100), ..Default::default() });
        tracker.track_agent_run("a1", &usage(150, 0.0));
        match tracker.remaining_budget().tokens {
            Remaining::Amount(v) => assert_eq!(v, 0),
            Remaining::Unlimited => panic!("expected Amount"),
        }
    }

    #[test]
    fn reset_zeros_counters_and_restarts_clock() {
        let tracker = ResourceTracker::new(Budget::default());
        tracker.track_agent_run("a1", &usage(100, 1.0));
        tracker.reset();
        assert_eq!(tracker.total_tokens(), 0);
        assert_eq!(tracker.total_cost(), 0.0);
    }
}
