use std::time::Duration;

use proptest::prelude::*;
use swarm_core::resource::{Budget, Remaining, ResourceTracker};
use swarm_core::types::Usage;

fn usage_strategy() -> impl Strategy<Value = (u64, u64, f64)> {
    (0u64..1000, 0u64..1000, 0.0f64..100.0)
}

proptest! {
    /// However many runs are tracked, `total_tokens`/`total_cost` always
    /// equal the sum of the tracked usages, and `is_within_budget` agrees
    /// with a plain recomputation from those same totals against the
    /// configured ceiling.
    #[test]
    fn totals_match_recomputed_sum_and_budget_check_agrees(
        runs in prop::collection::vec(usage_strategy(), 0..40),
        max_tokens in prop::option::of(0u64..20_000),
    ) {
        let tracker = ResourceTracker::new(Budget { max_tokens, ..Budget::default() });
        let mut expected_tokens = 0u64;
        let mut expected_cost = 0.0f64;

        for (i, (input, output, cost)) in runs.iter().enumerate() {
            let usage = Usage::new(*input, *output, *cost, Duration::from_millis(1));
            tracker.track_agent_run(&format!("agent-{}", i % 3), &usage);
            expected_tokens += input + output;
            expected_cost += cost;
        }

        prop_assert_eq!(tracker.total_tokens(), expected_tokens);
        prop_assert!((tracker.total_cost() - expected_cost).abs() < 1e-6);

        let expected_within = max_tokens.is_none_or(|limit| expected_tokens < limit);
        prop_assert_eq!(tracker.is_within_budget(), expected_within);
    }

    /// Remaining token budget never goes negative and always equals
    /// `limit - used` while `used < limit`.
    #[test]
    fn remaining_budget_never_goes_negative(
        max_tokens in 1u64..5_000,
        used in prop::collection::vec(0u64..500, 0..20),
    ) {
        let tracker = ResourceTracker::new(Budget { max_tokens: Some(max_tokens), ..Budget::default() });
        let mut total = 0u64;
        for tokens in used {
            let usage = Usage::new(tokens, 0, 0.0, Duration::from_millis(1));
            tracker.track_agent_run("a", &usage);
            total += tokens;
        }

        match tracker.remaining_budget().tokens {
            Remaining::Amount(remaining) => {
                prop_assert_eq!(remaining, max_tokens.saturating_sub(total));
            }
            Remaining::Unlimited => prop_assert!(false, "budget was configured, must not report Unlimited"),
        }
    }
}
