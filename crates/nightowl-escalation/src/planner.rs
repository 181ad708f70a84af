//! Pure tier-advancement arithmetic, dependency-free of the database so the
//! dry-run endpoint and the tick engine share one deterministic
//! implementation.

use nightowl_core::model::{EscalationPolicy, PlannedNotification};

/// The tiers `k` in `(current_tier, due_tier]` that `elapsed_minutes` has
/// newly made due, in ascending order. Empty if nothing is newly due
/// (including when the policy has already exhausted and not repeated).
pub fn newly_due_tiers(policy: &EscalationPolicy, current_tier: i32, elapsed_minutes: f64) -> Vec<i32> {
    let due_tier = policy.due_tier(elapsed_minutes);
    if due_tier <= current_tier {
        return Vec::new();
    }
    ((current_tier + 1)..=due_tier).collect()
}

/// Whether tier `k` is the policy's last tier and a repeat cycle should
/// begin once it has been notified.
pub fn is_final_tier(policy: &EscalationPolicy, tier: i32) -> bool {
    tier == policy.tier_count()
}

/// The full deterministic sequence of planned notifications the engine
/// would emit across `elapsed_minutes`, expanding repeat cycles up to
/// `repeat_count` additional passes. Used by the dry-run endpoint.
pub fn plan(policy: &EscalationPolicy, elapsed_minutes: f64) -> Vec<PlannedNotification> {
    let mut planned = Vec::new();
    let mut cycle_base = 0.0;
    let mut remaining_repeats = policy.repeat_count;

    loop {
        let local_elapsed = elapsed_minutes - cycle_base;
        if local_elapsed < 0.0 {
            break;
        }
        let due = policy.due_tier(local_elapsed);
        for tier in &policy.tiers {
            if tier.tier > due {
                break;
            }
            planned.push(PlannedNotification {
                tier: tier.tier,
                cumulative_minutes: policy.cumulative_timeout(tier.tier),
                timeout_minutes: tier.timeout_minutes,
                notify_via: tier.notify_via.iter().copied().collect(),
                targets: tier.targets.clone(),
            });
        }
        if due < policy.tier_count() || remaining_repeats <= 0 {
            break;
        }
        remaining_repeats -= 1;
        cycle_base += policy.cumulative_timeout(policy.tier_count()) as f64;
    }
    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightowl_core::model::{EscalationTier, NotifyMethod, TargetSelector};
    use std::collections::HashSet;
    use uuid::Uuid;

    fn policy(repeat_count: i32) -> EscalationPolicy {
        EscalationPolicy {
            id: Uuid::new_v4(),
            name: "default".into(),
            repeat_count,
            tiers: vec![
                EscalationTier {
                    tier: 1,
                    timeout_minutes: 5,
                    notify_via: HashSet::from([NotifyMethod::MessagingDm]),
                    targets: vec![TargetSelector::OncallPrimary],
                },
                EscalationTier {
                    tier: 2,
                    timeout_minutes: 10,
                    notify_via: HashSet::from([NotifyMethod::Phone]),
                    targets: vec![TargetSelector::OncallSecondary],
                },
            ],
        }
    }

    #[test]
    fn newly_due_returns_nothing_before_first_timeout() {
        let p = policy(0);
        assert!(newly_due_tiers(&p, 0, 4.0).is_empty());
    }

    #[test]
    fn newly_due_returns_single_tier_crossing() {
        let p = policy(0);
        assert_eq!(newly_due_tiers(&p, 0, 5.0), vec![1]);
    }

    #[test]
    fn newly_due_returns_skipped_tiers_after_a_gap() {
        let p = policy(0);
        // Engine was down past both timeouts; both tiers are newly due.
        assert_eq!(newly_due_tiers(&p, 0, 20.0), vec![1, 2]);
    }

    #[test]
    fn is_final_tier_detects_last_tier() {
        let p = policy(0);
        assert!(!is_final_tier(&p, 1));
        assert!(is_final_tier(&p, 2));
    }

    #[test]
    fn plan_without_repeat_stops_at_final_tier() {
        let p = policy(0);
        let planned = plan(&p, 100.0);
        assert_eq!(planned.len(), 2);
        assert_eq!(planned.last().unwrap().tier, 2);
    }

    #[test]
    fn plan_with_repeat_cycles_back_to_tier_one() {
        let p = policy(1);
        // Full cycle is 15 minutes; at t=20 we're 5 minutes into the repeat.
        let planned = plan(&p, 20.0);
        let tiers: Vec<i32> = planned.iter().map(|p| p.tier).collect();
        assert_eq!(tiers, vec![1, 2, 1]);
    }
}
