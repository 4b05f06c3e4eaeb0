// Property-based tests for ramp schedules
//
// Properties tested:
// 1. No overshoot: target(t) stays between the boundary targets of its stage
// 2. Total duration equals the sum of stage durations
// 3. Nothing is requested once the schedule has ended
// 4. Stage boundaries are hit exactly

use proptest::prelude::*;
use std::time::Duration;
use surge_core::{RampPlan, Stage};

fn stages_strategy() -> impl Strategy<Value = Vec<(u64, u32)>> {
    prop::collection::vec((1u64..=600_000, 0u32..=200), 1..=12)
}

fn build(start: u32, raw: &[(u64, u32)]) -> RampPlan {
    let stages = raw
        .iter()
        .map(|&(ms, target)| Stage::new(Duration::from_millis(ms), target))
        .collect();
    RampPlan::new(start, stages, Duration::ZERO).unwrap()
}

proptest! {
    #[test]
    fn prop_target_never_overshoots(
        start in 0u32..=200,
        raw in stages_strategy(),
        offset in any::<u64>(),
    ) {
        let plan = build(start, &raw);
        let total_ms = plan.total_duration().as_millis() as u64;
        let t = Duration::from_millis(offset % total_ms);

        let idx = plan.stage_index_at(t).expect("t is inside the schedule");
        let from = if idx == 0 { start } else { raw[idx - 1].1 } as f64;
        let to = raw[idx].1 as f64;

        let target = plan.target_at(t);
        prop_assert!(target >= from.min(to) - 1e-9, "{} below {}", target, from.min(to));
        prop_assert!(target <= from.max(to) + 1e-9, "{} above {}", target, from.max(to));

        let desired = plan.desired_at(t);
        prop_assert!(desired >= from.min(to) as u32);
        prop_assert!(desired <= from.max(to) as u32);
    }

    #[test]
    fn prop_total_duration_is_stage_sum(raw in stages_strategy()) {
        let plan = build(0, &raw);
        let expected: u64 = raw.iter().map(|&(ms, _)| ms).sum();
        prop_assert_eq!(plan.total_duration(), Duration::from_millis(expected));
    }

    #[test]
    fn prop_nothing_after_end(raw in stages_strategy(), extra_ms in 0u64..=3_600_000) {
        let plan = build(7, &raw);
        let t = plan.total_duration() + Duration::from_millis(extra_ms);
        prop_assert!(plan.is_finished(t));
        prop_assert_eq!(plan.desired_at(t), 0);
    }

    #[test]
    fn prop_boundaries_hit_exactly(start in 0u32..=200, raw in stages_strategy()) {
        let plan = build(start, &raw);
        let boundaries = plan.boundaries();
        // Every boundary except the last is the start of the next stage
        for boundary in &boundaries[..boundaries.len() - 1] {
            prop_assert_eq!(plan.desired_at(boundary.at), boundary.target);
        }
    }
}
