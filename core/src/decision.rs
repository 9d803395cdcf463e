//! The autoscaling decision function. Pure, synchronous, no I/O —
//! `eligible_operations` maps a resource's policy and an asset's observed
//! state to the set of reasons for which a resize is currently warranted,
//! each paired with its eligible target size.

use std::collections::BTreeMap;

use crate::models::{OperationReason, SizeConstraints, StepPolicy, ThresholdMap, UsageMap, SINGULAR_METRIC};

/// A tiny margin used by the single-step policy so a computed target does
/// not sit exactly on a threshold boundary.
const EPSILON: f64 = 0.0001;

/// The policy inputs the decision engine needs, derived from a `Resource`
/// row but independent of persistence.
#[derive(Debug, Clone)]
pub struct ResourceLogic {
    pub thresholds: ThresholdMap,
    pub step: StepPolicy,
    pub constraints: SizeConstraints,
}

/// The observed state of one asset, as reported by the backend plugin.
#[derive(Debug, Clone)]
pub struct AssetStatus {
    pub size: u64,
    pub usage: UsageMap,
    /// Per-asset strict overrides reported by the backend; combined with the
    /// resource's own strict bounds by taking the tighter of the two.
    pub strict_min: Option<u64>,
    pub strict_max: Option<u64>,
}

/// `100 * usage / size`. A zero-sized asset maps zero usage to 0% and any
/// positive usage to 200% ("way over critical").
pub fn usage_percent(usage: f64, size: u64) -> f64 {
    if size == 0 {
        if usage > 0.0 {
            200.0
        } else {
            0.0
        }
    } else {
        100.0 * usage / size as f64
    }
}

fn combine_strict(resource: Option<u64>, asset: Option<u64>, tighter: impl Fn(u64, u64) -> u64) -> Option<u64> {
    match (resource, asset) {
        (Some(a), Some(b)) => Some(tighter(a, b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// The smallest integer size `s` such that `usage_percent(usage, s) <
/// threshold_pct`, i.e. the floor below which a downsize would re-cross
/// `threshold_pct`.
fn min_size_below_percent(usage: f64, threshold_pct: f64) -> u64 {
    if usage <= 0.0 || threshold_pct <= 0.0 {
        return 1;
    }
    let boundary = usage * 100.0 / threshold_pct;
    (boundary.floor() as u64).saturating_add(1).max(1)
}

/// The largest integer size `s` such that `usage_percent(usage, s) >=
/// threshold_pct`, i.e. the ceiling above which an upsize would drop below
/// `threshold_pct`.
fn max_size_above_percent(usage: f64, threshold_pct: f64) -> u64 {
    if usage <= 0.0 || threshold_pct <= 0.0 {
        return u64::MAX;
    }
    let boundary = usage * 100.0 / threshold_pct;
    (boundary.floor() as u64).max(1)
}

/// Single-step target: the smallest size landing usage just under
/// `threshold_pct - EPSILON` (used for upsizes).
fn single_step_up_target(usage: f64, threshold_pct: f64) -> u64 {
    if usage <= 0.0 {
        return 1;
    }
    let safe_pct = (threshold_pct - EPSILON).max(EPSILON);
    (usage * 100.0 / safe_pct).ceil().max(1.0) as u64
}

/// Single-step target: the largest size landing usage just over
/// `threshold_pct + EPSILON` (used for downsizes).
fn single_step_down_target(usage: f64, threshold_pct: f64) -> u64 {
    if usage <= 0.0 {
        return 1;
    }
    let safe_pct = threshold_pct + EPSILON;
    ((usage * 100.0 / safe_pct).floor() as u64).max(1)
}

/// Returns, for every reason currently eligible, the boldest target size
/// that satisfies all constraints: smallest for `low`, largest for
/// `high`/`critical`.
pub fn eligible_operations(
    logic: &ResourceLogic,
    status: &AssetStatus,
) -> BTreeMap<OperationReason, u64> {
    let mut result = BTreeMap::new();

    // A zero-sized, zero-usage asset never produces an operation.
    if status.size == 0 && status.usage.values().all(|u| *u <= 0.0) {
        return result;
    }

    let strict_min = combine_strict(logic.constraints.strict_minimum_size, status.strict_min, u64::max);
    let strict_max = combine_strict(logic.constraints.strict_maximum_size, status.strict_max, u64::min);

    let forced_reason = if logic.constraints.minimum_free_is_critical {
        OperationReason::Critical
    } else {
        OperationReason::High
    };
    let forced_target = logic.constraints.minimum_free_size.map(|mfs| {
        let usage_val = status
            .usage
            .get(SINGULAR_METRIC)
            .copied()
            .unwrap_or_else(|| status.usage.values().cloned().fold(0.0, f64::max));
        mfs.saturating_add(usage_val.ceil().max(0.0) as u64)
    });
    let forced_active = forced_target.is_some_and(|t| status.size < t);

    for reason in [OperationReason::Low, OperationReason::High, OperationReason::Critical] {
        let mut min: u64 = 1;
        let mut max: u64 = u64::MAX;

        if reason == OperationReason::Low {
            if let Some(m) = logic.constraints.minimum_size {
                min = min.max(m);
            }
            // minimum_free_size is a lower bound for downsizing too.
            if let Some(mfs) = logic.constraints.minimum_free_size {
                let usage_val = status
                    .usage
                    .get(SINGULAR_METRIC)
                    .copied()
                    .unwrap_or_else(|| status.usage.values().cloned().fold(0.0, f64::max));
                min = min.max(mfs.saturating_add(usage_val.ceil().max(0.0) as u64));
            }
        } else if let Some(m) = logic.constraints.maximum_size {
            max = max.min(m);
        }

        if let Some(sm) = strict_min {
            min = min.max(sm);
        }
        if let Some(sx) = strict_max {
            max = max.min(sx);
        }

        // Cross-threshold guard: a downsize must not push any metric past
        // its high (or, failing that, critical) threshold; an upsize must
        // not drop any metric below its low threshold.
        if reason == OperationReason::Low {
            let mut guard_min = 0u64;
            for (metric, usage) in &status.usage {
                if let Some(th) = logic.thresholds.get(metric) {
                    if let Some(upper) = th.high.or(th.critical) {
                        guard_min = guard_min.max(min_size_below_percent(*usage, upper));
                    }
                }
            }
            let candidate_min = min.max(guard_min);
            if candidate_min > max {
                // Guard unsatisfiable: high/critical win over low.
                continue;
            }
            min = candidate_min;
        } else {
            let mut guard_max = u64::MAX;
            for (metric, usage) in &status.usage {
                if let Some(low) = logic.thresholds.get(metric).and_then(|th| th.low) {
                    guard_max = guard_max.min(max_size_above_percent(*usage, low));
                }
            }
            let candidate_max = max.min(guard_max);
            if min > candidate_max {
                // Guard unsatisfiable: high/critical win over low, so the
                // low-floor guard is dropped rather than blocking the upsize.
            } else {
                max = candidate_max;
            }
        }

        if min > max {
            continue;
        }

        // Threshold trigger.
        let mut active = status.usage.iter().any(|(metric, usage)| {
            logic.thresholds.get(metric).is_some_and(|th| {
                let pct = usage_percent(*usage, status.size);
                match reason {
                    OperationReason::Low => th.low.is_some_and(|t| pct <= t),
                    OperationReason::High => th.high.is_some_and(|t| pct >= t),
                    OperationReason::Critical => th.critical.is_some_and(|t| pct >= t),
                }
            })
        });
        if reason == forced_reason && forced_active {
            active = true;
        }
        if !active {
            continue;
        }

        // Candidate target.
        let mut candidate = match (reason, logic.step) {
            (OperationReason::Low, StepPolicy::Percent(pct)) => {
                let step = status.size * pct as u64 / 100;
                status.size.saturating_sub(step).max(1)
            }
            (OperationReason::High, StepPolicy::Percent(pct)) => {
                let step = status.size * pct as u64 / 100;
                status.size.saturating_add(step.max(1))
            }
            (OperationReason::Critical, StepPolicy::Percent(pct)) => {
                if status.size == 0 {
                    1
                } else {
                    // Keep stepping until no metric is critical anymore; the
                    // step is recomputed against the growing size.
                    let mut s = status.size;
                    loop {
                        let step = (s * pct as u64 / 100).max(1);
                        s = s.saturating_add(step);
                        let still_critical = status.usage.iter().any(|(m, u)| {
                            logic
                                .thresholds
                                .get(m)
                                .and_then(|th| th.critical)
                                .is_some_and(|t| usage_percent(*u, s) >= t)
                        });
                        if !still_critical {
                            break;
                        }
                    }
                    s
                }
            }
            (OperationReason::Low, StepPolicy::Single) => status
                .usage
                .iter()
                .filter_map(|(metric, usage)| {
                    logic
                        .thresholds
                        .get(metric)
                        .and_then(|th| th.low)
                        .map(|low| single_step_down_target(*usage, low))
                })
                .min()
                .unwrap_or(1),
            (OperationReason::High, StepPolicy::Single) => status
                .usage
                .iter()
                .filter_map(|(metric, usage)| {
                    logic
                        .thresholds
                        .get(metric)
                        .and_then(|th| th.high)
                        .map(|high| single_step_up_target(*usage, high))
                })
                .max()
                .unwrap_or(1),
            (OperationReason::Critical, StepPolicy::Single) => status
                .usage
                .iter()
                .filter_map(|(metric, usage)| {
                    logic.thresholds.get(metric).map(|th| {
                        // A single step is meant to land in one jump, so it
                        // must clear the high threshold too when one exists.
                        let crit_target = th.critical.map(|c| single_step_up_target(*usage, c)).unwrap_or(1);
                        let high_target = th.high.map(|h| single_step_up_target(*usage, h)).unwrap_or(1);
                        crit_target.max(high_target)
                    })
                })
                .max()
                .unwrap_or(1),
        };

        if reason == forced_reason {
            if let Some(ft) = forced_target {
                candidate = candidate.max(ft);
            }
        }

        let clamped = candidate.clamp(min, max);

        let moves_correctly = match reason {
            OperationReason::Low => clamped < status.size,
            OperationReason::High | OperationReason::Critical => clamped > status.size,
        };
        if !moves_correctly {
            continue;
        }

        result.insert(reason, clamped);
    }

    result
}

/// Picks the single most urgent eligible operation: `critical > high > low`.
pub fn pick_winner(ops: &BTreeMap<OperationReason, u64>) -> Option<(OperationReason, u64)> {
    ops.iter().max_by_key(|(r, _)| r.priority()).map(|(r, t)| (*r, *t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SizeConstraints, Threshold, SINGULAR_METRIC};

    fn single_metric_logic(low: f64, high: f64, critical: f64, step: StepPolicy) -> ResourceLogic {
        let mut thresholds = ThresholdMap::new();
        thresholds.insert(
            SINGULAR_METRIC.to_string(),
            Threshold {
                low: Some(low),
                high: Some(high),
                critical: Some(critical),
            },
        );
        ResourceLogic {
            thresholds,
            step,
            constraints: SizeConstraints::default(),
        }
    }

    fn status(size: u64, usage: f64) -> AssetStatus {
        let mut usage_map = UsageMap::new();
        usage_map.insert(SINGULAR_METRIC.to_string(), usage);
        AssetStatus {
            size,
            usage: usage_map,
            strict_min: None,
            strict_max: None,
        }
    }

    #[test]
    fn no_operation_mid_range() {
        let logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(20));
        let ops = eligible_operations(&logic, &status(1000, 500.0));
        assert!(ops.is_empty());
    }

    #[test]
    fn upsize_at_exactly_high_threshold() {
        let logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(20));
        let ops = eligible_operations(&logic, &status(1000, 800.0));
        assert_eq!(ops.get(&OperationReason::High), Some(&1200));
    }

    #[test]
    fn critical_usage_wins_over_high() {
        let logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(20));
        let ops = eligible_operations(&logic, &status(1000, 990.0));
        assert_eq!(ops.get(&OperationReason::Critical), Some(&1200));
        assert!(ops.contains_key(&OperationReason::High));
        assert_eq!(pick_winner(&ops), Some((OperationReason::Critical, 1200)));
    }

    #[test]
    fn critical_percentage_step_iterates_until_clear() {
        let logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(1));
        let ops = eligible_operations(&logic, &status(1380, 1350.0));
        assert_eq!(ops.get(&OperationReason::Critical), Some(&1434));
    }

    #[test]
    fn critical_single_step_lands_in_one_jump() {
        let mut thresholds = ThresholdMap::new();
        thresholds.insert(
            SINGULAR_METRIC.to_string(),
            Threshold {
                low: None,
                high: None,
                critical: Some(95.0),
            },
        );
        let logic = ResourceLogic {
            thresholds,
            step: StepPolicy::Single,
            constraints: SizeConstraints::default(),
        };
        let ops = eligible_operations(&logic, &status(1380, 1350.0));
        assert_eq!(ops.get(&OperationReason::Critical), Some(&1422));
    }

    #[test]
    fn critical_single_step_clears_high_threshold_when_configured() {
        let logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Single);
        let ops = eligible_operations(&logic, &status(1380, 1350.0));
        // One jump must land below high (80%) too, not just below critical:
        // ceil(1350 * 100 / 80) rather than ceil(1350 * 100 / 95).
        assert_eq!(ops.get(&OperationReason::Critical), Some(&1688));
    }

    #[test]
    fn zero_size_zero_usage_is_quiet() {
        let logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(20));
        let ops = eligible_operations(&logic, &status(0, 0.0));
        assert!(ops.is_empty());
    }

    #[test]
    fn zero_size_nonzero_usage_forces_critical_upsize() {
        let logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(20));
        let ops = eligible_operations(&logic, &status(0, 5.0));
        let (reason, target) = pick_winner(&ops).expect("expected an eligible op");
        assert_eq!(reason, OperationReason::Critical);
        assert!(target >= 1);
    }

    #[test]
    fn cross_guard_suppresses_low_at_tiny_sizes() {
        let logic = single_metric_logic(98.0, 99.0, 100.0, StepPolicy::Percent(1));
        let ops = eligible_operations(&logic, &status(15, 14.0));
        assert!(ops.is_empty(), "expected no operation, got {ops:?}");
    }

    #[test]
    fn never_resizes_below_one() {
        let logic = single_metric_logic(50.0, 80.0, 95.0, StepPolicy::Percent(90));
        let ops = eligible_operations(&logic, &status(2, 0.5));
        if let Some(&t) = ops.get(&OperationReason::Low) {
            assert!(t >= 1);
        }
    }

    #[test]
    fn respects_maximum_size_on_upsize() {
        let mut logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(50));
        logic.constraints.maximum_size = Some(1100);
        let ops = eligible_operations(&logic, &status(1000, 900.0));
        assert_eq!(ops.get(&OperationReason::High), Some(&1100));
    }

    #[test]
    fn respects_minimum_size_on_downsize() {
        let mut logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(50));
        logic.constraints.minimum_size = Some(900);
        let ops = eligible_operations(&logic, &status(1000, 100.0));
        assert_eq!(ops.get(&OperationReason::Low), Some(&900));
    }

    #[test]
    fn high_only_resource_never_downsizes() {
        let mut thresholds = ThresholdMap::new();
        thresholds.insert(
            SINGULAR_METRIC.to_string(),
            Threshold {
                low: None,
                high: Some(80.0),
                critical: None,
            },
        );
        let logic = ResourceLogic {
            thresholds,
            step: StepPolicy::Percent(20),
            constraints: SizeConstraints::default(),
        };
        assert!(eligible_operations(&logic, &status(1000, 10.0)).is_empty());
        let ops = eligible_operations(&logic, &status(1000, 900.0));
        assert_eq!(ops.get(&OperationReason::High), Some(&1200));
    }

    #[test]
    fn low_guard_uses_critical_when_high_unset() {
        let mut thresholds = ThresholdMap::new();
        thresholds.insert(
            SINGULAR_METRIC.to_string(),
            Threshold {
                low: Some(20.0),
                high: None,
                critical: Some(95.0),
            },
        );
        let logic = ResourceLogic {
            thresholds,
            step: StepPolicy::Percent(90),
            constraints: SizeConstraints::default(),
        };
        // A 90% shrink of 1000 would land at 100 with usage 100 => 100%,
        // past critical; the guard clamps the target to stay below it.
        let ops = eligible_operations(&logic, &status(1000, 100.0));
        let target = ops.get(&OperationReason::Low).copied().expect("expected low op");
        assert!(usage_percent(100.0, target) < 95.0, "target {target} re-crosses critical");
    }

    #[test]
    fn minimum_free_size_forces_upsize() {
        let mut logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(10));
        logic.constraints.minimum_free_size = Some(500);
        let ops = eligible_operations(&logic, &status(600, 550.0));
        let target = ops.get(&OperationReason::High).copied().expect("expected forced high");
        assert!(target >= 1050);
    }

    #[test]
    fn minimum_free_is_critical_promotes_reason() {
        let mut logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(10));
        logic.constraints.minimum_free_size = Some(500);
        logic.constraints.minimum_free_is_critical = true;
        let ops = eligible_operations(&logic, &status(600, 550.0));
        assert!(ops.contains_key(&OperationReason::Critical));
    }

    #[test]
    fn strict_maximum_caps_every_direction() {
        let mut logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(50));
        logic.constraints.strict_maximum_size = Some(1100);
        let ops = eligible_operations(&logic, &status(1000, 990.0));
        for (_, target) in &ops {
            assert!(*target <= 1100);
        }
    }

    #[test]
    fn asset_reported_strict_bound_tightens_resource_bound() {
        let mut logic = single_metric_logic(20.0, 80.0, 95.0, StepPolicy::Percent(50));
        logic.constraints.strict_maximum_size = Some(2000);
        let mut s = status(1000, 900.0);
        s.strict_max = Some(1100);
        let ops = eligible_operations(&logic, &s);
        assert_eq!(ops.get(&OperationReason::High), Some(&1100));
    }
}
