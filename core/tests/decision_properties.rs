//! Whole-engine checks for the decision function: the universally
//! quantified safety properties, swept over a grid of sizes and usages, and
//! the end-to-end path from a parsed configuration file to an eligible
//! operation.

use castellum::decision::{eligible_operations, pick_winner, usage_percent, AssetStatus, ResourceLogic};
use castellum::models::{OperationReason, SizeConstraints, StepPolicy, Threshold, ThresholdMap, UsageMap, SINGULAR_METRIC};
use castellum::yamlconfig::YamlConfig;
use uuid::Uuid;

fn logic(low: f64, high: f64, critical: f64, step: StepPolicy, constraints: SizeConstraints) -> ResourceLogic {
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
        constraints,
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

/// Downsizes shrink, upsizes grow, nothing ever targets zero, and
/// configured min/max bounds hold, across a whole grid of observations.
#[test]
fn constraint_safety_over_grid() {
    let constraints = SizeConstraints {
        minimum_size: Some(5),
        maximum_size: Some(400),
        ..Default::default()
    };
    for step in [StepPolicy::Percent(20), StepPolicy::Single] {
        let logic = logic(20.0, 80.0, 95.0, step, constraints);
        for size in 0..=60u64 {
            for usage_tenths in 0..=700u64 {
                let usage = usage_tenths as f64 / 10.0;
                let ops = eligible_operations(&logic, &status(size, usage));
                for (reason, target) in &ops {
                    assert!(*target >= 1, "target 0 for {reason:?} at size={size} usage={usage}");
                    match reason {
                        OperationReason::Low => {
                            assert!(*target < size, "low target {target} >= size {size} at usage={usage}");
                            assert!(*target >= 5, "low target {target} under minimum_size at size={size} usage={usage}");
                        }
                        OperationReason::High | OperationReason::Critical => {
                            assert!(*target > size, "{reason:?} target {target} <= size {size} at usage={usage}");
                            assert!(*target <= 400, "{reason:?} target {target} over maximum_size at size={size} usage={usage}");
                        }
                    }
                }
            }
        }
    }
}

/// The winner is always the most urgent eligible reason.
#[test]
fn priority_order_over_grid() {
    let logic = logic(20.0, 80.0, 95.0, StepPolicy::Percent(20), SizeConstraints::default());
    for size in 1..=50u64 {
        for usage_tenths in 0..=600u64 {
            let usage = usage_tenths as f64 / 10.0;
            let ops = eligible_operations(&logic, &status(size, usage));
            if let Some((winner, _)) = pick_winner(&ops) {
                for reason in ops.keys() {
                    assert!(winner.priority() >= reason.priority());
                }
            }
        }
    }
}

/// A downsize target never re-crosses the high threshold it would have to
/// immediately undo.
#[test]
fn downsize_never_recrosses_high() {
    let logic = logic(20.0, 80.0, 95.0, StepPolicy::Single, SizeConstraints::default());
    for size in 1..=80u64 {
        for usage_tenths in 0..=(size * 10) {
            let usage = usage_tenths as f64 / 10.0;
            let ops = eligible_operations(&logic, &status(size, usage));
            if let Some(target) = ops.get(&OperationReason::Low) {
                assert!(
                    usage_percent(usage, *target) < 80.0,
                    "low target {target} puts usage {usage} at {}% (size was {size})",
                    usage_percent(usage, *target)
                );
            }
        }
    }
}

/// The decision engine is deterministic: same inputs, same outputs.
#[test]
fn decisions_are_deterministic() {
    let logic = logic(20.0, 80.0, 95.0, StepPolicy::Percent(15), SizeConstraints::default());
    let s = status(1234, 1100.0);
    let first = eligible_operations(&logic, &s);
    for _ in 0..10 {
        assert_eq!(first, eligible_operations(&logic, &s));
    }
}

/// Configuration-file ceilings feed straight into resource validation: a
/// resource under a matching `max_asset_sizes` rule must carry a compliant
/// `maximum_size`.
#[test]
fn config_ceiling_gates_resource_validation() {
    let raw = r#"
max_asset_sizes:
  - asset_type: nfs
    value: 1000
"#;
    let config = YamlConfig::parse(raw, "test.yaml").unwrap();
    let scope = Uuid::nil();
    let ceiling = config.max_asset_size("nfs", scope).unwrap();
    assert_eq!(ceiling, Some(1000));

    let mut thresholds = ThresholdMap::new();
    thresholds.insert(
        SINGULAR_METRIC.to_string(),
        Threshold {
            low: Some(20.0),
            high: Some(80.0),
            critical: Some(95.0),
        },
    );
    let mut resource = castellum::models::Resource {
        id: Uuid::nil(),
        scope_uuid: scope,
        asset_type: "nfs".to_string(),
        thresholds: sqlx::types::Json(thresholds),
        size_step_percent: Some(20),
        single_step: false,
        low_delay_seconds: 0,
        high_delay_seconds: 0,
        minimum_size: None,
        maximum_size: None,
        minimum_free_size: None,
        strict_minimum_size: None,
        strict_maximum_size: None,
        minimum_free_is_critical: false,
        requires_greenlight: false,
        config_json: serde_json::json!({}),
        scraped_at: None,
        asset_count: 0,
        scrape_error_message: None,
        seeded: false,
    };

    assert!(resource.validate(ceiling).is_err(), "missing maximum_size must be rejected");
    resource.maximum_size = Some(800);
    assert!(resource.validate(ceiling).is_ok());
    resource.maximum_size = Some(2000);
    assert!(resource.validate(ceiling).is_err(), "maximum_size above the ceiling must be rejected");
}
