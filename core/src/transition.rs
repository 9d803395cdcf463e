//! The pure half of the pending-operation state machine: given the asset's
//! current pending operation (if any) and the decision engine's winning
//! eligible operation (if any), decide which transition the scraper should
//! execute. The persistence layer then carries the transition out in one
//! transaction; keeping the choice itself free of I/O makes the whole
//! lifecycle table testable without a database.

use chrono::{DateTime, Duration, Utc};

use crate::models::{OperationReason, PendingOperation, Resource};

/// What an asset scrape should do to the asset's pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to do: no operation is pending and none is warranted, or
    /// the pending operation is already greenlit and may be in flight at a
    /// worker, so the scraper must not touch it.
    None,
    /// Create a fresh pending operation.
    Create {
        reason: OperationReason,
        target: u64,
        auto_greenlight: bool,
    },
    /// The reason for the pending operation no longer holds: retire it as
    /// cancelled.
    Cancel,
    /// The warranted reason changed (low flipped to high, or critical
    /// superseded high): cancel the current operation and create a new one
    /// atomically.
    Replace {
        reason: OperationReason,
        target: u64,
        auto_greenlight: bool,
    },
    /// The same reason is still warranted: refresh the target size to the
    /// current decision, and confirm once the reason's delay has elapsed.
    Refresh { target: u64, confirm: Option<Confirm> },
}

/// The confirm step attached to a [`Transition::Refresh`], with or without
/// an immediate greenlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirm {
    pub greenlight: bool,
}

/// Whether a confirm carries an immediate greenlight: critical operations
/// always execute without waiting for a human; other reasons skip the
/// approval step only when the resource does not require one.
pub fn auto_greenlights(reason: OperationReason, resource: &Resource) -> bool {
    reason == OperationReason::Critical || !resource.requires_greenlight
}

/// Only critical operations skip the confirmation delay entirely and are
/// created already confirmed and greenlit. Everything else starts in
/// `created` and waits out its delay, whatever the approval policy says.
pub fn greenlights_at_creation(reason: OperationReason) -> bool {
    reason == OperationReason::Critical
}

/// The confirmation delay configured for a reason. Critical has none.
pub fn delay_for(resource: &Resource, reason: OperationReason) -> Duration {
    match reason {
        OperationReason::Low => Duration::seconds(resource.low_delay_seconds),
        OperationReason::High => Duration::seconds(resource.high_delay_seconds),
        OperationReason::Critical => Duration::zero(),
    }
}

pub fn plan_transition(
    current: Option<&PendingOperation>,
    winner: Option<(OperationReason, u64)>,
    resource: &Resource,
    now: DateTime<Utc>,
) -> Transition {
    match (current, winner) {
        (None, None) => Transition::None,
        (None, Some((reason, target))) => Transition::Create {
            reason,
            target,
            auto_greenlight: greenlights_at_creation(reason),
        },
        (Some(op), None) => {
            if op.is_greenlit() {
                Transition::None
            } else {
                Transition::Cancel
            }
        }
        (Some(op), Some((reason, target))) => {
            if op.is_greenlit() {
                Transition::None
            } else if op.reason == reason {
                let confirm = if op.is_confirmed() {
                    None
                } else if now >= op.created_at + delay_for(resource, op.reason) {
                    Some(Confirm {
                        greenlight: auto_greenlights(reason, resource),
                    })
                } else {
                    None
                };
                Transition::Refresh { target, confirm }
            } else {
                Transition::Replace {
                    reason,
                    target,
                    auto_greenlight: greenlights_at_creation(reason),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Threshold, ThresholdMap, UsageMap, SINGULAR_METRIC};
    use sqlx::types::Json;
    use uuid::Uuid;

    fn resource(requires_greenlight: bool) -> Resource {
        let mut thresholds = ThresholdMap::new();
        thresholds.insert(
            SINGULAR_METRIC.to_string(),
            Threshold {
                low: Some(20.0),
                high: Some(80.0),
                critical: Some(95.0),
            },
        );
        Resource {
            id: Uuid::nil(),
            scope_uuid: Uuid::nil(),
            asset_type: "nfs".into(),
            thresholds: Json(thresholds),
            size_step_percent: Some(20),
            single_step: false,
            low_delay_seconds: 3600,
            high_delay_seconds: 1800,
            minimum_size: None,
            maximum_size: None,
            minimum_free_size: None,
            strict_minimum_size: None,
            strict_maximum_size: None,
            minimum_free_is_critical: false,
            requires_greenlight,
            config_json: serde_json::json!({}),
            scraped_at: None,
            asset_count: 0,
            scrape_error_message: None,
            seeded: false,
        }
    }

    fn op(reason: OperationReason, created_at: DateTime<Utc>, confirmed: bool, greenlit: bool) -> PendingOperation {
        PendingOperation {
            asset_id: Uuid::nil(),
            reason,
            old_size: 1000,
            new_size: 1200,
            usage_at_creation: Json(UsageMap::new()),
            created_at,
            confirmed_at: confirmed.then_some(created_at),
            greenlit_at: greenlit.then_some(created_at),
            greenlit_by_user_id: None,
            leased_until: None,
        }
    }

    #[test]
    fn nothing_pending_nothing_warranted() {
        let now = Utc::now();
        assert_eq!(plan_transition(None, None, &resource(false), now), Transition::None);
    }

    #[test]
    fn high_starts_in_created_even_without_approval_requirement() {
        let now = Utc::now();
        for requires_greenlight in [false, true] {
            let plan = plan_transition(None, Some((OperationReason::High, 1200)), &resource(requires_greenlight), now);
            assert_eq!(
                plan,
                Transition::Create {
                    reason: OperationReason::High,
                    target: 1200,
                    auto_greenlight: false
                }
            );
        }
    }

    #[test]
    fn critical_always_auto_greenlights() {
        let now = Utc::now();
        let plan = plan_transition(None, Some((OperationReason::Critical, 1200)), &resource(true), now);
        assert_eq!(
            plan,
            Transition::Create {
                reason: OperationReason::Critical,
                target: 1200,
                auto_greenlight: true
            }
        );
    }

    #[test]
    fn reason_disappearing_cancels_unless_greenlit() {
        let now = Utc::now();
        let created = op(OperationReason::High, now, false, false);
        assert_eq!(plan_transition(Some(&created), None, &resource(false), now), Transition::Cancel);

        let confirmed = op(OperationReason::High, now, true, false);
        assert_eq!(plan_transition(Some(&confirmed), None, &resource(false), now), Transition::Cancel);

        let greenlit = op(OperationReason::High, now, true, true);
        assert_eq!(plan_transition(Some(&greenlit), None, &resource(false), now), Transition::None);
    }

    #[test]
    fn same_reason_refreshes_target_without_confirming_before_delay() {
        let now = Utc::now();
        let created = op(OperationReason::High, now, false, false);
        let plan = plan_transition(Some(&created), Some((OperationReason::High, 1300)), &resource(false), now);
        assert_eq!(plan, Transition::Refresh { target: 1300, confirm: None });
    }

    #[test]
    fn confirms_with_greenlight_once_delay_elapsed() {
        let now = Utc::now();
        let created = op(OperationReason::High, now - Duration::seconds(1801), false, false);
        let plan = plan_transition(Some(&created), Some((OperationReason::High, 1200)), &resource(false), now);
        assert_eq!(
            plan,
            Transition::Refresh {
                target: 1200,
                confirm: Some(Confirm { greenlight: true })
            }
        );
    }

    #[test]
    fn confirms_without_greenlight_when_approval_required() {
        let now = Utc::now();
        let created = op(OperationReason::High, now - Duration::seconds(1801), false, false);
        let plan = plan_transition(Some(&created), Some((OperationReason::High, 1200)), &resource(true), now);
        assert_eq!(
            plan,
            Transition::Refresh {
                target: 1200,
                confirm: Some(Confirm { greenlight: false })
            }
        );
    }

    #[test]
    fn already_confirmed_op_is_not_reconfirmed() {
        let now = Utc::now();
        let confirmed = op(OperationReason::High, now - Duration::seconds(7200), true, false);
        let plan = plan_transition(Some(&confirmed), Some((OperationReason::High, 1250)), &resource(true), now);
        assert_eq!(plan, Transition::Refresh { target: 1250, confirm: None });
    }

    #[test]
    fn critical_replaces_pending_high() {
        let now = Utc::now();
        let created = op(OperationReason::High, now, false, false);
        let plan = plan_transition(Some(&created), Some((OperationReason::Critical, 1400)), &resource(true), now);
        assert_eq!(
            plan,
            Transition::Replace {
                reason: OperationReason::Critical,
                target: 1400,
                auto_greenlight: true
            }
        );
    }

    #[test]
    fn flipped_reason_replaces() {
        let now = Utc::now();
        let created = op(OperationReason::High, now, false, false);
        let plan = plan_transition(Some(&created), Some((OperationReason::Low, 800)), &resource(false), now);
        assert_eq!(
            plan,
            Transition::Replace {
                reason: OperationReason::Low,
                target: 800,
                auto_greenlight: false
            }
        );
    }

    #[test]
    fn greenlit_op_is_never_touched() {
        let now = Utc::now();
        let greenlit = op(OperationReason::High, now - Duration::seconds(9999), true, true);
        let plan = plan_transition(Some(&greenlit), Some((OperationReason::Critical, 1400)), &resource(false), now);
        assert_eq!(plan, Transition::None);
    }

    #[test]
    fn critical_has_no_delay() {
        assert_eq!(delay_for(&resource(false), OperationReason::Critical), Duration::zero());
        assert_eq!(delay_for(&resource(false), OperationReason::Low), Duration::seconds(3600));
        assert_eq!(delay_for(&resource(false), OperationReason::High), Duration::seconds(1800));
    }
}
