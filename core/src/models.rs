//! The relational data model: resources, assets, pending operations and
//! finished operations, plus the small value types the decision engine and
//! persistence layer share.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::ValidationError;

/// Usage (or threshold) value keyed by metric name. An ordered map so that
/// JSON serialization is stable and `singular`-only assets still round-trip
/// deterministically.
pub type UsageMap = BTreeMap<String, f64>;

/// The metric name used by single-value asset types (NFS shares, project
/// quotas). Multi-metric asset types (server-groups) use e.g. `cpu`/`ram`.
pub const SINGULAR_METRIC: &str = "singular";

/// Per-metric usage thresholds, expressed as usage percentages. Any level
/// may be left unconfigured; a resource only needs at least one level set
/// on at least one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical: Option<f64>,
}

impl Threshold {
    pub fn is_empty(&self) -> bool {
        self.low.is_none() && self.high.is_none() && self.critical.is_none()
    }

    /// Configured levels must be positive and strictly ordered
    /// `low < high < critical` wherever two of them are present.
    pub fn validate(&self, metric: &str) -> Result<(), ValidationError> {
        let ordering_err = || ValidationError::ThresholdOrdering {
            metric: metric.to_string(),
        };
        for value in [self.low, self.high, self.critical].into_iter().flatten() {
            if value <= 0.0 {
                return Err(ordering_err());
            }
        }
        for (lower, upper) in [
            (self.low, self.high),
            (self.high, self.critical),
            (self.low, self.critical),
        ] {
            if let (Some(lower), Some(upper)) = (lower, upper) {
                if lower >= upper {
                    return Err(ordering_err());
                }
            }
        }
        Ok(())
    }
}

pub type ThresholdMap = BTreeMap<String, Threshold>;

/// The reasons a pending operation may be created for, in priority order
/// `critical > high > low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "operation_reason", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationReason {
    Low,
    High,
    Critical,
}

impl OperationReason {
    /// Priority used to pick a single winner among several eligible
    /// reasons: higher is more urgent.
    pub fn priority(self) -> u8 {
        match self {
            OperationReason::Low => 0,
            OperationReason::High => 1,
            OperationReason::Critical => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationReason::Low => "low",
            OperationReason::High => "high",
            OperationReason::Critical => "critical",
        }
    }
}

/// The terminal classification of a finished operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "operation_outcome", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationOutcome {
    Succeeded,
    Failed,
    Errored,
    Cancelled,
}

impl OperationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationOutcome::Succeeded => "succeeded",
            OperationOutcome::Failed => "failed",
            OperationOutcome::Errored => "errored",
            OperationOutcome::Cancelled => "cancelled",
        }
    }
}

/// The stepping policy for computing a candidate resize target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepPolicy {
    Percent(u32),
    Single,
}

/// Size constraints a resource may configure.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SizeConstraints {
    pub minimum_size: Option<u64>,
    pub maximum_size: Option<u64>,
    pub minimum_free_size: Option<u64>,
    pub strict_minimum_size: Option<u64>,
    pub strict_maximum_size: Option<u64>,
    pub minimum_free_is_critical: bool,
}

/// The per-`(scope, asset_type)` policy row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Resource {
    pub id: Uuid,
    pub scope_uuid: Uuid,
    pub asset_type: String,
    pub thresholds: Json<ThresholdMap>,
    pub size_step_percent: Option<i32>,
    pub single_step: bool,
    pub low_delay_seconds: i64,
    pub high_delay_seconds: i64,
    pub minimum_size: Option<i64>,
    pub maximum_size: Option<i64>,
    pub minimum_free_size: Option<i64>,
    pub strict_minimum_size: Option<i64>,
    pub strict_maximum_size: Option<i64>,
    pub minimum_free_is_critical: bool,
    /// Whether `low`/`high` operations require a user-driven greenlight
    /// before a worker may execute them. `critical` always auto-greenlights
    /// regardless of this flag.
    pub requires_greenlight: bool,
    pub config_json: serde_json::Value,
    pub scraped_at: Option<DateTime<Utc>>,
    pub asset_count: i64,
    pub scrape_error_message: Option<String>,
    pub seeded: bool,
}

impl Resource {
    /// At least one threshold, `low < high < critical` per metric, exactly
    /// one stepping policy, and (when required by the caller's ceiling) a
    /// bounded `maximum_size`.
    pub fn validate(&self, required_maximum_ceiling: Option<u64>) -> Result<(), ValidationError> {
        if self.thresholds.0.values().all(Threshold::is_empty) {
            return Err(ValidationError::NoThresholdsConfigured);
        }
        for (metric, threshold) in self.thresholds.0.iter() {
            threshold.validate(metric)?;
        }
        let has_percent = self.size_step_percent.is_some_and(|p| p > 0);
        if has_percent == self.single_step {
            return Err(ValidationError::AmbiguousStepPolicy);
        }
        if let Some(ceiling) = required_maximum_ceiling {
            match self.maximum_size {
                Some(max) if (max as u64) <= ceiling => {}
                _ => return Err(ValidationError::MaximumSizeRequired { ceiling }),
            }
        }
        Ok(())
    }

    pub fn step_policy(&self) -> Option<StepPolicy> {
        if self.single_step {
            Some(StepPolicy::Single)
        } else {
            self.size_step_percent
                .filter(|p| *p > 0)
                .map(|p| StepPolicy::Percent(p as u32))
        }
    }

    pub fn size_constraints(&self) -> SizeConstraints {
        SizeConstraints {
            minimum_size: self.minimum_size.map(|v| v as u64),
            maximum_size: self.maximum_size.map(|v| v as u64),
            minimum_free_size: self.minimum_free_size.map(|v| v as u64),
            strict_minimum_size: self.strict_minimum_size.map(|v| v as u64),
            strict_maximum_size: self.strict_maximum_size.map(|v| v as u64),
            minimum_free_is_critical: self.minimum_free_is_critical,
        }
    }
}

/// A concrete resizable instance observed through a backend plugin.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Asset {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub backend_uuid: Uuid,
    pub size: i64,
    pub usage: Json<UsageMap>,
    pub checked_at: Option<DateTime<Utc>>,
    pub scrape_error_message: Option<String>,
    pub stale: bool,
    pub strict_minimum_size: Option<i64>,
    pub strict_maximum_size: Option<i64>,
}

/// At most one per asset.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingOperation {
    pub asset_id: Uuid,
    pub reason: OperationReason,
    pub old_size: i64,
    pub new_size: i64,
    pub usage_at_creation: Json<UsageMap>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub greenlit_at: Option<DateTime<Utc>>,
    pub greenlit_by_user_id: Option<String>,
    /// Claim column stamped by the resize executor while a resize is in
    /// flight.
    pub leased_until: Option<DateTime<Utc>>,
}

impl PendingOperation {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    pub fn is_greenlit(&self) -> bool {
        self.greenlit_at.is_some()
    }
}

/// Immutable historical record of one attempted resize.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FinishedOperation {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub reason: OperationReason,
    pub old_size: i64,
    pub new_size: i64,
    pub usage_at_creation: Json<UsageMap>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub greenlit_at: Option<DateTime<Utc>>,
    pub greenlit_by_user_id: Option<String>,
    pub outcome: OperationOutcome,
    pub finished_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds(low: f64, high: f64, critical: f64) -> ThresholdMap {
        let mut m = ThresholdMap::new();
        m.insert(
            SINGULAR_METRIC.to_string(),
            Threshold {
                low: Some(low),
                high: Some(high),
                critical: Some(critical),
            },
        );
        m
    }

    fn sample_resource() -> Resource {
        Resource {
            id: Uuid::nil(),
            scope_uuid: Uuid::nil(),
            asset_type: "nfs".into(),
            thresholds: Json(thresholds(20.0, 80.0, 95.0)),
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
            requires_greenlight: false,
            config_json: serde_json::json!({}),
            scraped_at: None,
            asset_count: 0,
            scrape_error_message: None,
            seeded: false,
        }
    }

    #[test]
    fn validates_clean_resource() {
        assert!(sample_resource().validate(None).is_ok());
    }

    #[test]
    fn rejects_empty_thresholds() {
        let mut r = sample_resource();
        r.thresholds = Json(ThresholdMap::new());
        assert_eq!(r.validate(None), Err(ValidationError::NoThresholdsConfigured));
    }

    #[test]
    fn rejects_bad_threshold_ordering() {
        let mut r = sample_resource();
        r.thresholds = Json(thresholds(90.0, 80.0, 95.0));
        assert!(matches!(
            r.validate(None),
            Err(ValidationError::ThresholdOrdering { .. })
        ));
    }

    #[test]
    fn accepts_partially_configured_thresholds() {
        let mut r = sample_resource();
        let mut m = ThresholdMap::new();
        m.insert(
            SINGULAR_METRIC.to_string(),
            Threshold {
                low: None,
                high: Some(80.0),
                critical: None,
            },
        );
        r.thresholds = Json(m);
        assert!(r.validate(None).is_ok());
    }

    #[test]
    fn rejects_all_empty_thresholds() {
        let mut r = sample_resource();
        let mut m = ThresholdMap::new();
        m.insert(SINGULAR_METRIC.to_string(), Threshold::default());
        r.thresholds = Json(m);
        assert_eq!(r.validate(None), Err(ValidationError::NoThresholdsConfigured));
    }

    #[test]
    fn rejects_both_step_policies_set() {
        let mut r = sample_resource();
        r.single_step = true;
        assert_eq!(r.validate(None), Err(ValidationError::AmbiguousStepPolicy));
    }

    #[test]
    fn rejects_neither_step_policy_set() {
        let mut r = sample_resource();
        r.size_step_percent = None;
        assert_eq!(r.validate(None), Err(ValidationError::AmbiguousStepPolicy));
    }

    #[test]
    fn enforces_required_maximum_ceiling() {
        let mut r = sample_resource();
        assert!(matches!(
            r.validate(Some(10_000)),
            Err(ValidationError::MaximumSizeRequired { .. })
        ));
        r.maximum_size = Some(5_000);
        assert!(r.validate(Some(10_000)).is_ok());
        r.maximum_size = Some(20_000);
        assert!(r.validate(Some(10_000)).is_err());
    }
}
