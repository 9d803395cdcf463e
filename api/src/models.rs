//! Wire representations for the HTTP API. The `singular` usage metric
//! serializes as a bare number for backward compatibility; multi-metric
//! asset types serialize usage as a map keyed by metric name.

use std::collections::BTreeMap;

use castellum::models::{
    Asset, FinishedOperation, PendingOperation, Resource, Threshold, ThresholdMap, UsageMap, SINGULAR_METRIC,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use uuid::Uuid;

/// A usage-percent (or usage) value set: a bare number for `singular`-only
/// asset types, a `{metric: value}` map otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UsageValues {
    Singular(f64),
    PerMetric(BTreeMap<String, f64>),
}

impl UsageValues {
    pub fn from_map(map: &UsageMap) -> Self {
        if map.len() == 1 {
            if let Some(value) = map.get(SINGULAR_METRIC) {
                return UsageValues::Singular(*value);
            }
        }
        UsageValues::PerMetric(map.clone())
    }

    pub fn into_map(self) -> UsageMap {
        match self {
            UsageValues::Singular(value) => {
                let mut map = UsageMap::new();
                map.insert(SINGULAR_METRIC.to_string(), value);
                map
            }
            UsageValues::PerMetric(map) => map,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub usage_percent: UsageValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizeStepsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<i32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub single: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizeConstraintsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_free: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub minimum_free_is_critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_minimum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_maximum: Option<i64>,
}

impl SizeConstraintsSpec {
    fn is_empty(&self) -> bool {
        self.minimum.is_none()
            && self.maximum.is_none()
            && self.minimum_free.is_none()
            && !self.minimum_free_is_critical
            && self.strict_minimum.is_none()
            && self.strict_maximum.is_none()
    }
}

/// The user-facing resource configuration, as PUT and GET on the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_threshold: Option<ThresholdSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_threshold: Option<ThresholdSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_threshold: Option<ThresholdSpec>,
    pub size_steps: SizeStepsSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_constraints: Option<SizeConstraintsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_greenlight: bool,
}

impl ResourceSpec {
    /// Collects the per-level threshold specs into the stored per-metric
    /// map, plus the two delays. Fails on a critical delay (critical
    /// operations execute immediately and can have none).
    pub fn threshold_model(&self) -> Result<(ThresholdMap, i64, i64), String> {
        let mut thresholds = ThresholdMap::new();
        let mut set_level = |values: &UsageValues, level: fn(&mut Threshold) -> &mut Option<f64>| {
            for (metric, value) in values.clone().into_map() {
                *level(thresholds.entry(metric).or_default()) = Some(value);
            }
        };

        if let Some(spec) = &self.low_threshold {
            set_level(&spec.usage_percent, |t| &mut t.low);
        }
        if let Some(spec) = &self.high_threshold {
            set_level(&spec.usage_percent, |t| &mut t.high);
        }
        if let Some(spec) = &self.critical_threshold {
            if spec.delay_seconds.is_some() {
                return Err("critical threshold may not have a delay".to_string());
            }
            set_level(&spec.usage_percent, |t| &mut t.critical);
        }

        let low_delay = self.low_threshold.as_ref().and_then(|t| t.delay_seconds).unwrap_or(0);
        let high_delay = self.high_threshold.as_ref().and_then(|t| t.delay_seconds).unwrap_or(0);
        Ok((thresholds, low_delay, high_delay))
    }

    /// Builds the storable row. Bookkeeping fields (scrape state, seeded
    /// flag, asset count) are supplied by the caller since a PUT must not
    /// reset them.
    pub fn into_resource(
        self,
        id: Uuid,
        scope_uuid: Uuid,
        asset_type: String,
    ) -> Result<Resource, String> {
        let (thresholds, low_delay_seconds, high_delay_seconds) = self.threshold_model()?;
        let constraints = self.size_constraints.unwrap_or_default();
        Ok(Resource {
            id,
            scope_uuid,
            asset_type,
            thresholds: Json(thresholds),
            size_step_percent: self.size_steps.percent,
            single_step: self.size_steps.single,
            low_delay_seconds,
            high_delay_seconds,
            minimum_size: constraints.minimum,
            maximum_size: constraints.maximum,
            minimum_free_size: constraints.minimum_free,
            strict_minimum_size: constraints.strict_minimum,
            strict_maximum_size: constraints.strict_maximum,
            minimum_free_is_critical: constraints.minimum_free_is_critical,
            requires_greenlight: self.requires_greenlight,
            config_json: self.config.unwrap_or(Value::Object(Default::default())),
            scraped_at: None,
            asset_count: 0,
            scrape_error_message: None,
            seeded: false,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckedInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckedInfo {
    fn from_parts(at: Option<DateTime<Utc>>, error: Option<String>) -> Option<Self> {
        if at.is_none() && error.is_none() {
            None
        } else {
            Some(CheckedInfo { at, error })
        }
    }
}

/// The GET representation of a resource: the configuration spec plus
/// read-only bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_threshold: Option<ThresholdSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_threshold: Option<ThresholdSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_threshold: Option<ThresholdSpec>,
    pub size_steps: SizeStepsSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_constraints: Option<SizeConstraintsSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub requires_greenlight: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub seeded: bool,
    pub asset_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<CheckedInfo>,
}

fn level_values(thresholds: &ThresholdMap, level: fn(&Threshold) -> Option<f64>) -> Option<UsageValues> {
    let map: UsageMap = thresholds
        .iter()
        .filter_map(|(metric, t)| level(t).map(|v| (metric.clone(), v)))
        .collect();
    if map.is_empty() {
        None
    } else {
        Some(UsageValues::from_map(&map))
    }
}

impl From<&Resource> for ResourceView {
    fn from(r: &Resource) -> Self {
        let constraints = SizeConstraintsSpec {
            minimum: r.minimum_size,
            maximum: r.maximum_size,
            minimum_free: r.minimum_free_size,
            minimum_free_is_critical: r.minimum_free_is_critical,
            strict_minimum: r.strict_minimum_size,
            strict_maximum: r.strict_maximum_size,
        };
        ResourceView {
            low_threshold: level_values(&r.thresholds.0, |t| t.low).map(|usage_percent| ThresholdSpec {
                usage_percent,
                delay_seconds: Some(r.low_delay_seconds),
            }),
            high_threshold: level_values(&r.thresholds.0, |t| t.high).map(|usage_percent| ThresholdSpec {
                usage_percent,
                delay_seconds: Some(r.high_delay_seconds),
            }),
            critical_threshold: level_values(&r.thresholds.0, |t| t.critical).map(|usage_percent| ThresholdSpec {
                usage_percent,
                delay_seconds: None,
            }),
            size_steps: SizeStepsSpec {
                percent: r.size_step_percent,
                single: r.single_step,
            },
            size_constraints: Some(constraints).filter(|c| !c.is_empty()),
            config: Some(r.config_json.clone()).filter(|c| !castellum::is_blank_config(Some(c))),
            requires_greenlight: r.requires_greenlight,
            seeded: r.seeded,
            asset_count: r.asset_count,
            checked: CheckedInfo::from_parts(r.scraped_at, r.scrape_error_message.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetView {
    pub id: Uuid,
    pub size: i64,
    pub usage: UsageValues,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_minimum_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_maximum_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<CheckedInfo>,
}

impl From<&Asset> for AssetView {
    fn from(a: &Asset) -> Self {
        AssetView {
            id: a.id,
            size: a.size,
            usage: UsageValues::from_map(&a.usage.0),
            stale: a.stale,
            strict_minimum_size: a.strict_minimum_size,
            strict_maximum_size: a.strict_maximum_size,
            checked: CheckedInfo::from_parts(a.checked_at, a.scrape_error_message.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedInfo {
    pub at: DateTime<Utc>,
    pub usage: UsageValues,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmedInfo {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GreenlitInfo {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingOperationView {
    pub asset_id: Uuid,
    pub reason: castellum::OperationReason,
    pub state: &'static str,
    pub old_size: i64,
    pub new_size: i64,
    pub created: CreatedInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<ConfirmedInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greenlit: Option<GreenlitInfo>,
}

impl From<&PendingOperation> for PendingOperationView {
    fn from(op: &PendingOperation) -> Self {
        let state = if op.greenlit_at.is_some() {
            "greenlit"
        } else if op.confirmed_at.is_some() {
            "confirmed"
        } else {
            "created"
        };
        PendingOperationView {
            asset_id: op.asset_id,
            reason: op.reason,
            state,
            old_size: op.old_size,
            new_size: op.new_size,
            created: CreatedInfo {
                at: op.created_at,
                usage: UsageValues::from_map(&op.usage_at_creation.0),
            },
            confirmed: op.confirmed_at.map(|at| ConfirmedInfo { at }),
            greenlit: op.greenlit_at.map(|at| GreenlitInfo {
                at,
                by_user_id: op.greenlit_by_user_id.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinishedInfo {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinishedOperationView {
    pub asset_id: Uuid,
    pub reason: castellum::OperationReason,
    pub outcome: castellum::OperationOutcome,
    pub old_size: i64,
    pub new_size: i64,
    pub created: CreatedInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<ConfirmedInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greenlit: Option<GreenlitInfo>,
    pub finished: FinishedInfo,
}

impl From<&FinishedOperation> for FinishedOperationView {
    fn from(op: &FinishedOperation) -> Self {
        FinishedOperationView {
            asset_id: op.asset_id,
            reason: op.reason,
            outcome: op.outcome,
            old_size: op.old_size,
            new_size: op.new_size,
            created: CreatedInfo {
                at: op.created_at,
                usage: UsageValues::from_map(&op.usage_at_creation.0),
            },
            confirmed: op.confirmed_at.map(|at| ConfirmedInfo { at }),
            greenlit: op.greenlit_at.map(|at| GreenlitInfo {
                at,
                by_user_id: op.greenlit_by_user_id.clone(),
            }),
            finished: FinishedInfo {
                at: op.finished_at,
                error_message: op.error_message.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singular_usage_serializes_as_bare_number() {
        let mut map = UsageMap::new();
        map.insert(SINGULAR_METRIC.to_string(), 42.5);
        let values = UsageValues::from_map(&map);
        assert_eq!(serde_json::to_string(&values).unwrap(), "42.5");
    }

    #[test]
    fn multi_metric_usage_serializes_as_map() {
        let mut map = UsageMap::new();
        map.insert("cpu".to_string(), 2.0);
        map.insert("ram".to_string(), 4096.0);
        let values = UsageValues::from_map(&map);
        assert_eq!(serde_json::to_string(&values).unwrap(), r#"{"cpu":2.0,"ram":4096.0}"#);
    }

    #[test]
    fn bare_number_deserializes_to_singular_metric() {
        let values: UsageValues = serde_json::from_str("80").unwrap();
        let map = values.into_map();
        assert_eq!(map.get(SINGULAR_METRIC), Some(&80.0));
    }

    #[test]
    fn resource_spec_round_trips_through_threshold_model() {
        let raw = r#"{
            "low_threshold": {"usage_percent": 20, "delay_seconds": 3600},
            "high_threshold": {"usage_percent": 80, "delay_seconds": 1800},
            "critical_threshold": {"usage_percent": 95},
            "size_steps": {"percent": 20}
        }"#;
        let spec: ResourceSpec = serde_json::from_str(raw).unwrap();
        let (thresholds, low_delay, high_delay) = spec.threshold_model().unwrap();
        let t = thresholds.get(SINGULAR_METRIC).unwrap();
        assert_eq!(t.low, Some(20.0));
        assert_eq!(t.high, Some(80.0));
        assert_eq!(t.critical, Some(95.0));
        assert_eq!(low_delay, 3600);
        assert_eq!(high_delay, 1800);
    }

    #[test]
    fn critical_threshold_rejects_delay() {
        let raw = r#"{
            "critical_threshold": {"usage_percent": 95, "delay_seconds": 60},
            "size_steps": {"single": true}
        }"#;
        let spec: ResourceSpec = serde_json::from_str(raw).unwrap();
        assert!(spec.threshold_model().is_err());
    }

    #[test]
    fn multi_metric_thresholds_fan_out_per_metric() {
        let raw = r#"{
            "high_threshold": {"usage_percent": {"cpu": 80, "ram": 90}, "delay_seconds": 60},
            "size_steps": {"single": true}
        }"#;
        let spec: ResourceSpec = serde_json::from_str(raw).unwrap();
        let (thresholds, _, high_delay) = spec.threshold_model().unwrap();
        assert_eq!(thresholds.get("cpu").unwrap().high, Some(80.0));
        assert_eq!(thresholds.get("ram").unwrap().high, Some(90.0));
        assert_eq!(high_delay, 60);
    }

    #[test]
    fn resource_view_reconstructs_wire_shape() {
        let raw = r#"{
            "low_threshold": {"usage_percent": 20, "delay_seconds": 3600},
            "high_threshold": {"usage_percent": 80, "delay_seconds": 1800},
            "critical_threshold": {"usage_percent": 95},
            "size_steps": {"percent": 20},
            "size_constraints": {"minimum": 10, "maximum": 1000}
        }"#;
        let spec: ResourceSpec = serde_json::from_str(raw).unwrap();
        let resource = spec.into_resource(Uuid::nil(), Uuid::nil(), "nfs".to_string()).unwrap();
        let view = ResourceView::from(&resource);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["low_threshold"]["usage_percent"], serde_json::json!(20.0));
        assert_eq!(json["low_threshold"]["delay_seconds"], serde_json::json!(3600));
        assert_eq!(json["critical_threshold"].get("delay_seconds"), None);
        assert_eq!(json["size_steps"]["percent"], serde_json::json!(20));
        assert_eq!(json["size_constraints"]["maximum"], serde_json::json!(1000));
        assert_eq!(json["asset_count"], serde_json::json!(0));
    }
}
