//! Parses the operator-facing YAML configuration file: authoritative
//! `max_asset_sizes` ceilings and declarative `project_seeds`. Regexes are
//! anchored on both ends so `asset_type` patterns can't accidentally match
//! a prefix.

use std::fs;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ConfigError, ValidationError};
use crate::models::Resource;

#[derive(Debug, Clone, Deserialize)]
pub struct MaxAssetSizeRule {
    pub asset_type: String,
    pub scope_uuid: Option<Uuid>,
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceSeedSpec {
    pub thresholds: crate::models::ThresholdMap,
    pub size_step_percent: Option<i32>,
    #[serde(default)]
    pub single_step: bool,
    #[serde(default)]
    pub low_delay_seconds: i64,
    #[serde(default)]
    pub high_delay_seconds: i64,
    pub minimum_size: Option<i64>,
    pub maximum_size: Option<i64>,
    pub minimum_free_size: Option<i64>,
    pub strict_minimum_size: Option<i64>,
    pub strict_maximum_size: Option<i64>,
    #[serde(default)]
    pub minimum_free_is_critical: bool,
    #[serde(default)]
    pub requires_greenlight: bool,
    #[serde(default)]
    pub config: Value,
}

impl ResourceSeedSpec {
    /// Runs the same invariant checks the API applies to a PUT body, so the
    /// seed write path refuses exactly the inputs a request would.
    pub fn validate(&self, required_maximum_ceiling: Option<u64>) -> Result<(), ValidationError> {
        let resource = Resource {
            id: Uuid::nil(),
            scope_uuid: Uuid::nil(),
            asset_type: String::new(),
            thresholds: sqlx::types::Json(self.thresholds.clone()),
            size_step_percent: self.size_step_percent,
            single_step: self.single_step,
            low_delay_seconds: self.low_delay_seconds,
            high_delay_seconds: self.high_delay_seconds,
            minimum_size: self.minimum_size,
            maximum_size: self.maximum_size,
            minimum_free_size: self.minimum_free_size,
            strict_minimum_size: self.strict_minimum_size,
            strict_maximum_size: self.strict_maximum_size,
            minimum_free_is_critical: self.minimum_free_is_critical,
            requires_greenlight: self.requires_greenlight,
            config_json: self.config.clone(),
            scraped_at: None,
            asset_count: 0,
            scrape_error_message: None,
            seeded: true,
        };
        resource.validate(required_maximum_ceiling)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSeed {
    pub project_name: String,
    pub domain_name: String,
    #[serde(default)]
    pub resources: std::collections::BTreeMap<String, ResourceSeedSpec>,
    #[serde(default)]
    pub disabled_resources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct YamlConfig {
    #[serde(default)]
    pub max_asset_sizes: Vec<MaxAssetSizeRule>,
    #[serde(default)]
    pub project_seeds: Vec<ProjectSeed>,
}

impl YamlConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    pub fn parse(raw: &str, path: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// The effective `maximum_size` ceiling for `(asset_type, scope_uuid)`,
    /// if any rule matches. Later rules in file order override earlier ones
    /// matching the same `(asset_type, scope)`.
    pub fn max_asset_size(&self, asset_type: &str, scope_uuid: Uuid) -> Result<Option<u64>, ConfigError> {
        let mut result = None;
        for rule in &self.max_asset_sizes {
            if let Some(rule_scope) = rule.scope_uuid {
                if rule_scope != scope_uuid {
                    continue;
                }
            }
            let pattern = anchored(&rule.asset_type);
            let re = Regex::new(&pattern).map_err(|e| ConfigError::Invalid(format!("max_asset_sizes asset_type regex {pattern:?}: {e}")))?;
            if re.is_match(asset_type) {
                result = Some(rule.value);
            }
        }
        Ok(result)
    }
}

fn anchored(pattern: &str) -> String {
    if pattern.starts_with('^') && pattern.ends_with('$') {
        pattern.to_string()
    } else {
        format!("^{pattern}$")
    }
}

/// Whether `asset_type` is listed (after anchoring) in a project's
/// `disabled_resources`.
pub fn is_disabled(seed: &ProjectSeed, asset_type: &str) -> Result<bool, ConfigError> {
    for pattern in &seed.disabled_resources {
        let anchored_pattern = anchored(pattern);
        let re = Regex::new(&anchored_pattern)
            .map_err(|e| ConfigError::Invalid(format!("disabled_resources regex {anchored_pattern:?}: {e}")))?;
        if re.is_match(asset_type) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
max_asset_sizes:
  - asset_type: nfs
    value: 10000
  - asset_type: nfs
    scope_uuid: "00000000-0000-0000-0000-000000000001"
    value: 5000
project_seeds:
  - project_name: acme
    domain_name: default
    resources:
      nfs:
        thresholds:
          singular:
            low: 20.0
            high: 80.0
            critical: 95.0
        size_step_percent: 20
    disabled_resources:
      - "quota-.*"
"#;

    #[test]
    fn parses_sample_config() {
        let cfg = YamlConfig::parse(SAMPLE, "test.yaml").unwrap();
        assert_eq!(cfg.max_asset_sizes.len(), 2);
        assert_eq!(cfg.project_seeds.len(), 1);
    }

    #[test]
    fn later_rule_overrides_earlier_for_same_scope() {
        let cfg = YamlConfig::parse(SAMPLE, "test.yaml").unwrap();
        let scoped = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        assert_eq!(cfg.max_asset_size("nfs", scoped).unwrap(), Some(5000));
        let other = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        assert_eq!(cfg.max_asset_size("nfs", other).unwrap(), Some(10000));
    }

    #[test]
    fn regex_is_anchored_both_ends() {
        let cfg = YamlConfig::parse(SAMPLE, "test.yaml").unwrap();
        let scope = Uuid::nil();
        assert_eq!(cfg.max_asset_size("nfs-extra", scope).unwrap(), None);
    }

    #[test]
    fn disabled_resources_match_anchored_regex() {
        let cfg = YamlConfig::parse(SAMPLE, "test.yaml").unwrap();
        let seed = &cfg.project_seeds[0];
        assert!(is_disabled(seed, "quota-compute").unwrap());
        assert!(!is_disabled(seed, "nfs").unwrap());
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(YamlConfig::parse("not: [valid", "test.yaml").is_err());
    }

    #[test]
    fn seed_spec_validates_like_a_put_body() {
        let cfg = YamlConfig::parse(SAMPLE, "test.yaml").unwrap();
        let spec = &cfg.project_seeds[0].resources["nfs"];
        assert!(spec.validate(None).is_ok());
    }

    #[test]
    fn seed_spec_rejects_bad_threshold_ordering() {
        let raw = r#"
project_seeds:
  - project_name: acme
    domain_name: default
    resources:
      nfs:
        thresholds:
          singular:
            low: 90.0
            high: 80.0
        size_step_percent: 20
"#;
        let cfg = YamlConfig::parse(raw, "test.yaml").unwrap();
        let spec = &cfg.project_seeds[0].resources["nfs"];
        assert!(matches!(
            spec.validate(None),
            Err(ValidationError::ThresholdOrdering { .. })
        ));
    }

    #[test]
    fn seed_spec_rejects_ambiguous_step_policy() {
        let raw = r#"
project_seeds:
  - project_name: acme
    domain_name: default
    resources:
      nfs:
        thresholds:
          singular:
            high: 80.0
        size_step_percent: 20
        single_step: true
"#;
        let cfg = YamlConfig::parse(raw, "test.yaml").unwrap();
        let spec = &cfg.project_seeds[0].resources["nfs"];
        assert_eq!(spec.validate(None), Err(ValidationError::AmbiguousStepPolicy));
    }

    #[test]
    fn seed_spec_enforces_ceiling() {
        let cfg = YamlConfig::parse(SAMPLE, "test.yaml").unwrap();
        let spec = &cfg.project_seeds[0].resources["nfs"];
        // The sample seed sets no maximum_size, so a required ceiling
        // rejects it.
        assert!(matches!(
            spec.validate(Some(10_000)),
            Err(ValidationError::MaximumSizeRequired { .. })
        ));
    }
}
