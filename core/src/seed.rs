//! Declarative seed reconciliation: applies a YAML config's
//! `project_seeds` idempotently, creating or updating the named resources
//! and marking them `seeded = true` so the API refuses to delete them.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::resources;
use crate::error::{ConfigError, StoreError};
use crate::yamlconfig::{is_disabled, ProjectSeed, YamlConfig};

/// Resolves a project/domain name pair to the scope UUID the rest of the
/// system keys on. Kept as a trait so `core` never depends on a specific
/// identity service client; `api`/`seeder` supply the real implementation.
#[async_trait]
pub trait ScopeResolver: Send + Sync {
    async fn resolve(&self, project_name: &str, domain_name: &str) -> Result<Uuid, ConfigError>;
}

#[derive(Debug, Default, Clone)]
pub struct SeedReport {
    pub resources_created: u64,
    pub resources_updated: u64,
    pub resources_skipped_disabled: u64,
    pub resources_invalid: u64,
    pub projects_unresolved: u64,
}

/// Applies every `project_seeds` entry in `config` against `pool`, via
/// `resolver` for scope lookup. Safe to run repeatedly: resources already
/// matching the seed spec are left untouched (`seeded` rows always overwrite
/// with the config's view, since the config file is authoritative for them).
pub async fn apply_seeds(pool: &PgPool, resolver: &dyn ScopeResolver, config: &YamlConfig) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();
    for seed in &config.project_seeds {
        apply_one_seed(pool, resolver, config, seed, &mut report).await?;
    }
    Ok(report)
}

async fn apply_one_seed(
    pool: &PgPool,
    resolver: &dyn ScopeResolver,
    config: &YamlConfig,
    seed: &ProjectSeed,
    report: &mut SeedReport,
) -> Result<(), StoreError> {
    let scope_uuid = match resolver.resolve(&seed.project_name, &seed.domain_name).await {
        Ok(uuid) => uuid,
        Err(err) => {
            warn!(project = %seed.project_name, domain = %seed.domain_name, error = %err, "seed project could not be resolved, skipping");
            report.projects_unresolved += 1;
            return Ok(());
        }
    };

    for (asset_type, spec) in &seed.resources {
        let disabled = is_disabled(seed, asset_type).map_err(|e| StoreError::Invariant(e.to_string()))?;
        if disabled {
            info!(project = %seed.project_name, asset_type, "seeded resource disabled by disabled_resources, skipping");
            report.resources_skipped_disabled += 1;
            continue;
        }

        // The seed path enforces the same invariants a PUT does, the
        // config-file ceiling included; an invalid seed never reaches the
        // decision engine.
        let ceiling = config
            .max_asset_size(asset_type, scope_uuid)
            .map_err(|e| StoreError::Invariant(e.to_string()))?;
        if let Err(err) = spec.validate(ceiling) {
            warn!(project = %seed.project_name, asset_type, error = %err, "seeded resource fails validation, skipping");
            report.resources_invalid += 1;
            continue;
        }

        let existed = resources::find_by_scope_and_type(pool, scope_uuid, asset_type).await?.is_some();
        resources::upsert_seeded(pool, scope_uuid, asset_type, spec).await?;
        if existed {
            report.resources_updated += 1;
        } else {
            report.resources_created += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticResolver(Uuid);

    #[async_trait]
    impl ScopeResolver for StaticResolver {
        async fn resolve(&self, _project_name: &str, _domain_name: &str) -> Result<Uuid, ConfigError> {
            Ok(self.0)
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl ScopeResolver for FailingResolver {
        async fn resolve(&self, _project_name: &str, _domain_name: &str) -> Result<Uuid, ConfigError> {
            Err(ConfigError::Invalid("unknown project".into()))
        }
    }

    #[test]
    fn seed_report_defaults_to_zero() {
        let report = SeedReport::default();
        assert_eq!(report.resources_created, 0);
        assert_eq!(report.resources_invalid, 0);
        assert_eq!(report.projects_unresolved, 0);
    }
}
