//! The asset scraper: observes one asset, runs the decision engine, and
//! advances the pending-operation state machine.

use std::time::Duration;

use anyhow::Context;
use castellum::db::{assets, operations, resources};
use castellum::decision::{eligible_operations, AssetStatus, ResourceLogic};
use castellum::metrics::ASSET_SCRAPES;
use castellum::{resource_config_arg, ManagerRegistry};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

/// One scrape iteration. Returns `Ok(true)` if an asset was scraped,
/// `Ok(false)` if nothing was due.
pub async fn scrape_one_asset(pool: &PgPool, registry: &ManagerRegistry, scrape_interval: Duration) -> anyhow::Result<bool> {
    let candidates = assets::list_due_for_scrape(pool, 1).await.context("listing assets due for scrape")?;
    let Some(asset) = candidates.into_iter().next() else {
        return Ok(false);
    };

    // A stale asset is scraped immediately; otherwise respect the cadence.
    if !asset.stale {
        if let Some(checked_at) = asset.checked_at {
            let due_at = checked_at + chrono::Duration::from_std(scrape_interval).unwrap_or_default();
            if Utc::now() < due_at {
                return Ok(false);
            }
        }
    }

    let Some(resource) = resources::find_by_id(pool, asset.resource_id).await? else {
        // Orphaned asset row (resource deleted concurrently); clean it up.
        assets::delete(pool, asset.id).await?;
        return Ok(true);
    };
    let asset_type = resource.asset_type.clone();

    let Some(manager) = registry.get(&asset_type) else {
        warn!(asset_type = %asset_type, "no registered plugin for asset type, skipping asset scrape");
        ASSET_SCRAPES.with_label_values(&[&asset_type, "failure"]).inc();
        return Ok(true);
    };

    let status = manager
        .get_asset_status(&asset_type, resource.scope_uuid, asset.backend_uuid, resource_config_arg(&resource))
        .await;

    let report = match status {
        Ok(report) => report,
        Err(castellum::AssetLookupError::NotFound) => {
            if let Some(op) = operations::get_pending(pool, asset.id).await? {
                let mut tx = pool.begin().await?;
                operations::cancel_pending(&mut tx, &op, resource.scope_uuid, &asset_type, Utc::now()).await?;
                tx.commit().await?;
            }
            assets::delete(pool, asset.id).await?;
            info!(asset_id = %asset.id, "asset no longer reported by backend, deleted");
            ASSET_SCRAPES.with_label_values(&[&asset_type, "success"]).inc();
            return Ok(true);
        }
        Err(e) => {
            assets::mark_scrape_error(pool, asset.id, &e.to_string()).await?;
            warn!(asset_id = %asset.id, error = %e, "asset scrape failed");
            ASSET_SCRAPES.with_label_values(&[&asset_type, "failure"]).inc();
            return Ok(true);
        }
    };

    let now = Utc::now();
    assets::record_status(
        pool,
        asset.id,
        report.size as i64,
        &report.usage,
        now,
        None,
        report.strict_minimum_size.map(|v| v as i64),
        report.strict_maximum_size.map(|v| v as i64),
    )
    .await?;

    let Some(step) = resource.step_policy() else {
        warn!(resource_id = %resource.id, "resource has no valid step policy, skipping decision");
        ASSET_SCRAPES.with_label_values(&[&asset_type, "failure"]).inc();
        return Ok(true);
    };
    let logic = ResourceLogic {
        thresholds: resource.thresholds.0.clone(),
        step,
        constraints: resource.size_constraints(),
    };
    let asset_status = AssetStatus {
        size: report.size,
        usage: report.usage.clone(),
        strict_min: report.strict_minimum_size,
        strict_max: report.strict_maximum_size,
    };
    let eligible = eligible_operations(&logic, &asset_status);

    operations::reconcile(pool, asset.id, &resource, &eligible, report.size as i64, &report.usage, now)
        .await
        .context("reconciling pending operation")?;

    ASSET_SCRAPES.with_label_values(&[&asset_type, "success"]).inc();
    Ok(true)
}
