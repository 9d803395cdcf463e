//! The resource scraper: finds the least-recently-scraped resource, asks
//! its backend plugin for the current set of asset UUIDs, and reconciles
//! the `assets` table against that set.

use std::time::Duration;

use anyhow::Context;
use castellum::db::{assets, operations, resources};
use castellum::metrics::{ASSET_COUNT, RESOURCE_SCRAPES};
use castellum::{ManagerRegistry, Resource};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

/// One scrape iteration. Returns `Ok(true)` if a resource was scraped,
/// `Ok(false)` if nothing was due (so the caller's queued loop sleeps).
pub async fn scrape_one_resource(pool: &PgPool, registry: &ManagerRegistry, scrape_interval: Duration) -> anyhow::Result<bool> {
    let candidates = resources::list_due_for_scrape(pool, 1).await.context("listing resources due for scrape")?;
    let Some(resource) = candidates.into_iter().next() else {
        return Ok(false);
    };

    if let Some(scraped_at) = resource.scraped_at {
        let due_at = scraped_at + chrono::Duration::from_std(scrape_interval).unwrap_or_default();
        if Utc::now() < due_at {
            return Ok(false);
        }
    }

    let now = Utc::now();
    let asset_type = resource.asset_type.clone();
    let Some(manager) = registry.get(&asset_type) else {
        warn!(asset_type = %asset_type, "no registered plugin for asset type, skipping resource scrape");
        resources::record_scrape_result(pool, resource.id, now, resource.asset_count, Some("no registered plugin for asset type")).await?;
        RESOURCE_SCRAPES.with_label_values(&[&asset_type, "failure"]).inc();
        return Ok(true);
    };

    match manager.list_assets(&asset_type, resource.scope_uuid).await {
        Ok(backend_uuids) => {
            reconcile_assets(pool, &resource, &backend_uuids, &*manager).await?;
            resources::record_scrape_result(pool, resource.id, now, backend_uuids.len() as i64, None).await?;
            ASSET_COUNT
                .with_label_values(&[&resource.scope_uuid.to_string(), &asset_type])
                .set(backend_uuids.len() as i64);
            info!(resource_id = %resource.id, asset_type = %asset_type, count = backend_uuids.len(), "resource scrape completed");
            RESOURCE_SCRAPES.with_label_values(&[&asset_type, "success"]).inc();
        }
        Err(e) => {
            // An error is recorded on the resource row and surfaced through
            // metrics; it never aborts scrapes of other resources.
            warn!(resource_id = %resource.id, error = %e, "resource scrape failed");
            resources::record_scrape_result(pool, resource.id, now, resource.asset_count, Some(&e.to_string())).await?;
            RESOURCE_SCRAPES.with_label_values(&[&asset_type, "failure"]).inc();
        }
    }
    Ok(true)
}

async fn reconcile_assets(
    pool: &PgPool,
    resource: &Resource,
    backend_uuids: &[uuid::Uuid],
    manager: &(dyn castellum::AssetManager + '_),
) -> anyhow::Result<()> {
    let existing = assets::list_for_resource(pool, resource.id).await?;

    for backend_uuid in backend_uuids {
        if !existing.iter().any(|a| &a.backend_uuid == backend_uuid) {
            let asset_id = assets::create(pool, resource.id, *backend_uuid).await?;
            match manager
                .get_asset_status(&resource.asset_type, resource.scope_uuid, *backend_uuid, castellum::resource_config_arg(resource))
                .await
            {
                Ok(status) => {
                    assets::record_status(
                        pool,
                        asset_id,
                        status.size as i64,
                        &status.usage,
                        Utc::now(),
                        None,
                        status.strict_minimum_size.map(|v| v as i64),
                        status.strict_maximum_size.map(|v| v as i64),
                    )
                    .await?;
                }
                Err(e) => {
                    assets::mark_scrape_error(pool, asset_id, &e.to_string()).await?;
                }
            }
        }
    }

    for asset in &existing {
        if !backend_uuids.contains(&asset.backend_uuid) {
            delete_vanished_asset(pool, asset.id, resource).await?;
        }
    }

    Ok(())
}

/// Removes an asset the backend no longer reports, cancelling any pending
/// operation transactionally first.
async fn delete_vanished_asset(pool: &PgPool, asset_id: uuid::Uuid, resource: &Resource) -> anyhow::Result<()> {
    if let Some(op) = operations::get_pending(pool, asset_id).await? {
        let mut tx = pool.begin().await?;
        operations::cancel_pending(&mut tx, &op, resource.scope_uuid, &resource.asset_type, Utc::now()).await?;
        tx.commit().await?;
    }
    assets::delete(pool, asset_id).await?;
    Ok(())
}
