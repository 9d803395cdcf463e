//! The resize executor: claims one greenlit pending operation, invokes the
//! backend resize, classifies the result and retires the operation into the
//! finished table.

use std::time::{Duration, Instant};

use anyhow::Context;
use castellum::db::{assets, operations, resources};
use castellum::metrics::{ASSET_RESIZES, ASSET_RESIZE_DURATION};
use castellum::{resource_config_arg, AssetLookupError, ManagerRegistry, OperationOutcome, ResizeOutcome};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

/// One executor iteration. Returns `Ok(true)` if an operation was claimed
/// and retired, `Ok(false)` if nothing was greenlit.
pub async fn execute_one_resize(pool: &PgPool, registry: &ManagerRegistry, lease: Duration) -> anyhow::Result<bool> {
    let now = Utc::now();
    let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(1800));
    let Some(op) = operations::claim_next_for_resize(pool, lease, now).await.context("claiming pending operation")? else {
        return Ok(false);
    };

    let Some(asset) = assets::find_by_id(pool, op.asset_id).await? else {
        // The asset (and with it the pending op, via cascade) was deleted
        // between claim and load; nothing left to do.
        return Ok(true);
    };
    let Some(resource) = resources::find_by_id(pool, asset.resource_id).await? else {
        assets::delete(pool, asset.id).await?;
        return Ok(true);
    };
    let asset_type = resource.asset_type.clone();
    let project_id = resource.scope_uuid;

    let Some(manager) = registry.get(&asset_type) else {
        warn!(asset_type = %asset_type, "no registered plugin for asset type, erroring operation");
        operations::finish(
            pool,
            &op,
            project_id,
            &asset_type,
            OperationOutcome::Errored,
            Some("no registered plugin for asset type"),
            Utc::now(),
        )
        .await?;
        ASSET_RESIZES.with_label_values(&[&asset_type, "errored"]).inc();
        return Ok(true);
    };

    info!(
        asset_id = %asset.id,
        asset_type = %asset_type,
        reason = op.reason.as_str(),
        old_size = op.old_size,
        new_size = op.new_size,
        "executing resize"
    );
    let started = Instant::now();
    let result = manager
        .set_asset_size(
            &asset_type,
            resource.scope_uuid,
            asset.backend_uuid,
            op.old_size as u64,
            op.new_size as u64,
            resource_config_arg(&resource),
        )
        .await;
    ASSET_RESIZE_DURATION
        .with_label_values(&[&asset_type])
        .observe(started.elapsed().as_secs_f64());

    let (outcome, error_message) = match result {
        Ok(ResizeOutcome::Succeeded) => (OperationOutcome::Succeeded, None),
        Ok(ResizeOutcome::Failed(message)) => (OperationOutcome::Failed, Some(message)),
        Ok(ResizeOutcome::Errored(message)) => (OperationOutcome::Errored, Some(message)),
        Err(AssetLookupError::NotFound) => {
            // The asset vanished mid-flight: record the op as cancelled and
            // drop the asset row so the scrapers stop looking for it.
            operations::finish(pool, &op, project_id, &asset_type, OperationOutcome::Cancelled, None, Utc::now()).await?;
            assets::delete(pool, asset.id).await?;
            ASSET_RESIZES.with_label_values(&[&asset_type, "cancelled"]).inc();
            info!(asset_id = %asset.id, "asset gone at backend, operation cancelled and asset deleted");
            return Ok(true);
        }
        Err(e) => (OperationOutcome::Errored, Some(e.to_string())),
    };

    operations::finish(pool, &op, project_id, &asset_type, outcome, error_message.as_deref(), Utc::now()).await?;
    ASSET_RESIZES.with_label_values(&[&asset_type, outcome.as_str()]).inc();

    match outcome {
        OperationOutcome::Succeeded => {
            // Verify the new size on the next observation.
            assets::mark_stale(pool, asset.id).await?;
            info!(asset_id = %asset.id, new_size = op.new_size, "resize succeeded");
        }
        _ => {
            warn!(
                asset_id = %asset.id,
                outcome = outcome.as_str(),
                error = error_message.as_deref().unwrap_or(""),
                "resize did not succeed"
            );
        }
    }

    Ok(true)
}
