//! Cron-loop tasks run alongside the scrapers: garbage collection of old
//! finished operations and the periodic metrics refresh that keeps every
//! label combination initialized.

use std::time::Duration;

use crate::db::{operations, resources};
use crate::metrics::{self, ASSET_COUNT, GARBAGE_COLLECTED_OPERATIONS, PENDING_OPERATIONS};
use chrono::Utc;
use sqlx::PgPool;
use tracing::info;

/// Deletes finished operations older than the retention window.
pub async fn collect_garbage(pool: &PgPool, retention: Duration) -> anyhow::Result<()> {
    let cutoff = Utc::now() - chrono::Duration::from_std(retention)?;
    let deleted = operations::garbage_collect(pool, cutoff).await?;
    if deleted > 0 {
        info!(deleted, "garbage-collected finished operations");
    }
    GARBAGE_COLLECTED_OPERATIONS.inc_by(deleted);
    Ok(())
}

/// Re-initializes the metric series for every stored resource and refreshes
/// the pending-operation gauges. Run at startup and then on a fixed period,
/// so a restarted process exposes the full label space without waiting for
/// events to trickle in.
pub async fn refresh_metrics(pool: &PgPool) -> anyhow::Result<()> {
    let all = resources::list_all(pool).await?;
    for resource in &all {
        let project_id = resource.scope_uuid.to_string();
        metrics::initialize_resource_series(&project_id, &resource.asset_type);
        ASSET_COUNT
            .with_label_values(&[&project_id, &resource.asset_type])
            .set(resource.asset_count);
    }
    for (asset_type, reason, count) in operations::count_pending_by_type_and_reason(pool).await? {
        PENDING_OPERATIONS
            .with_label_values(&[&asset_type, reason.as_str()])
            .set(count);
    }
    Ok(())
}
