//! Persistence for the `assets` table.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Asset, UsageMap};

const COLUMNS: &str = "id, resource_id, backend_uuid, size, usage, checked_at, \
    scrape_error_message, stale, strict_minimum_size, strict_maximum_size";

pub async fn list_for_resource(pool: &PgPool, resource_id: Uuid) -> Result<Vec<Asset>, StoreError> {
    let rows = sqlx::query_as::<_, Asset>(&format!("SELECT {COLUMNS} FROM assets WHERE resource_id = $1"))
        .bind(resource_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Candidates for an asset scrape: stale assets first (they want a
/// re-scrape ASAP), then oldest-checked.
pub async fn list_due_for_scrape(pool: &PgPool, limit: i64) -> Result<Vec<Asset>, StoreError> {
    let rows = sqlx::query_as::<_, Asset>(&format!(
        "SELECT {COLUMNS} FROM assets ORDER BY stale DESC, checked_at ASC NULLS FIRST LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Asset>, StoreError> {
    let row = sqlx::query_as::<_, Asset>(&format!("SELECT {COLUMNS} FROM assets WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn find_by_backend_uuid(pool: &PgPool, resource_id: Uuid, backend_uuid: Uuid) -> Result<Option<Asset>, StoreError> {
    let row = sqlx::query_as::<_, Asset>(&format!(
        "SELECT {COLUMNS} FROM assets WHERE resource_id = $1 AND backend_uuid = $2"
    ))
    .bind(resource_id)
    .bind(backend_uuid)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Inserts a newly discovered asset, marked stale so it is scraped soon.
pub async fn create(pool: &PgPool, resource_id: Uuid, backend_uuid: Uuid) -> Result<Uuid, StoreError> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO assets (id, resource_id, backend_uuid, size, usage, checked_at, stale) \
         VALUES ($1, $2, $3, 0, '{}'::jsonb, NULL, true)",
    )
    .bind(id)
    .bind(resource_id)
    .bind(backend_uuid)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Records a fresh `get_asset_status` observation and clears `stale`.
#[allow(clippy::too_many_arguments)]
pub async fn record_status(
    pool: &PgPool,
    id: Uuid,
    size: i64,
    usage: &UsageMap,
    checked_at: DateTime<Utc>,
    scrape_error_message: Option<&str>,
    strict_minimum_size: Option<i64>,
    strict_maximum_size: Option<i64>,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE assets SET size = $2, usage = $3, checked_at = $4, scrape_error_message = $5, \
         stale = false, strict_minimum_size = $6, strict_maximum_size = $7 WHERE id = $1",
    )
    .bind(id)
    .bind(size)
    .bind(Json(usage))
    .bind(checked_at)
    .bind(scrape_error_message)
    .bind(strict_minimum_size)
    .bind(strict_maximum_size)
    .execute(pool)
    .await?;
    Ok(())
}

/// Requests an out-of-cadence re-scrape, e.g. after a resize succeeded and
/// the next observation should verify the new size.
pub async fn mark_stale(pool: &PgPool, id: Uuid) -> Result<(), StoreError> {
    sqlx::query("UPDATE assets SET stale = true WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_scrape_error(pool: &PgPool, id: Uuid, message: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE assets SET scrape_error_message = $2 WHERE id = $1")
        .bind(id)
        .bind(message)
        .execute(pool)
        .await?;
    Ok(())
}

/// Deletes an asset row, e.g. after the backend reports it gone. Cascades
/// to any pending operation via the foreign key.
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM assets WHERE id = $1").bind(id).execute(pool).await?;
    Ok(())
}

