//! Persistence for the `resources` table.

use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::Resource;
use crate::yamlconfig::ResourceSeedSpec;

const COLUMNS: &str = "id, scope_uuid, asset_type, thresholds, size_step_percent, single_step, \
    low_delay_seconds, high_delay_seconds, minimum_size, maximum_size, minimum_free_size, \
    strict_minimum_size, strict_maximum_size, minimum_free_is_critical, requires_greenlight, \
    config_json, scraped_at, asset_count, scrape_error_message, seeded";

pub async fn list_all(pool: &PgPool) -> Result<Vec<Resource>, StoreError> {
    let rows = sqlx::query_as::<_, Resource>(&format!(
        "SELECT {COLUMNS} FROM resources ORDER BY scope_uuid, asset_type"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_for_scope(pool: &PgPool, scope_uuid: Uuid) -> Result<Vec<Resource>, StoreError> {
    let rows = sqlx::query_as::<_, Resource>(&format!(
        "SELECT {COLUMNS} FROM resources WHERE scope_uuid = $1 ORDER BY asset_type"
    ))
    .bind(scope_uuid)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Resource>, StoreError> {
    let row = sqlx::query_as::<_, Resource>(&format!("SELECT {COLUMNS} FROM resources WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn find_by_scope_and_type(pool: &PgPool, scope_uuid: Uuid, asset_type: &str) -> Result<Option<Resource>, StoreError> {
    let row = sqlx::query_as::<_, Resource>(&format!(
        "SELECT {COLUMNS} FROM resources WHERE scope_uuid = $1 AND asset_type = $2"
    ))
    .bind(scope_uuid)
    .bind(asset_type)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Resources ordered for scraping, least recently scraped first
/// (never-scraped rows sort first via `scraped_at IS NULL`).
pub async fn list_due_for_scrape(pool: &PgPool, limit: i64) -> Result<Vec<Resource>, StoreError> {
    let rows = sqlx::query_as::<_, Resource>(&format!(
        "SELECT {COLUMNS} FROM resources ORDER BY scraped_at ASC NULLS FIRST LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn create(pool: &PgPool, resource: &Resource) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO resources (id, scope_uuid, asset_type, thresholds, size_step_percent, \
         single_step, low_delay_seconds, high_delay_seconds, minimum_size, maximum_size, \
         minimum_free_size, strict_minimum_size, strict_maximum_size, minimum_free_is_critical, \
         requires_greenlight, config_json, scraped_at, asset_count, scrape_error_message, seeded) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20)",
    )
    .bind(resource.id)
    .bind(resource.scope_uuid)
    .bind(&resource.asset_type)
    .bind(&resource.thresholds)
    .bind(resource.size_step_percent)
    .bind(resource.single_step)
    .bind(resource.low_delay_seconds)
    .bind(resource.high_delay_seconds)
    .bind(resource.minimum_size)
    .bind(resource.maximum_size)
    .bind(resource.minimum_free_size)
    .bind(resource.strict_minimum_size)
    .bind(resource.strict_maximum_size)
    .bind(resource.minimum_free_is_critical)
    .bind(resource.requires_greenlight)
    .bind(&resource.config_json)
    .bind(resource.scraped_at)
    .bind(resource.asset_count)
    .bind(&resource.scrape_error_message)
    .bind(resource.seeded)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_config(pool: &PgPool, resource: &Resource) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE resources SET thresholds = $2, size_step_percent = $3, single_step = $4, \
         low_delay_seconds = $5, high_delay_seconds = $6, minimum_size = $7, maximum_size = $8, \
         minimum_free_size = $9, strict_minimum_size = $10, strict_maximum_size = $11, \
         minimum_free_is_critical = $12, requires_greenlight = $13, config_json = $14 WHERE id = $1",
    )
    .bind(resource.id)
    .bind(&resource.thresholds)
    .bind(resource.size_step_percent)
    .bind(resource.single_step)
    .bind(resource.low_delay_seconds)
    .bind(resource.high_delay_seconds)
    .bind(resource.minimum_size)
    .bind(resource.maximum_size)
    .bind(resource.minimum_free_size)
    .bind(resource.strict_minimum_size)
    .bind(resource.strict_maximum_size)
    .bind(resource.minimum_free_is_critical)
    .bind(resource.requires_greenlight)
    .bind(&resource.config_json)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_scrape_result(
    pool: &PgPool,
    id: Uuid,
    scraped_at: chrono::DateTime<chrono::Utc>,
    asset_count: i64,
    error_message: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE resources SET scraped_at = $2, asset_count = $3, scrape_error_message = $4 WHERE id = $1")
        .bind(id)
        .bind(scraped_at)
        .bind(asset_count)
        .bind(error_message)
        .execute(pool)
        .await?;
    Ok(())
}

/// Deletes a resource unless it is seed-managed. Returns `Ok(false)`
/// without deleting when the row is seeded, leaving the decision of how to
/// report that to the caller.
pub async fn delete_if_not_seeded(pool: &PgPool, id: Uuid) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM resources WHERE id = $1 AND seeded = false")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Idempotent create-or-update for a seed-managed resource: the YAML
/// config is authoritative, so a re-run always overwrites the stored policy
/// with the seed's current spec.
pub async fn upsert_seeded(pool: &PgPool, scope_uuid: Uuid, asset_type: &str, spec: &ResourceSeedSpec) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO resources (id, scope_uuid, asset_type, thresholds, size_step_percent, \
         single_step, low_delay_seconds, high_delay_seconds, minimum_size, maximum_size, \
         minimum_free_size, strict_minimum_size, strict_maximum_size, minimum_free_is_critical, \
         requires_greenlight, config_json, scraped_at, asset_count, scrape_error_message, seeded) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,NULL,0,NULL,true) \
         ON CONFLICT (scope_uuid, asset_type) DO UPDATE SET \
         thresholds = EXCLUDED.thresholds, size_step_percent = EXCLUDED.size_step_percent, \
         single_step = EXCLUDED.single_step, low_delay_seconds = EXCLUDED.low_delay_seconds, \
         high_delay_seconds = EXCLUDED.high_delay_seconds, minimum_size = EXCLUDED.minimum_size, \
         maximum_size = EXCLUDED.maximum_size, minimum_free_size = EXCLUDED.minimum_free_size, \
         strict_minimum_size = EXCLUDED.strict_minimum_size, \
         strict_maximum_size = EXCLUDED.strict_maximum_size, \
         minimum_free_is_critical = EXCLUDED.minimum_free_is_critical, \
         requires_greenlight = EXCLUDED.requires_greenlight, config_json = EXCLUDED.config_json, \
         seeded = true",
    )
    .bind(Uuid::new_v4())
    .bind(scope_uuid)
    .bind(asset_type)
    .bind(Json(&spec.thresholds))
    .bind(spec.size_step_percent)
    .bind(spec.single_step)
    .bind(spec.low_delay_seconds)
    .bind(spec.high_delay_seconds)
    .bind(spec.minimum_size)
    .bind(spec.maximum_size)
    .bind(spec.minimum_free_size)
    .bind(spec.strict_minimum_size)
    .bind(spec.strict_maximum_size)
    .bind(spec.minimum_free_is_critical)
    .bind(spec.requires_greenlight)
    .bind(&spec.config)
    .execute(pool)
    .await?;
    Ok(())
}
