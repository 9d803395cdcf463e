//! Persistence and state-machine transitions for `pending_operations` and
//! `finished_operations`. The lifecycle is `created → confirmed → greenlit →
//! finished(outcome)`; every transition increments the state-transition
//! counter, with the sentinel `none` as the "from" state on creation.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::decision::pick_winner;
use crate::error::StoreError;
use crate::metrics::OPERATION_STATE_TRANSITIONS;
use crate::models::{OperationOutcome, OperationReason, PendingOperation, Resource, UsageMap};
use crate::transition::{plan_transition, Confirm, Transition};

const PENDING_COLUMNS: &str = "asset_id, reason, old_size, new_size, usage_at_creation, \
    created_at, confirmed_at, greenlit_at, greenlit_by_user_id, leased_until";

pub async fn get_pending(pool: &PgPool, asset_id: Uuid) -> Result<Option<PendingOperation>, StoreError> {
    let row = sqlx::query_as::<_, PendingOperation>(&format!(
        "SELECT {PENDING_COLUMNS} FROM pending_operations WHERE asset_id = $1"
    ))
    .bind(asset_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

fn record_transition(project_id: Uuid, asset_type: &str, from: &str, to: &str) {
    OPERATION_STATE_TRANSITIONS
        .with_label_values(&[&project_id.to_string(), asset_type, from, to])
        .inc();
}

/// The label value describing where an operation currently sits in its
/// lifecycle, for use as a transition's "from" state.
fn state_label(op: &PendingOperation) -> &'static str {
    if op.greenlit_at.is_some() {
        "greenlit"
    } else if op.confirmed_at.is_some() {
        "confirmed"
    } else {
        "created"
    }
}

async fn insert_finished(
    tx: &mut Transaction<'_, Postgres>,
    op: &PendingOperation,
    outcome: OperationOutcome,
    finished_at: DateTime<Utc>,
    error_message: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO finished_operations (id, asset_id, reason, old_size, new_size, \
         usage_at_creation, created_at, confirmed_at, greenlit_at, greenlit_by_user_id, \
         outcome, finished_at, error_message) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)",
    )
    .bind(Uuid::new_v4())
    .bind(op.asset_id)
    .bind(op.reason)
    .bind(op.old_size)
    .bind(op.new_size)
    .bind(&op.usage_at_creation)
    .bind(op.created_at)
    .bind(op.confirmed_at)
    .bind(op.greenlit_at)
    .bind(&op.greenlit_by_user_id)
    .bind(outcome)
    .bind(finished_at)
    .bind(error_message)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn delete_pending(tx: &mut Transaction<'_, Postgres>, asset_id: Uuid) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM pending_operations WHERE asset_id = $1")
        .bind(asset_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Cancels the current pending op into `finished_operations` with outcome
/// `cancelled`: the decision that warranted it no longer holds, or its asset
/// is being deleted.
pub async fn cancel_pending(
    tx: &mut Transaction<'_, Postgres>,
    op: &PendingOperation,
    project_id: Uuid,
    asset_type: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    insert_finished(tx, op, OperationOutcome::Cancelled, now, None).await?;
    delete_pending(tx, op.asset_id).await?;
    record_transition(project_id, asset_type, state_label(op), "cancelled");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_pending(
    tx: &mut Transaction<'_, Postgres>,
    asset_id: Uuid,
    reason: OperationReason,
    old_size: i64,
    new_size: i64,
    usage_at_creation: &UsageMap,
    now: DateTime<Utc>,
    auto_greenlight: bool,
) -> Result<(), StoreError> {
    // A critical operation skips straight through confirm and greenlight;
    // all three timestamps coincide in that case.
    let confirmed_at = if auto_greenlight { Some(now) } else { None };
    let greenlit_at = if auto_greenlight { Some(now) } else { None };
    sqlx::query(
        "INSERT INTO pending_operations (asset_id, reason, old_size, new_size, \
         usage_at_creation, created_at, confirmed_at, greenlit_at, greenlit_by_user_id, leased_until) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,NULL,NULL)",
    )
    .bind(asset_id)
    .bind(reason)
    .bind(old_size)
    .bind(new_size)
    .bind(Json(usage_at_creation))
    .bind(now)
    .bind(confirmed_at)
    .bind(greenlit_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn record_creation(project_id: Uuid, asset_type: &str, auto_greenlight: bool) {
    record_transition(project_id, asset_type, "none", "created");
    if auto_greenlight {
        record_transition(project_id, asset_type, "created", "confirmed");
        record_transition(project_id, asset_type, "confirmed", "greenlit");
    }
}

/// Refreshes a still-`created` operation's target to the current decision.
/// `usage_at_creation` is deliberately left at its original snapshot: that
/// is the value auditable through the API.
async fn update_target(tx: &mut Transaction<'_, Postgres>, asset_id: Uuid, new_size: i64) -> Result<(), StoreError> {
    sqlx::query("UPDATE pending_operations SET new_size = $2 WHERE asset_id = $1")
        .bind(asset_id)
        .bind(new_size)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Advances the pending-operation state machine for one asset scrape.
/// `eligible` is the decision engine's output; `old_size` and
/// `usage_at_creation` are the asset's just-recorded observation. All
/// mutation happens in one transaction so the "replace" case (cancel old,
/// create new) is atomic, and the pending row is selected `FOR UPDATE` so
/// concurrent transitions on the same asset serialize.
#[allow(clippy::too_many_arguments)]
pub async fn reconcile(
    pool: &PgPool,
    asset_id: Uuid,
    resource: &Resource,
    eligible: &BTreeMap<OperationReason, u64>,
    old_size: i64,
    usage_at_creation: &UsageMap,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let asset_type = resource.asset_type.as_str();
    let project_id = resource.scope_uuid;
    let mut tx = pool.begin().await?;
    let current = sqlx::query_as::<_, PendingOperation>(&format!(
        "SELECT {PENDING_COLUMNS} FROM pending_operations WHERE asset_id = $1 FOR UPDATE"
    ))
    .bind(asset_id)
    .fetch_optional(&mut *tx)
    .await?;

    let winner = pick_winner(eligible);
    let plan = plan_transition(current.as_ref(), winner, resource, now);

    match plan {
        Transition::None => {}
        Transition::Create {
            reason,
            target,
            auto_greenlight,
        } => {
            insert_pending(&mut tx, asset_id, reason, old_size, target as i64, usage_at_creation, now, auto_greenlight).await?;
            record_creation(project_id, asset_type, auto_greenlight);
        }
        Transition::Cancel => {
            if let Some(op) = current {
                cancel_pending(&mut tx, &op, project_id, asset_type, now).await?;
            }
        }
        Transition::Replace {
            reason,
            target,
            auto_greenlight,
        } => {
            if let Some(op) = current {
                cancel_pending(&mut tx, &op, project_id, asset_type, now).await?;
            }
            insert_pending(&mut tx, asset_id, reason, old_size, target as i64, usage_at_creation, now, auto_greenlight).await?;
            record_creation(project_id, asset_type, auto_greenlight);
        }
        Transition::Refresh { target, confirm } => {
            update_target(&mut tx, asset_id, target as i64).await?;
            if let Some(confirm) = confirm {
                apply_confirm(&mut tx, asset_id, resource, confirm, now).await?;
            }
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Stamps `confirmed_at` (and `greenlit_at`, when no approval is needed) on
/// an operation that has outlived its reason's delay.
async fn apply_confirm(
    tx: &mut Transaction<'_, Postgres>,
    asset_id: Uuid,
    resource: &Resource,
    confirm: Confirm,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let greenlit_at = if confirm.greenlight { Some(now) } else { None };
    sqlx::query("UPDATE pending_operations SET confirmed_at = $2, greenlit_at = $3 WHERE asset_id = $1")
        .bind(asset_id)
        .bind(now)
        .bind(greenlit_at)
        .execute(&mut **tx)
        .await?;
    record_transition(resource.scope_uuid, &resource.asset_type, "created", "confirmed");
    if confirm.greenlight {
        record_transition(resource.scope_uuid, &resource.asset_type, "confirmed", "greenlit");
    }
    Ok(())
}

/// User-driven greenlight: only valid on a `confirmed`, not-yet-`greenlit`
/// op. Returns `false` when there was nothing in that state to greenlight.
pub async fn greenlight(
    pool: &PgPool,
    asset_id: Uuid,
    project_id: Uuid,
    asset_type: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE pending_operations SET greenlit_at = $2, greenlit_by_user_id = $3 \
         WHERE asset_id = $1 AND confirmed_at IS NOT NULL AND greenlit_at IS NULL",
    )
    .bind(asset_id)
    .bind(now)
    .bind(user_id)
    .execute(pool)
    .await?;
    let updated = result.rows_affected() > 0;
    if updated {
        record_transition(project_id, asset_type, "confirmed", "greenlit");
    }
    Ok(updated)
}

/// Claims one greenlit, not-yet-leased pending op for execution, preferring
/// the oldest greenlight. The claim is a conditional `UPDATE` stamping
/// `leased_until`, combined with `FOR UPDATE SKIP LOCKED` on the inner
/// select so parallel executor loops never fight over the same row.
pub async fn claim_next_for_resize(
    pool: &PgPool,
    lease_duration: ChronoDuration,
    now: DateTime<Utc>,
) -> Result<Option<PendingOperation>, StoreError> {
    let lease_until = now + lease_duration;
    let claimed = sqlx::query_as::<_, PendingOperation>(&format!(
        "UPDATE pending_operations SET leased_until = $2 WHERE asset_id = ( \
            SELECT asset_id FROM pending_operations \
            WHERE greenlit_at IS NOT NULL AND greenlit_at <= $1 \
              AND (leased_until IS NULL OR leased_until < $1) \
            ORDER BY greenlit_at ASC \
            LIMIT 1 \
            FOR UPDATE SKIP LOCKED \
        ) RETURNING {PENDING_COLUMNS}"
    ))
    .bind(now)
    .bind(lease_until)
    .fetch_optional(pool)
    .await?;
    Ok(claimed)
}

/// Retires a claimed op with a terminal outcome, moving it to
/// `finished_operations` in one transaction.
pub async fn finish(
    pool: &PgPool,
    op: &PendingOperation,
    project_id: Uuid,
    asset_type: &str,
    outcome: OperationOutcome,
    error_message: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    insert_finished(&mut tx, op, outcome, now, error_message).await?;
    delete_pending(&mut tx, op.asset_id).await?;
    tx.commit().await?;
    record_transition(project_id, asset_type, state_label(op), outcome.as_str());
    Ok(())
}

pub async fn list_pending_for_resource(pool: &PgPool, resource_id: Uuid) -> Result<Vec<PendingOperation>, StoreError> {
    let rows = sqlx::query_as::<_, PendingOperation>(
        "SELECT p.asset_id, p.reason, p.old_size, p.new_size, p.usage_at_creation, \
         p.created_at, p.confirmed_at, p.greenlit_at, p.greenlit_by_user_id, p.leased_until \
         FROM pending_operations p JOIN assets a ON a.id = p.asset_id \
         WHERE a.resource_id = $1 ORDER BY p.created_at ASC",
    )
    .bind(resource_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_finished_for_resource(pool: &PgPool, resource_id: Uuid, limit: i64) -> Result<Vec<crate::models::FinishedOperation>, StoreError> {
    let rows = sqlx::query_as::<_, crate::models::FinishedOperation>(
        "SELECT f.id, f.asset_id, f.reason, f.old_size, f.new_size, f.usage_at_creation, \
         f.created_at, f.confirmed_at, f.greenlit_at, f.greenlit_by_user_id, f.outcome, \
         f.finished_at, f.error_message \
         FROM finished_operations f JOIN assets a ON a.id = f.asset_id \
         WHERE a.resource_id = $1 ORDER BY f.finished_at DESC LIMIT $2",
    )
    .bind(resource_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_finished_for_asset(pool: &PgPool, asset_id: Uuid, limit: i64) -> Result<Vec<crate::models::FinishedOperation>, StoreError> {
    let rows = sqlx::query_as::<_, crate::models::FinishedOperation>(
        "SELECT id, asset_id, reason, old_size, new_size, usage_at_creation, created_at, \
         confirmed_at, greenlit_at, greenlit_by_user_id, outcome, finished_at, error_message \
         FROM finished_operations WHERE asset_id = $1 ORDER BY finished_at DESC LIMIT $2",
    )
    .bind(asset_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Deletes finished operations older than the retention window. Returns the
/// number of rows removed.
pub async fn garbage_collect(pool: &PgPool, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM finished_operations WHERE finished_at < $1")
        .bind(older_than)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Per-`(asset_type, reason)` counts of currently pending operations, for
/// the metrics cron's gauge refresh.
pub async fn count_pending_by_type_and_reason(pool: &PgPool) -> Result<Vec<(String, OperationReason, i64)>, StoreError> {
    let rows: Vec<(String, OperationReason, i64)> = sqlx::query_as(
        "SELECT r.asset_type, p.reason, COUNT(*) \
         FROM pending_operations p \
         JOIN assets a ON a.id = p.asset_id \
         JOIN resources r ON r.id = a.resource_id \
         GROUP BY r.asset_type, p.reason",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(confirmed: bool, greenlit: bool) -> PendingOperation {
        let now = Utc::now();
        PendingOperation {
            asset_id: Uuid::nil(),
            reason: OperationReason::High,
            old_size: 100,
            new_size: 120,
            usage_at_creation: Json(UsageMap::new()),
            created_at: now,
            confirmed_at: confirmed.then_some(now),
            greenlit_at: greenlit.then_some(now),
            greenlit_by_user_id: None,
            leased_until: None,
        }
    }

    #[test]
    fn state_label_follows_lifecycle() {
        assert_eq!(state_label(&op(false, false)), "created");
        assert_eq!(state_label(&op(true, false)), "confirmed");
        assert_eq!(state_label(&op(true, true)), "greenlit");
    }

    #[test]
    fn record_transition_accepts_all_known_pairs() {
        for (from, to) in crate::metrics::KNOWN_TRANSITIONS {
            record_transition(Uuid::nil(), "nfs", from, to);
        }
    }
}
