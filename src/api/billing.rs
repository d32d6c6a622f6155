//! Billing schedule, charge, and retry-workflow handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::{json, Value};

use super::auth;
use super::types::{ChargeOutcomeRequest, CreateScheduleRequest, UpdateScheduleRequest};
use super::AppState;
use crate::billing::{frequency_interval_secs, next_retry_at, MAX_RETRY_ATTEMPTS};
use crate::db::entities::{billing_failure, billing_schedule, billing_transaction, enrollment};
use crate::db::unix_now;
use crate::error::{Result, ServerError};

/// GET /api/orgs/:org_id/billing/schedules
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let schedules = billing_schedule::Entity::find()
        .filter(billing_schedule::Column::OrgId.eq(org_id))
        .order_by_asc(billing_schedule::Column::NextChargeAt)
        .all(&state.db)
        .await?;

    Ok(Json(json!({ "schedules": schedules })))
}

/// POST /api/orgs/:org_id/billing/schedules
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    if frequency_interval_secs(&req.frequency).is_none() {
        return Err(ServerError::InvalidRequest(format!("Unknown frequency: {}", req.frequency)));
    }

    let enrollment = enrollment::Entity::find_by_id(req.enrollment_id)
        .one(&state.db)
        .await?
        .filter(|e| e.org_id == org_id)
        .ok_or_else(|| ServerError::NotFound("Enrollment".into()))?;
    if enrollment.status == "terminated" {
        return Err(ServerError::Conflict("Enrollment is terminated".into()));
    }

    let amount = req.amount_cents.unwrap_or(enrollment.monthly_premium_cents);
    if amount <= 0 {
        return Err(ServerError::InvalidRequest("Amount must be positive".into()));
    }

    let now = unix_now();
    let created = billing_schedule::ActiveModel {
        org_id: Set(org_id),
        enrollment_id: Set(enrollment.id),
        amount_cents: Set(amount),
        frequency: Set(req.frequency),
        next_charge_at: Set(req.next_charge_at.unwrap_or(now)),
        status: Set("active".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "schedule": created })))
}

async fn find_schedule(
    state: &AppState,
    headers: &HeaderMap,
    schedule_id: i32,
) -> Result<billing_schedule::Model> {
    let row = billing_schedule::Entity::find_by_id(schedule_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Billing schedule".into()))?;
    auth::require_membership(&state.db, &state.sessions, headers, row.org_id).await?;
    Ok(row)
}

/// POST /api/billing/schedules/:id - Update amount/frequency, pause/resume
pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<UpdateScheduleRequest>,
) -> Result<Json<Value>> {
    let row = find_schedule(&state, &headers, schedule_id).await?;

    if let Some(frequency) = req.frequency.as_deref() {
        if frequency_interval_secs(frequency).is_none() {
            return Err(ServerError::InvalidRequest(format!("Unknown frequency: {}", frequency)));
        }
    }
    if let Some(status) = req.status.as_deref() {
        if !["active", "paused", "canceled"].contains(&status) {
            return Err(ServerError::InvalidRequest(format!("Unknown status: {}", status)));
        }
    }

    let mut active: billing_schedule::ActiveModel = row.into();
    if let Some(amount) = req.amount_cents {
        if amount <= 0 {
            return Err(ServerError::InvalidRequest("Amount must be positive".into()));
        }
        active.amount_cents = Set(amount);
    }
    if let Some(frequency) = req.frequency {
        active.frequency = Set(frequency);
    }
    if let Some(status) = req.status {
        active.status = Set(status);
    }
    active.updated_at = Set(unix_now());
    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "schedule": updated })))
}

/// POST /api/billing/schedules/:id/charge
///
/// Records the outcome the payment gateway reported. Success advances the
/// schedule; failure opens a retry workflow at attempt 0.
pub async fn charge_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<ChargeOutcomeRequest>,
) -> Result<Json<Value>> {
    let schedule = find_schedule(&state, &headers, schedule_id).await?;

    if schedule.status != "active" {
        return Err(ServerError::Conflict(format!("Schedule is {}", schedule.status)));
    }

    let now = unix_now();
    let status = if req.success { "succeeded" } else { "failed" };

    let txn = billing_transaction::ActiveModel {
        org_id: Set(schedule.org_id),
        schedule_id: Set(schedule.id),
        amount_cents: Set(schedule.amount_cents),
        status: Set(status.to_string()),
        failure_reason: Set(req.failure_reason.clone()),
        charged_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    if req.success {
        let interval = frequency_interval_secs(&schedule.frequency)
            .ok_or_else(|| ServerError::Internal(format!("schedule {} has bad frequency", schedule.id)))?;
        let next = schedule.next_charge_at + interval;
        let mut active: billing_schedule::ActiveModel = schedule.into();
        active.next_charge_at = Set(next);
        active.updated_at = Set(now);
        active.update(&state.db).await?;

        return Ok(Json(json!({ "transaction": txn })));
    }

    let failure = billing_failure::ActiveModel {
        org_id: Set(schedule.org_id),
        schedule_id: Set(schedule.id),
        transaction_id: Set(txn.id),
        amount_cents: Set(schedule.amount_cents),
        retry_attempt: Set(0),
        next_retry_at: Set(next_retry_at(0, now)),
        status: Set("retrying".to_string()),
        last_failure_reason: Set(req.failure_reason.unwrap_or_else(|| "declined".to_string())),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "transaction": txn, "failure": failure })))
}

/// GET /api/orgs/:org_id/billing/failures
pub async fn list_failures(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let failures = billing_failure::Entity::find()
        .filter(billing_failure::Column::OrgId.eq(org_id))
        .order_by_desc(billing_failure::Column::UpdatedAt)
        .all(&state.db)
        .await?;

    Ok(Json(json!({ "failures": failures })))
}

async fn find_failure(
    state: &AppState,
    headers: &HeaderMap,
    failure_id: i32,
) -> Result<billing_failure::Model> {
    let row = billing_failure::Entity::find_by_id(failure_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Billing failure".into()))?;
    auth::require_membership(&state.db, &state.sessions, headers, row.org_id).await?;
    Ok(row)
}

/// POST /api/billing/failures/:id/retry
///
/// One pass of the fixed-backoff retry policy: the attempt counter moves,
/// and either the failure resolves (gateway reported success) or the next
/// retry is stamped from the 1/3/7-day table until the cap exhausts it.
pub async fn retry_failure(
    State(state): State<Arc<AppState>>,
    Path(failure_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<ChargeOutcomeRequest>,
) -> Result<Json<Value>> {
    let failure = find_failure(&state, &headers, failure_id).await?;

    if failure.status != "retrying" {
        return Err(ServerError::Conflict(format!("Failure is {}", failure.status)));
    }

    let now = unix_now();
    let attempt = failure.retry_attempt + 1;
    let txn_status = if req.success { "succeeded" } else { "failed" };

    billing_transaction::ActiveModel {
        org_id: Set(failure.org_id),
        schedule_id: Set(failure.schedule_id),
        amount_cents: Set(failure.amount_cents),
        status: Set(txn_status.to_string()),
        failure_reason: Set(req.failure_reason.clone()),
        charged_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    let mut active: billing_failure::ActiveModel = failure.into();
    active.retry_attempt = Set(attempt);
    active.updated_at = Set(now);

    if req.success {
        active.status = Set("resolved".to_string());
        active.next_retry_at = Set(None);
    } else {
        if let Some(reason) = req.failure_reason {
            active.last_failure_reason = Set(reason);
        }
        match next_retry_at(attempt, now) {
            Some(next) => {
                active.next_retry_at = Set(Some(next));
            }
            None => {
                debug_assert!(attempt >= MAX_RETRY_ATTEMPTS);
                active.status = Set("exhausted".to_string());
                active.next_retry_at = Set(None);
            }
        }
    }

    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "failure": updated })))
}

/// POST /api/billing/failures/:id/resolve - Manual close
pub async fn resolve_failure(
    State(state): State<Arc<AppState>>,
    Path(failure_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let failure = find_failure(&state, &headers, failure_id).await?;

    if failure.status == "resolved" {
        return Err(ServerError::Conflict("Failure is already resolved".into()));
    }

    let mut active: billing_failure::ActiveModel = failure.into();
    active.status = Set("resolved".to_string());
    active.next_retry_at = Set(None);
    active.updated_at = Set(unix_now());
    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "failure": updated })))
}

/// GET /api/orgs/:org_id/billing/transactions
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let transactions = billing_transaction::Entity::find()
        .filter(billing_transaction::Column::OrgId.eq(org_id))
        .order_by_desc(billing_transaction::Column::ChargedAt)
        .all(&state.db)
        .await?;

    Ok(Json(json!({ "transactions": transactions })))
}
