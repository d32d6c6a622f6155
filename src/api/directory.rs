//! Advisor, insured-member, and enrollment handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::{json, Value};

use super::auth;
use super::types::{
    CreateAdvisorRequest, CreateEnrollmentRequest, CreateInsuredMemberRequest,
    UpdateAdvisorRequest, UpdateEnrollmentRequest, UpdateInsuredMemberRequest,
};
use super::AppState;
use crate::db::entities::{advisor, billing_schedule, enrollment, member};
use crate::db::unix_now;
use crate::error::{Result, ServerError};

// ============================================================================
// Advisors
// ============================================================================

/// GET /api/orgs/:org_id/advisors
pub async fn list_advisors(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let advisors = advisor::Entity::find()
        .filter(advisor::Column::OrgId.eq(org_id))
        .order_by_asc(advisor::Column::Name)
        .all(&state.db)
        .await?;

    Ok(Json(json!({ "advisors": advisors })))
}

/// POST /api/orgs/:org_id/advisors
pub async fn create_advisor(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateAdvisorRequest>,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    if req.name.trim().is_empty() {
        return Err(ServerError::InvalidRequest("Advisor name cannot be empty".into()));
    }

    let now = unix_now();
    let created = advisor::ActiveModel {
        org_id: Set(org_id),
        name: Set(req.name.trim().to_string()),
        email: Set(req.email),
        phone: Set(req.phone),
        license_number: Set(req.license_number),
        status: Set("active".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "advisor": created })))
}

/// Load an advisor and check the caller can see it.
async fn find_advisor(
    state: &AppState,
    headers: &HeaderMap,
    advisor_id: i32,
) -> Result<advisor::Model> {
    let row = advisor::Entity::find_by_id(advisor_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Advisor".into()))?;
    auth::require_membership(&state.db, &state.sessions, headers, row.org_id).await?;
    Ok(row)
}

/// GET /api/advisors/:id
pub async fn get_advisor(
    State(state): State<Arc<AppState>>,
    Path(advisor_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let row = find_advisor(&state, &headers, advisor_id).await?;
    Ok(Json(json!({ "advisor": row })))
}

/// POST /api/advisors/:id
pub async fn update_advisor(
    State(state): State<Arc<AppState>>,
    Path(advisor_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<UpdateAdvisorRequest>,
) -> Result<Json<Value>> {
    let row = find_advisor(&state, &headers, advisor_id).await?;

    if let Some(status) = req.status.as_deref() {
        if status != "active" && status != "inactive" {
            return Err(ServerError::InvalidRequest(format!("Unknown status: {}", status)));
        }
    }

    let mut active: advisor::ActiveModel = row.into();
    if let Some(name) = req.name {
        active.name = Set(name);
    }
    if let Some(email) = req.email {
        active.email = Set(Some(email));
    }
    if let Some(phone) = req.phone {
        active.phone = Set(Some(phone));
    }
    if let Some(license) = req.license_number {
        active.license_number = Set(Some(license));
    }
    if let Some(status) = req.status {
        active.status = Set(status);
    }
    active.updated_at = Set(unix_now());
    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "advisor": updated })))
}

/// DELETE /api/advisors/:id
pub async fn delete_advisor(
    State(state): State<Arc<AppState>>,
    Path(advisor_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let row = advisor::Entity::find_by_id(advisor_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Advisor".into()))?;
    auth::require_admin(&state.db, &state.sessions, &headers, row.org_id).await?;

    advisor::Entity::delete_by_id(advisor_id).exec(&state.db).await?;

    Ok(Json(json!({ "deleted": advisor_id })))
}

// ============================================================================
// Insured members
// ============================================================================

/// GET /api/orgs/:org_id/insured
pub async fn list_insured(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let members = member::Entity::find()
        .filter(member::Column::OrgId.eq(org_id))
        .order_by_asc(member::Column::LastName)
        .all(&state.db)
        .await?;

    Ok(Json(json!({ "members": members })))
}

/// POST /api/orgs/:org_id/insured
pub async fn create_insured(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateInsuredMemberRequest>,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(ServerError::InvalidRequest("Member name cannot be empty".into()));
    }

    if let Some(advisor_id) = req.advisor_id {
        let advisor = advisor::Entity::find_by_id(advisor_id).one(&state.db).await?;
        match advisor {
            Some(a) if a.org_id == org_id => {}
            _ => return Err(ServerError::NotFound("Advisor".into())),
        }
    }

    let now = unix_now();
    let created = member::ActiveModel {
        org_id: Set(org_id),
        advisor_id: Set(req.advisor_id),
        first_name: Set(req.first_name.trim().to_string()),
        last_name: Set(req.last_name.trim().to_string()),
        email: Set(req.email),
        phone: Set(req.phone),
        date_of_birth: Set(req.date_of_birth),
        status: Set("active".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "member": created })))
}

async fn find_insured(
    state: &AppState,
    headers: &HeaderMap,
    member_id: i32,
) -> Result<member::Model> {
    let row = member::Entity::find_by_id(member_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Member".into()))?;
    auth::require_membership(&state.db, &state.sessions, headers, row.org_id).await?;
    Ok(row)
}

/// GET /api/insured/:id
pub async fn get_insured(
    State(state): State<Arc<AppState>>,
    Path(member_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let row = find_insured(&state, &headers, member_id).await?;
    Ok(Json(json!({ "member": row })))
}

/// POST /api/insured/:id
pub async fn update_insured(
    State(state): State<Arc<AppState>>,
    Path(member_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<UpdateInsuredMemberRequest>,
) -> Result<Json<Value>> {
    let row = find_insured(&state, &headers, member_id).await?;
    let org_id = row.org_id;

    if let Some(status) = req.status.as_deref() {
        if status != "active" && status != "inactive" {
            return Err(ServerError::InvalidRequest(format!("Unknown status: {}", status)));
        }
    }
    if let Some(advisor_id) = req.advisor_id {
        let advisor = advisor::Entity::find_by_id(advisor_id).one(&state.db).await?;
        match advisor {
            Some(a) if a.org_id == org_id => {}
            _ => return Err(ServerError::NotFound("Advisor".into())),
        }
    }

    let mut active: member::ActiveModel = row.into();
    if req.advisor_id.is_some() {
        active.advisor_id = Set(req.advisor_id);
    }
    if let Some(first) = req.first_name {
        active.first_name = Set(first);
    }
    if let Some(last) = req.last_name {
        active.last_name = Set(last);
    }
    if let Some(email) = req.email {
        active.email = Set(Some(email));
    }
    if let Some(phone) = req.phone {
        active.phone = Set(Some(phone));
    }
    if let Some(dob) = req.date_of_birth {
        active.date_of_birth = Set(Some(dob));
    }
    if let Some(status) = req.status {
        active.status = Set(status);
    }
    active.updated_at = Set(unix_now());
    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "member": updated })))
}

/// DELETE /api/insured/:id
pub async fn delete_insured(
    State(state): State<Arc<AppState>>,
    Path(member_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let row = member::Entity::find_by_id(member_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Member".into()))?;
    auth::require_admin(&state.db, &state.sessions, &headers, row.org_id).await?;

    member::Entity::delete_by_id(member_id).exec(&state.db).await?;

    Ok(Json(json!({ "deleted": member_id })))
}

// ============================================================================
// Enrollments
// ============================================================================

/// GET /api/insured/:id/enrollments
pub async fn list_enrollments(
    State(state): State<Arc<AppState>>,
    Path(member_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let row = find_insured(&state, &headers, member_id).await?;

    let enrollments = enrollment::Entity::find()
        .filter(enrollment::Column::MemberId.eq(row.id))
        .order_by_desc(enrollment::Column::CreatedAt)
        .all(&state.db)
        .await?;

    Ok(Json(json!({ "enrollments": enrollments })))
}

/// POST /api/insured/:id/enrollments
pub async fn create_enrollment(
    State(state): State<Arc<AppState>>,
    Path(member_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateEnrollmentRequest>,
) -> Result<Json<Value>> {
    let row = find_insured(&state, &headers, member_id).await?;

    if req.plan_name.trim().is_empty() {
        return Err(ServerError::InvalidRequest("Plan name cannot be empty".into()));
    }
    if req.monthly_premium_cents < 0 {
        return Err(ServerError::InvalidRequest("Premium cannot be negative".into()));
    }

    let now = unix_now();
    let created = enrollment::ActiveModel {
        org_id: Set(row.org_id),
        member_id: Set(row.id),
        plan_name: Set(req.plan_name.trim().to_string()),
        monthly_premium_cents: Set(req.monthly_premium_cents),
        status: Set("pending".to_string()),
        effective_at: Set(req.effective_at.unwrap_or(now)),
        terminated_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "enrollment": created })))
}

async fn find_enrollment(
    state: &AppState,
    headers: &HeaderMap,
    enrollment_id: i32,
) -> Result<enrollment::Model> {
    let row = enrollment::Entity::find_by_id(enrollment_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Enrollment".into()))?;
    auth::require_membership(&state.db, &state.sessions, headers, row.org_id).await?;
    Ok(row)
}

/// POST /api/enrollments/:id
pub async fn update_enrollment(
    State(state): State<Arc<AppState>>,
    Path(enrollment_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<UpdateEnrollmentRequest>,
) -> Result<Json<Value>> {
    let row = find_enrollment(&state, &headers, enrollment_id).await?;

    if row.status == "terminated" {
        return Err(ServerError::Conflict("Enrollment is terminated".into()));
    }
    if let Some(status) = req.status.as_deref() {
        if status != "pending" && status != "active" {
            return Err(ServerError::InvalidRequest(
                "Status can only move between pending and active here; use terminate".into(),
            ));
        }
    }

    let mut active: enrollment::ActiveModel = row.into();
    if let Some(plan) = req.plan_name {
        active.plan_name = Set(plan);
    }
    if let Some(premium) = req.monthly_premium_cents {
        if premium < 0 {
            return Err(ServerError::InvalidRequest("Premium cannot be negative".into()));
        }
        active.monthly_premium_cents = Set(premium);
    }
    if let Some(status) = req.status {
        active.status = Set(status);
    }
    active.updated_at = Set(unix_now());
    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "enrollment": updated })))
}

/// POST /api/enrollments/:id/terminate
///
/// Stamps the termination and cancels the enrollment's billing schedules.
pub async fn terminate_enrollment(
    State(state): State<Arc<AppState>>,
    Path(enrollment_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let row = find_enrollment(&state, &headers, enrollment_id).await?;

    if row.status == "terminated" {
        return Err(ServerError::Conflict("Enrollment is already terminated".into()));
    }

    let now = unix_now();
    let enrollment_id = row.id;
    let mut active: enrollment::ActiveModel = row.into();
    active.status = Set("terminated".to_string());
    active.terminated_at = Set(Some(now));
    active.updated_at = Set(now);
    let updated = active.update(&state.db).await?;

    let schedules = billing_schedule::Entity::find()
        .filter(billing_schedule::Column::EnrollmentId.eq(enrollment_id))
        .filter(billing_schedule::Column::Status.ne("canceled"))
        .all(&state.db)
        .await?;
    for schedule in schedules {
        let mut active: billing_schedule::ActiveModel = schedule.into();
        active.status = Set("canceled".to_string());
        active.updated_at = Set(now);
        active.update(&state.db).await?;
    }

    Ok(Json(json!({ "enrollment": updated })))
}
