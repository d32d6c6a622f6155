//! Email campaign handlers.
//!
//! Sending snapshots the recipient list into `campaign_recipients`, marks
//! the campaign `sending`, and hands delivery to a background pass over the
//! queue. A recipient that fails is marked and skipped; the pass never
//! aborts, and the campaign lands on `sent` when the queue drains.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::{json, Value};

use super::auth;
use super::types::{CreateCampaignRequest, CreateStepRequest, SendCampaignRequest, UpdateCampaignRequest};
use super::AppState;
use crate::db::entities::{campaign, campaign_recipient, campaign_step, member};
use crate::db::unix_now;
use crate::error::{Result, ServerError};
use crate::mail::Mailer;

/// GET /api/orgs/:org_id/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let campaigns = campaign::Entity::find()
        .filter(campaign::Column::OrgId.eq(org_id))
        .order_by_desc(campaign::Column::UpdatedAt)
        .all(&state.db)
        .await?;

    Ok(Json(json!({ "campaigns": campaigns })))
}

/// POST /api/orgs/:org_id/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    if req.name.trim().is_empty() || req.subject.trim().is_empty() {
        return Err(ServerError::InvalidRequest("Campaign name and subject cannot be empty".into()));
    }

    let now = unix_now();
    let created = campaign::ActiveModel {
        org_id: Set(org_id),
        name: Set(req.name.trim().to_string()),
        subject: Set(req.subject.trim().to_string()),
        body: Set(req.body),
        status: Set("draft".to_string()),
        sent_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "campaign": created })))
}

async fn find_campaign(
    state: &AppState,
    headers: &HeaderMap,
    campaign_id: i32,
) -> Result<campaign::Model> {
    let row = campaign::Entity::find_by_id(campaign_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Campaign".into()))?;
    auth::require_membership(&state.db, &state.sessions, headers, row.org_id).await?;
    Ok(row)
}

/// POST /api/campaigns/:id - Edit a draft
pub async fn update_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<UpdateCampaignRequest>,
) -> Result<Json<Value>> {
    let row = find_campaign(&state, &headers, campaign_id).await?;

    if row.status != "draft" {
        return Err(ServerError::Conflict(format!("Campaign is {}", row.status)));
    }

    let mut active: campaign::ActiveModel = row.into();
    if let Some(name) = req.name {
        active.name = Set(name);
    }
    if let Some(subject) = req.subject {
        active.subject = Set(subject);
    }
    if let Some(body) = req.body {
        active.body = Set(body);
    }
    active.updated_at = Set(unix_now());
    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "campaign": updated })))
}

const DAY_SECS: i64 = 24 * 60 * 60;

/// GET /api/campaigns/:id/steps
///
/// Once the campaign has gone out, each step carries its due timestamp
/// (delays accumulate from `sent_at`). Delivery of later steps belongs to
/// the email provider.
pub async fn list_steps(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let row = find_campaign(&state, &headers, campaign_id).await?;

    let steps = campaign_step::Entity::find()
        .filter(campaign_step::Column::CampaignId.eq(row.id))
        .order_by_asc(campaign_step::Column::StepOrder)
        .all(&state.db)
        .await?;

    let mut elapsed_days: i64 = 0;
    let steps: Vec<Value> = steps
        .into_iter()
        .map(|s| {
            elapsed_days += s.delay_days as i64;
            let due_at = row.sent_at.map(|sent| sent + elapsed_days * DAY_SECS);
            json!({
                "id": s.id,
                "step_order": s.step_order,
                "delay_days": s.delay_days,
                "subject": s.subject,
                "body": s.body,
                "due_at": due_at,
            })
        })
        .collect();

    Ok(Json(json!({ "steps": steps })))
}

/// POST /api/campaigns/:id/steps - Append a follow-up step
pub async fn create_step(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateStepRequest>,
) -> Result<Json<Value>> {
    let row = find_campaign(&state, &headers, campaign_id).await?;

    if row.status != "draft" {
        return Err(ServerError::Conflict(format!("Campaign is {}", row.status)));
    }
    if req.delay_days < 0 {
        return Err(ServerError::InvalidRequest("delay_days cannot be negative".into()));
    }
    if req.subject.trim().is_empty() {
        return Err(ServerError::InvalidRequest("Step subject cannot be empty".into()));
    }

    let last = campaign_step::Entity::find()
        .filter(campaign_step::Column::CampaignId.eq(row.id))
        .order_by_desc(campaign_step::Column::StepOrder)
        .one(&state.db)
        .await?;
    let step_order = last.map(|s| s.step_order + 1).unwrap_or(1);

    let created = campaign_step::ActiveModel {
        campaign_id: Set(row.id),
        step_order: Set(step_order),
        delay_days: Set(req.delay_days),
        subject: Set(req.subject.trim().to_string()),
        body: Set(req.body),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "step": created })))
}

/// GET /api/campaigns/:id/recipients
pub async fn list_recipients(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let row = find_campaign(&state, &headers, campaign_id).await?;

    let recipients = campaign_recipient::Entity::find()
        .filter(campaign_recipient::Column::CampaignId.eq(row.id))
        .all(&state.db)
        .await?;

    Ok(Json(json!({ "recipients": recipients })))
}

/// POST /api/campaigns/:id/send
pub async fn send_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<SendCampaignRequest>,
) -> Result<Json<Value>> {
    let row = find_campaign(&state, &headers, campaign_id).await?;

    if row.status != "draft" {
        return Err(ServerError::Conflict(format!("Campaign is {}", row.status)));
    }

    // Snapshot the audience: an explicit list, or every active insured
    // member with an email on file.
    let recipients: Vec<(String, Option<i32>)> = match req.recipients {
        Some(list) => list.into_iter().map(|email| (email, None)).collect(),
        None => member::Entity::find()
            .filter(member::Column::OrgId.eq(row.org_id))
            .filter(member::Column::Status.eq("active"))
            .all(&state.db)
            .await?
            .into_iter()
            .filter_map(|m| m.email.clone().map(|email| (email, Some(m.id))))
            .collect(),
    };

    if recipients.is_empty() {
        return Err(ServerError::InvalidRequest("Campaign has no recipients".into()));
    }

    for (email, member_id) in &recipients {
        campaign_recipient::ActiveModel {
            campaign_id: Set(row.id),
            email: Set(email.clone()),
            member_id: Set(*member_id),
            status: Set("queued".to_string()),
            sent_at: Set(None),
            ..Default::default()
        }
        .insert(&state.db)
        .await?;
    }

    let queued = recipients.len();
    let mut active: campaign::ActiveModel = row.clone().into();
    active.status = Set("sending".to_string());
    active.updated_at = Set(unix_now());
    active.update(&state.db).await?;

    // Fire and forget the delivery pass.
    let db = state.db.clone();
    let mailer = state.mailer.clone();
    tokio::spawn(async move {
        if let Err(e) = deliver_campaign(&db, mailer.as_ref(), row.id).await {
            tracing::error!("Campaign {} delivery pass failed: {}", row.id, e);
        }
    });

    Ok(Json(json!({ "status": "sending", "queued": queued })))
}

async fn deliver_campaign(
    db: &DatabaseConnection,
    mailer: &dyn Mailer,
    campaign_id: i32,
) -> std::result::Result<(), sea_orm::DbErr> {
    let row = match campaign::Entity::find_by_id(campaign_id).one(db).await? {
        Some(c) => c,
        None => return Ok(()),
    };

    let queue = campaign_recipient::Entity::find()
        .filter(campaign_recipient::Column::CampaignId.eq(campaign_id))
        .filter(campaign_recipient::Column::Status.eq("queued"))
        .all(db)
        .await?;

    for recipient in queue {
        let outcome = mailer.send(&recipient.email, &row.subject, &row.body).await;
        let (status, sent_at) = match outcome {
            Ok(()) => ("sent", Some(unix_now())),
            Err(e) => {
                tracing::warn!("Campaign {} to {} failed: {}", campaign_id, recipient.email, e);
                ("failed", None)
            }
        };
        let mut active: campaign_recipient::ActiveModel = recipient.into();
        active.status = Set(status.to_string());
        active.sent_at = Set(sent_at);
        active.update(db).await?;
    }

    let mut active: campaign::ActiveModel = row.into();
    active.status = Set("sent".to_string());
    active.sent_at = Set(Some(unix_now()));
    active.updated_at = Set(unix_now());
    active.update(db).await?;

    tracing::info!("Campaign {} delivery pass complete", campaign_id);
    Ok(())
}
