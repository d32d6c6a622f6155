//! Organization dashboard aggregation.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use serde_json::{json, Value};

use super::auth;
use super::AppState;
use crate::db::entities::{
    advisor, approval_request, billing_failure, enrollment, member, workflow, workflow_run,
};
use crate::error::Result;

/// GET /api/orgs/:org_id/dashboard
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let advisor_count = advisor::Entity::find()
        .filter(advisor::Column::OrgId.eq(org_id))
        .filter(advisor::Column::Status.eq("active"))
        .count(&state.db)
        .await?;

    let member_count = member::Entity::find()
        .filter(member::Column::OrgId.eq(org_id))
        .filter(member::Column::Status.eq("active"))
        .count(&state.db)
        .await?;

    let mut enrollments_by_status = serde_json::Map::new();
    for status in ["pending", "active", "terminated"] {
        let count = enrollment::Entity::find()
            .filter(enrollment::Column::OrgId.eq(org_id))
            .filter(enrollment::Column::Status.eq(status))
            .count(&state.db)
            .await?;
        enrollments_by_status.insert(status.to_string(), json!(count));
    }

    let open_failures = billing_failure::Entity::find()
        .filter(billing_failure::Column::OrgId.eq(org_id))
        .filter(billing_failure::Column::Status.eq("retrying"))
        .count(&state.db)
        .await?;

    let pending_approvals = approval_request::Entity::find()
        .filter(approval_request::Column::OrgId.eq(org_id))
        .filter(approval_request::Column::Status.eq("pending"))
        .count(&state.db)
        .await?;

    let recent_failures = billing_failure::Entity::find()
        .filter(billing_failure::Column::OrgId.eq(org_id))
        .order_by_desc(billing_failure::Column::UpdatedAt)
        .limit(5)
        .all(&state.db)
        .await?;

    // Recent automation activity across the org's workflows.
    let workflow_ids: Vec<i32> = workflow::Entity::find()
        .filter(workflow::Column::OrgId.eq(org_id))
        .all(&state.db)
        .await?
        .into_iter()
        .map(|w| w.id)
        .collect();
    let recent_runs = if workflow_ids.is_empty() {
        Vec::new()
    } else {
        workflow_run::Entity::find()
            .filter(workflow_run::Column::WorkflowId.is_in(workflow_ids))
            .order_by_desc(workflow_run::Column::StartedAt)
            .limit(5)
            .all(&state.db)
            .await?
    };

    Ok(Json(json!({
        "counts": {
            "advisors": advisor_count,
            "members": member_count,
            "enrollments": enrollments_by_status,
            "open_billing_failures": open_failures,
            "pending_approvals": pending_approvals,
        },
        "recent_billing_failures": recent_failures,
        "recent_workflow_runs": recent_runs,
    })))
}
