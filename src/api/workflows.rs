//! Workflow definition handlers. Execution lives in `crate::automation`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::{json, Value};

use super::auth;
use super::types::{CreateWorkflowRequest, UpdateWorkflowRequest};
use super::{crm, AppState};
use crate::automation::Action;
use crate::db::entities::{workflow, workflow_run};
use crate::db::unix_now;
use crate::error::{Result, ServerError};
use crate::rules::RuleGroup;

const TRIGGERS: [&str; 4] = ["record_created", "record_updated", "field_changed", "stage_changed"];

fn validate_trigger(trigger_kind: &str, trigger_field: Option<&str>) -> Result<()> {
    if !TRIGGERS.contains(&trigger_kind) {
        return Err(ServerError::InvalidRequest(format!("Unknown trigger: {}", trigger_kind)));
    }
    if trigger_kind == "field_changed" && trigger_field.map_or(true, |f| f.trim().is_empty()) {
        return Err(ServerError::InvalidRequest(
            "field_changed triggers need a trigger_field".into(),
        ));
    }
    Ok(())
}

fn validate_conditions(conditions: &Value) -> Result<String> {
    let group: RuleGroup = serde_json::from_value(conditions.clone())
        .map_err(|e| ServerError::InvalidRequest(format!("Bad conditions: {}", e)))?;
    serde_json::to_string(&group).map_err(|e| ServerError::Internal(e.to_string()))
}

fn validate_actions(actions: &Value) -> Result<String> {
    let parsed: Vec<Action> = serde_json::from_value(actions.clone())
        .map_err(|e| ServerError::InvalidRequest(format!("Bad actions: {}", e)))?;
    if parsed.is_empty() {
        return Err(ServerError::InvalidRequest("Workflow needs at least one action".into()));
    }
    Ok(actions.to_string())
}

fn workflow_json(wf: &workflow::Model) -> Value {
    json!({
        "id": wf.id,
        "module_id": wf.module_id,
        "name": wf.name,
        "trigger_kind": wf.trigger_kind,
        "trigger_field": wf.trigger_field,
        "conditions": serde_json::from_str::<Value>(&wf.conditions).unwrap_or(Value::Null),
        "actions": serde_json::from_str::<Value>(&wf.actions).unwrap_or(Value::Null),
        "enabled": wf.enabled,
        "created_at": wf.created_at,
        "updated_at": wf.updated_at,
    })
}

/// GET /api/orgs/:org_id/workflows
pub async fn list_workflows(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let workflows = workflow::Entity::find()
        .filter(workflow::Column::OrgId.eq(org_id))
        .order_by_asc(workflow::Column::Name)
        .all(&state.db)
        .await?;

    let workflows: Vec<Value> = workflows.iter().map(workflow_json).collect();

    Ok(Json(json!({ "workflows": workflows })))
}

/// POST /api/orgs/:org_id/workflows
pub async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<Json<Value>> {
    auth::require_admin(&state.db, &state.sessions, &headers, org_id).await?;

    let module = crm::find_module(&state, &headers, req.module_id).await?;
    if module.org_id != org_id {
        return Err(ServerError::NotFound("Module".into()));
    }

    if req.name.trim().is_empty() {
        return Err(ServerError::InvalidRequest("Workflow name cannot be empty".into()));
    }
    validate_trigger(&req.trigger_kind, req.trigger_field.as_deref())?;

    let conditions = validate_conditions(
        &req.conditions.unwrap_or_else(|| json!({ "join": "and", "conditions": [] })),
    )?;
    let actions = validate_actions(&req.actions)?;

    let now = unix_now();
    let created = workflow::ActiveModel {
        org_id: Set(org_id),
        module_id: Set(module.id),
        name: Set(req.name.trim().to_string()),
        trigger_kind: Set(req.trigger_kind),
        trigger_field: Set(req.trigger_field),
        conditions: Set(conditions),
        actions: Set(actions),
        enabled: Set(req.enabled.unwrap_or(true)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "workflow": workflow_json(&created) })))
}

async fn find_workflow(
    state: &AppState,
    headers: &HeaderMap,
    workflow_id: i32,
) -> Result<workflow::Model> {
    let wf = workflow::Entity::find_by_id(workflow_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Workflow".into()))?;
    auth::require_admin(&state.db, &state.sessions, headers, wf.org_id).await?;
    Ok(wf)
}

/// POST /api/workflows/:id
pub async fn update_workflow(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<UpdateWorkflowRequest>,
) -> Result<Json<Value>> {
    let wf = find_workflow(&state, &headers, workflow_id).await?;

    let trigger_kind = req.trigger_kind.clone().unwrap_or_else(|| wf.trigger_kind.clone());
    let trigger_field = req.trigger_field.clone().or_else(|| wf.trigger_field.clone());
    validate_trigger(&trigger_kind, trigger_field.as_deref())?;

    let mut active: workflow::ActiveModel = wf.into();
    if let Some(name) = req.name {
        if name.trim().is_empty() {
            return Err(ServerError::InvalidRequest("Workflow name cannot be empty".into()));
        }
        active.name = Set(name.trim().to_string());
    }
    active.trigger_kind = Set(trigger_kind);
    active.trigger_field = Set(trigger_field);
    if let Some(conditions) = req.conditions {
        active.conditions = Set(validate_conditions(&conditions)?);
    }
    if let Some(actions) = req.actions {
        active.actions = Set(validate_actions(&actions)?);
    }
    if let Some(enabled) = req.enabled {
        active.enabled = Set(enabled);
    }
    active.updated_at = Set(unix_now());
    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "workflow": workflow_json(&updated) })))
}

/// DELETE /api/workflows/:id
pub async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let wf = find_workflow(&state, &headers, workflow_id).await?;

    workflow::Entity::delete_by_id(wf.id).exec(&state.db).await?;

    Ok(Json(json!({ "deleted": workflow_id })))
}

/// POST /api/workflows/:id/toggle
pub async fn toggle_workflow(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let wf = find_workflow(&state, &headers, workflow_id).await?;

    let enabled = !wf.enabled;
    let mut active: workflow::ActiveModel = wf.into();
    active.enabled = Set(enabled);
    active.updated_at = Set(unix_now());
    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "workflow": workflow_json(&updated) })))
}

/// GET /api/workflows/:id/runs
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let wf = workflow::Entity::find_by_id(workflow_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Workflow".into()))?;
    auth::require_membership(&state.db, &state.sessions, &headers, wf.org_id).await?;

    let runs = workflow_run::Entity::find()
        .filter(workflow_run::Column::WorkflowId.eq(wf.id))
        .order_by_desc(workflow_run::Column::StartedAt)
        .all(&state.db)
        .await?;

    Ok(Json(json!({ "runs": runs })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_validation() {
        assert!(validate_trigger("record_created", None).is_ok());
        assert!(validate_trigger("stage_changed", None).is_ok());
        assert!(validate_trigger("on_save", None).is_err());

        assert!(validate_trigger("field_changed", Some("premium")).is_ok());
        assert!(validate_trigger("field_changed", None).is_err());
        assert!(validate_trigger("field_changed", Some("  ")).is_err());
    }

    #[test]
    fn test_action_validation() {
        assert!(validate_actions(&serde_json::json!([
            {"type": "set_field", "field": "status", "value": "won"}
        ]))
        .is_ok());
        assert!(validate_actions(&serde_json::json!([])).is_err());
        assert!(validate_actions(&serde_json::json!([{"type": "explode"}])).is_err());
    }
}
