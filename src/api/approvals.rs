//! Approval rules and approval request handlers.
//!
//! When an enabled rule matches a gated mutation, the mutation is parked in
//! an `approval_request` instead of applying. An owner or admin (other than
//! the requester) later applies or discards it. The stored mutation is
//! applied at decision time, re-validating blueprint transitions then.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::{json, Map, Value};

use super::auth;
use super::types::CreateApprovalRuleRequest;
use super::{blueprints, crm, AppState};
use crate::automation::{EventKind, RecordEvent};
use crate::db::entities::{approval_request, approval_rule, crm_module, crm_record};
use crate::db::unix_now;
use crate::error::{Result, ServerError};
use crate::rules::{self, RuleGroup};

const GATED_ACTIONS: [&str; 3] = ["update", "delete", "stage_change"];

// ============================================================================
// Gating helpers used by the record handlers
// ============================================================================

pub(crate) async fn has_pending(db: &DatabaseConnection, record_id: i32) -> Result<bool> {
    let pending = approval_request::Entity::find()
        .filter(approval_request::Column::RecordId.eq(record_id))
        .filter(approval_request::Column::Status.eq("pending"))
        .one(db)
        .await?;
    Ok(pending.is_some())
}

/// First enabled rule for the module that gates `action` and matches the
/// record's current data.
pub(crate) async fn find_matching_rule(
    db: &DatabaseConnection,
    module_id: i32,
    action: &str,
    data: &Map<String, Value>,
) -> Result<Option<approval_rule::Model>> {
    let rules_for_module = approval_rule::Entity::find()
        .filter(approval_rule::Column::ModuleId.eq(module_id))
        .filter(approval_rule::Column::Enabled.eq(true))
        .order_by_asc(approval_rule::Column::Id)
        .all(db)
        .await?;

    for rule in rules_for_module {
        let gated: Vec<String> = serde_json::from_str(&rule.gated_actions)
            .map_err(|e| ServerError::Internal(format!("rule {} has corrupt actions: {}", rule.id, e)))?;
        if !gated.iter().any(|a| a == action) {
            continue;
        }
        let conditions = RuleGroup::parse(&rule.conditions)
            .map_err(|e| ServerError::Internal(format!("rule {} has corrupt conditions: {}", rule.id, e)))?;
        if rules::evaluate(&conditions, data) {
            return Ok(Some(rule));
        }
    }
    Ok(None)
}

pub(crate) async fn open_request(
    db: &DatabaseConnection,
    rule: &approval_rule::Model,
    record_id: i32,
    action: &str,
    proposed: Option<String>,
    requested_by: i32,
) -> Result<Value> {
    let created = approval_request::ActiveModel {
        org_id: Set(rule.org_id),
        rule_id: Set(rule.id),
        record_id: Set(record_id),
        action: Set(action.to_string()),
        proposed: Set(proposed),
        requested_by: Set(requested_by),
        status: Set("pending".to_string()),
        decided_by: Set(None),
        decided_at: Set(None),
        created_at: Set(unix_now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(request_json(&created))
}

fn request_json(request: &approval_request::Model) -> Value {
    let proposed: Value = request
        .proposed
        .as_deref()
        .and_then(|p| serde_json::from_str(p).ok())
        .unwrap_or(Value::Null);
    json!({
        "id": request.id,
        "rule_id": request.rule_id,
        "record_id": request.record_id,
        "action": request.action,
        "proposed": proposed,
        "requested_by": request.requested_by,
        "status": request.status,
        "decided_by": request.decided_by,
        "decided_at": request.decided_at,
        "created_at": request.created_at,
    })
}

// ============================================================================
// Rule management
// ============================================================================

/// GET /api/crm/modules/:id/approval-rules
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let module = crm::find_module(&state, &headers, module_id).await?;

    let rules_for_module = approval_rule::Entity::find()
        .filter(approval_rule::Column::ModuleId.eq(module.id))
        .order_by_asc(approval_rule::Column::Id)
        .all(&state.db)
        .await?;

    let rules_json: Vec<Value> = rules_for_module
        .into_iter()
        .map(|r| {
            json!({
                "id": r.id,
                "name": r.name,
                "gated_actions": serde_json::from_str::<Value>(&r.gated_actions).unwrap_or(Value::Null),
                "conditions": serde_json::from_str::<Value>(&r.conditions).unwrap_or(Value::Null),
                "enabled": r.enabled,
                "created_at": r.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "rules": rules_json })))
}

/// POST /api/crm/modules/:id/approval-rules
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateApprovalRuleRequest>,
) -> Result<Json<Value>> {
    let module = crm::find_module(&state, &headers, module_id).await?;
    auth::require_admin(&state.db, &state.sessions, &headers, module.org_id).await?;

    if req.name.trim().is_empty() {
        return Err(ServerError::InvalidRequest("Rule name cannot be empty".into()));
    }
    if req.gated_actions.is_empty() {
        return Err(ServerError::InvalidRequest("Rule must gate at least one action".into()));
    }
    for action in &req.gated_actions {
        if !GATED_ACTIONS.contains(&action.as_str()) {
            return Err(ServerError::InvalidRequest(format!("Unknown gated action: {}", action)));
        }
    }
    let conditions: RuleGroup = serde_json::from_value(req.conditions)
        .map_err(|e| ServerError::InvalidRequest(format!("Bad conditions: {}", e)))?;

    let created = approval_rule::ActiveModel {
        module_id: Set(module.id),
        org_id: Set(module.org_id),
        name: Set(req.name.trim().to_string()),
        gated_actions: Set(serde_json::to_string(&req.gated_actions)
            .map_err(|e| ServerError::Internal(e.to_string()))?),
        conditions: Set(serde_json::to_string(&conditions)
            .map_err(|e| ServerError::Internal(e.to_string()))?),
        enabled: Set(req.enabled.unwrap_or(true)),
        created_at: Set(unix_now()),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "rule": { "id": created.id, "name": created.name } })))
}

/// DELETE /api/approval-rules/:id
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let rule = approval_rule::Entity::find_by_id(rule_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Approval rule".into()))?;
    auth::require_admin(&state.db, &state.sessions, &headers, rule.org_id).await?;

    approval_rule::Entity::delete_by_id(rule.id).exec(&state.db).await?;

    Ok(Json(json!({ "deleted": rule_id })))
}

// ============================================================================
// Request decisions
// ============================================================================

/// GET /api/orgs/:org_id/approvals - Pending requests
pub async fn list_pending(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let pending = approval_request::Entity::find()
        .filter(approval_request::Column::OrgId.eq(org_id))
        .filter(approval_request::Column::Status.eq("pending"))
        .order_by_asc(approval_request::Column::CreatedAt)
        .all(&state.db)
        .await?;

    let requests: Vec<Value> = pending.iter().map(request_json).collect();

    Ok(Json(json!({ "requests": requests })))
}

async fn find_pending_request(
    state: &AppState,
    headers: &HeaderMap,
    request_id: i32,
) -> Result<(approval_request::Model, i32)> {
    let request = approval_request::Entity::find_by_id(request_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Approval request".into()))?;
    let (profile, _) =
        auth::require_admin(&state.db, &state.sessions, headers, request.org_id).await?;

    if request.status != "pending" {
        return Err(ServerError::Conflict(format!("Request is already {}", request.status)));
    }
    Ok((request, profile.id))
}

/// POST /api/approvals/:id/approve - Apply the held mutation
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let (request, decider_id) = find_pending_request(&state, &headers, request_id).await?;

    if request.requested_by == decider_id {
        return Err(ServerError::PermissionDenied);
    }

    apply_mutation(&state, &request).await?;

    let mut active: approval_request::ActiveModel = request.into();
    active.status = Set("approved".to_string());
    active.decided_by = Set(Some(decider_id));
    active.decided_at = Set(Some(unix_now()));
    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "request": request_json(&updated) })))
}

/// POST /api/approvals/:id/reject - Discard the held mutation
pub async fn reject(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let (request, decider_id) = find_pending_request(&state, &headers, request_id).await?;

    let mut active: approval_request::ActiveModel = request.into();
    active.status = Set("rejected".to_string());
    active.decided_by = Set(Some(decider_id));
    active.decided_at = Set(Some(unix_now()));
    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "request": request_json(&updated) })))
}

async fn apply_mutation(state: &AppState, request: &approval_request::Model) -> Result<()> {
    let record = crm_record::Entity::find_by_id(request.record_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::Conflict("Record no longer exists".into()))?;

    match request.action.as_str() {
        "update" => {
            let patch: Map<String, Value> = request
                .proposed
                .as_deref()
                .and_then(|p| serde_json::from_str(p).ok())
                .ok_or_else(|| ServerError::Internal(format!("request {} has corrupt patch", request.id)))?;

            let current = crm::parse_record_data(&record)?;
            let mut merged = current.clone();
            let mut changed_fields = Vec::new();
            for (key, value) in patch {
                if current.get(&key) != Some(&value) {
                    changed_fields.push(key.clone());
                }
                merged.insert(key, value);
            }

            let mut active: crm_record::ActiveModel = record.clone().into();
            active.data = Set(Value::Object(merged.clone()).to_string());
            active.updated_at = Set(unix_now());
            let updated = active.update(&state.db).await?;

            state.automation.fire(RecordEvent {
                org_id: updated.org_id,
                module_id: updated.module_id,
                record_id: updated.id,
                kind: EventKind::RecordUpdated,
                data: merged,
                changed_fields,
                stage_from: None,
                stage_to: None,
            });
        }
        "delete" => {
            crm_record::Entity::delete_by_id(record.id).exec(&state.db).await?;
        }
        "stage_change" => {
            let target: Value = request
                .proposed
                .as_deref()
                .and_then(|p| serde_json::from_str(p).ok())
                .ok_or_else(|| ServerError::Internal(format!("request {} has corrupt stage", request.id)))?;
            let stage = target
                .get("stage")
                .and_then(|s| s.as_str())
                .ok_or_else(|| ServerError::Internal(format!("request {} has corrupt stage", request.id)))?
                .to_string();

            let module = crm_module::Entity::find_by_id(record.module_id)
                .one(&state.db)
                .await?
                .ok_or_else(|| ServerError::NotFound("Module".into()))?;

            // The record may have moved since the request was opened.
            let data = crm::parse_record_data(&record)?;
            blueprints::validate_transition(&state.db, module.id, record.stage.as_deref(), &stage, &data)
                .await?;

            let stage_from = record.stage.clone();
            let mut active: crm_record::ActiveModel = record.clone().into();
            active.stage = Set(Some(stage.clone()));
            active.updated_at = Set(unix_now());
            let updated = active.update(&state.db).await?;

            state.automation.fire(RecordEvent {
                org_id: updated.org_id,
                module_id: updated.module_id,
                record_id: updated.id,
                kind: EventKind::StageChanged,
                data,
                changed_fields: Vec::new(),
                stage_from,
                stage_to: Some(stage),
            });
        }
        other => {
            return Err(ServerError::Internal(format!("request {} has unknown action {}", request.id, other)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::db::entities::organization;

    async fn seed(db: &DatabaseConnection) -> (i32, i32, i32) {
        let org = organization::ActiveModel {
            name: Set("Acme Benefits".to_string()),
            slug: Set("acme".to_string()),
            webhook_secret_hash: Set("hash".to_string()),
            webhook_secret_prefix: Set("whsec_test".to_string()),
            created_at: Set(0),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap();

        let module = crm_module::ActiveModel {
            org_id: Set(org.id),
            name: Set("Policies".to_string()),
            api_name: Set("policies".to_string()),
            has_stages: Set(true),
            created_at: Set(0),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap();

        let record = crm_record::ActiveModel {
            module_id: Set(module.id),
            org_id: Set(org.id),
            data: Set(json!({"premium": 500}).to_string()),
            stage: Set(Some("quoted".to_string())),
            external_key: Set(None),
            created_by: Set(1),
            created_at: Set(0),
            updated_at: Set(0),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap();

        (org.id, module.id, record.id)
    }

    async fn seed_rule(db: &DatabaseConnection, org_id: i32, module_id: i32) -> approval_rule::Model {
        approval_rule::ActiveModel {
            module_id: Set(module_id),
            org_id: Set(org_id),
            name: Set("Large premium".to_string()),
            gated_actions: Set(r#"["update","delete"]"#.to_string()),
            conditions: Set(
                r#"{"join":"and","conditions":[{"field":"premium","op":"greater_than","value":100}]}"#
                    .to_string(),
            ),
            enabled: Set(true),
            created_at: Set(0),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_find_matching_rule_respects_action_and_conditions() {
        let dir = TempDir::new().unwrap();
        let db = crate::db::init_database(&dir.path().join("approvals.db")).await.unwrap();
        let (org_id, module_id, _) = seed(&db).await;
        let rule = seed_rule(&db, org_id, module_id).await;

        let big = json!({"premium": 500}).as_object().unwrap().clone();
        let small = json!({"premium": 50}).as_object().unwrap().clone();

        let hit = find_matching_rule(&db, module_id, "update", &big).await.unwrap();
        assert_eq!(hit.map(|r| r.id), Some(rule.id));

        // The rule does not gate stage changes.
        assert!(find_matching_rule(&db, module_id, "stage_change", &big).await.unwrap().is_none());
        // Conditions miss.
        assert!(find_matching_rule(&db, module_id, "update", &small).await.unwrap().is_none());

        // Disabled rules never match.
        let mut active: approval_rule::ActiveModel = rule.into();
        active.enabled = Set(false);
        active.update(&db).await.unwrap();
        assert!(find_matching_rule(&db, module_id, "update", &big).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_has_pending_tracks_open_requests() {
        let dir = TempDir::new().unwrap();
        let db = crate::db::init_database(&dir.path().join("approvals.db")).await.unwrap();
        let (org_id, module_id, record_id) = seed(&db).await;
        let rule = seed_rule(&db, org_id, module_id).await;

        assert!(!has_pending(&db, record_id).await.unwrap());

        let request = open_request(
            &db,
            &rule,
            record_id,
            "update",
            Some(r#"{"premium":1000}"#.to_string()),
            7,
        )
        .await
        .unwrap();
        assert!(has_pending(&db, record_id).await.unwrap());

        // A decided request no longer blocks the record.
        let id = request["id"].as_i64().unwrap() as i32;
        let row = approval_request::Entity::find_by_id(id).one(&db).await.unwrap().unwrap();
        let mut active: approval_request::ActiveModel = row.into();
        active.status = Set("rejected".to_string());
        active.update(&db).await.unwrap();
        assert!(!has_pending(&db, record_id).await.unwrap());
    }
}
