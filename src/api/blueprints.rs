//! Blueprint handlers and stage-transition validation.
//!
//! A blueprint fixes which stage transitions a module allows and which
//! fields must be filled before each one. A module without a blueprint
//! allows free transitions.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde_json::{json, Map, Value};

use super::auth;
use super::types::{BlueprintTransition, UpsertBlueprintRequest};
use super::{crm, AppState};
use crate::db::entities::blueprint;
use crate::db::unix_now;
use crate::error::{Result, ServerError};

/// Find the transition covering (current → target), if any. A `from` of
/// `"*"` matches any current stage, including none; an empty `from`
/// matches only records that have no stage yet.
fn match_transition<'a>(
    transitions: &'a [BlueprintTransition],
    current: Option<&str>,
    target: &str,
) -> Option<&'a BlueprintTransition> {
    transitions.iter().find(|t| {
        if t.to != target {
            return false;
        }
        match (t.from.as_str(), current) {
            ("*", _) => true,
            (from, Some(stage)) => from == stage,
            (from, None) => from.is_empty(),
        }
    })
}

fn missing_required(transition: &BlueprintTransition, data: &Map<String, Value>) -> Vec<String> {
    transition
        .required_fields
        .iter()
        .filter(|field| {
            match data.get(*field) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            }
        })
        .cloned()
        .collect()
}

/// Enforce the module's blueprint for a stage change.
pub(crate) async fn validate_transition(
    db: &DatabaseConnection,
    module_id: i32,
    current: Option<&str>,
    target: &str,
    data: &Map<String, Value>,
) -> Result<()> {
    let stored = blueprint::Entity::find()
        .filter(blueprint::Column::ModuleId.eq(module_id))
        .one(db)
        .await?;
    let stored = match stored {
        Some(b) => b,
        None => return Ok(()),
    };

    let transitions: Vec<BlueprintTransition> = serde_json::from_str(&stored.transitions)
        .map_err(|e| ServerError::Internal(format!("blueprint {} is corrupt: {}", stored.id, e)))?;

    let transition = match_transition(&transitions, current, target).ok_or_else(|| {
        ServerError::InvalidRequest(format!(
            "Transition from '{}' to '{}' is not allowed",
            current.unwrap_or(""),
            target
        ))
    })?;

    let missing = missing_required(transition, data);
    if !missing.is_empty() {
        return Err(ServerError::InvalidRequest(format!(
            "Missing required fields for this transition: {}",
            missing.join(", ")
        )));
    }

    Ok(())
}

/// GET /api/crm/modules/:id/blueprint
pub async fn get_blueprint(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let module = crm::find_module(&state, &headers, module_id).await?;

    let stored = blueprint::Entity::find()
        .filter(blueprint::Column::ModuleId.eq(module.id))
        .one(&state.db)
        .await?;

    match stored {
        Some(b) => {
            let transitions: Value = serde_json::from_str(&b.transitions).unwrap_or(Value::Null);
            Ok(Json(json!({
                "blueprint": { "transitions": transitions, "updated_at": b.updated_at }
            })))
        }
        None => Ok(Json(json!({ "blueprint": Value::Null }))),
    }
}

/// PUT /api/crm/modules/:id/blueprint - Create or replace
pub async fn upsert_blueprint(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<UpsertBlueprintRequest>,
) -> Result<Json<Value>> {
    let module = crm::find_module(&state, &headers, module_id).await?;
    auth::require_admin(&state.db, &state.sessions, &headers, module.org_id).await?;

    if !module.has_stages {
        return Err(ServerError::InvalidRequest("Module has no stages".into()));
    }
    for t in &req.transitions {
        if t.to.trim().is_empty() {
            return Err(ServerError::InvalidRequest("Transition target cannot be empty".into()));
        }
    }

    let transitions = serde_json::to_string(&req.transitions)
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    let now = unix_now();

    let existing = blueprint::Entity::find()
        .filter(blueprint::Column::ModuleId.eq(module.id))
        .one(&state.db)
        .await?;

    match existing {
        Some(b) => {
            let mut active: blueprint::ActiveModel = b.into();
            active.transitions = Set(transitions);
            active.updated_at = Set(now);
            active.update(&state.db).await?;
        }
        None => {
            blueprint::ActiveModel {
                module_id: Set(module.id),
                org_id: Set(module.org_id),
                transitions: Set(transitions),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(&state.db)
            .await?;
        }
    }

    Ok(Json(json!({ "updated": module.id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(from: &str, to: &str, required: &[&str]) -> BlueprintTransition {
        BlueprintTransition {
            from: from.to_string(),
            to: to.to_string(),
            required_fields: required.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn data(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_exact_transition_match() {
        let transitions = vec![
            transition("quoted", "underwriting", &[]),
            transition("underwriting", "issued", &[]),
        ];

        assert!(match_transition(&transitions, Some("quoted"), "underwriting").is_some());
        assert!(match_transition(&transitions, Some("quoted"), "issued").is_none());
        assert!(match_transition(&transitions, Some("issued"), "underwriting").is_none());
    }

    #[test]
    fn test_wildcard_from() {
        let transitions = vec![transition("*", "declined", &[])];

        assert!(match_transition(&transitions, Some("quoted"), "declined").is_some());
        assert!(match_transition(&transitions, Some("issued"), "declined").is_some());
        assert!(match_transition(&transitions, None, "declined").is_some());
    }

    #[test]
    fn test_empty_from_matches_unstaged_records_only() {
        let transitions = vec![transition("", "quoted", &[])];

        assert!(match_transition(&transitions, None, "quoted").is_some());
        assert!(match_transition(&transitions, Some("issued"), "quoted").is_none());
    }

    #[test]
    fn test_missing_required_fields() {
        let t = transition("quoted", "issued", &["policy_number", "premium"]);

        let complete = data(json!({"policy_number": "P-100", "premium": 120}));
        assert!(missing_required(&t, &complete).is_empty());

        let partial = data(json!({"policy_number": "  "}));
        assert_eq!(missing_required(&t, &partial), vec!["policy_number", "premium"]);
    }
}
