//! CRM module, field, record, view, and layout handlers.
//!
//! Record mutations funnel through the approval gate (see `approvals`) and
//! the blueprint gate (see `blueprints`) before they apply, and queue an
//! automation event after they do.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::auth;
use super::types::{
    CreateFieldRequest, CreateModuleRequest, CreateRecordRequest, CreateViewRequest,
    RecordResponse, StageChangeRequest, UpdateRecordRequest, UpsertLayoutRequest,
};
use super::{approvals, blueprints, AppState};
use crate::automation::{EventKind, RecordEvent};
use crate::db::entities::{crm_field, crm_layout, crm_module, crm_record, crm_view, profile};
use crate::db::unix_now;
use crate::error::{Result, ServerError};
use crate::rules::{self, RuleGroup};

const FIELD_TYPES: [&str; 7] = ["text", "number", "boolean", "date", "email", "phone", "picklist"];

// ============================================================================
// Shared helpers
// ============================================================================

/// Load a module and check the caller belongs to its organization.
pub(crate) async fn find_module(
    state: &AppState,
    headers: &HeaderMap,
    module_id: i32,
) -> Result<crm_module::Model> {
    let module = crm_module::Entity::find_by_id(module_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Module".into()))?;
    auth::require_membership(&state.db, &state.sessions, headers, module.org_id).await?;
    Ok(module)
}

/// Load a record and check the caller belongs to its organization.
pub(crate) async fn find_record(
    state: &AppState,
    headers: &HeaderMap,
    record_id: i32,
) -> Result<(crm_record::Model, profile::Model)> {
    let record = crm_record::Entity::find_by_id(record_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Record".into()))?;
    let (profile, _) =
        auth::require_membership(&state.db, &state.sessions, headers, record.org_id).await?;
    Ok((record, profile))
}

pub(crate) fn parse_record_data(record: &crm_record::Model) -> Result<Map<String, Value>> {
    serde_json::from_str(&record.data)
        .map_err(|e| ServerError::Internal(format!("record {} has corrupt data: {}", record.id, e)))
}

pub(crate) fn record_response(record: &crm_record::Model) -> Result<RecordResponse> {
    Ok(RecordResponse {
        id: record.id,
        module_id: record.module_id,
        data: Value::Object(parse_record_data(record)?),
        stage: record.stage.clone(),
        external_key: record.external_key.clone(),
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

fn value_fits_type(field: &crm_field::Model, value: &Value) -> bool {
    match field.field_type.as_str() {
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "picklist" => match (&field.options, value.as_str()) {
            (Some(options), Some(chosen)) => serde_json::from_str::<Vec<String>>(options)
                .map(|opts| opts.iter().any(|o| o == chosen))
                .unwrap_or(false),
            _ => false,
        },
        // text, date, email, phone are all stored as strings
        _ => value.is_string(),
    }
}

fn value_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Validate record data against the module's field definitions.
///
/// Unknown keys are rejected outright. Required fields must be present and
/// non-empty on create; on a patch they only need to stay non-empty if the
/// patch touches them.
pub(crate) fn validate_record_data(
    fields: &[crm_field::Model],
    data: &Map<String, Value>,
    is_create: bool,
) -> Result<()> {
    for key in data.keys() {
        if !fields.iter().any(|f| &f.api_name == key) {
            return Err(ServerError::InvalidRequest(format!("Unknown field: {}", key)));
        }
    }

    for field in fields {
        match data.get(&field.api_name) {
            Some(value) if value_is_empty(value) => {
                if field.required {
                    return Err(ServerError::InvalidRequest(format!(
                        "Field {} is required",
                        field.api_name
                    )));
                }
            }
            Some(value) => {
                if !value_fits_type(field, value) {
                    return Err(ServerError::InvalidRequest(format!(
                        "Field {} expects a {} value",
                        field.api_name, field.field_type
                    )));
                }
            }
            None => {
                if is_create && field.required {
                    return Err(ServerError::InvalidRequest(format!(
                        "Field {} is required",
                        field.api_name
                    )));
                }
            }
        }
    }

    Ok(())
}

pub(crate) async fn module_fields(
    state: &AppState,
    module_id: i32,
) -> Result<Vec<crm_field::Model>> {
    Ok(crm_field::Entity::find()
        .filter(crm_field::Column::ModuleId.eq(module_id))
        .order_by_asc(crm_field::Column::SortOrder)
        .all(&state.db)
        .await?)
}

// ============================================================================
// Modules and fields
// ============================================================================

/// GET /api/orgs/:org_id/crm/modules
pub async fn list_modules(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let modules = crm_module::Entity::find()
        .filter(crm_module::Column::OrgId.eq(org_id))
        .order_by_asc(crm_module::Column::Name)
        .all(&state.db)
        .await?;

    Ok(Json(json!({ "modules": modules })))
}

/// POST /api/orgs/:org_id/crm/modules
pub async fn create_module(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateModuleRequest>,
) -> Result<Json<Value>> {
    auth::require_admin(&state.db, &state.sessions, &headers, org_id).await?;

    let api_name = req.api_name.trim();
    if req.name.trim().is_empty() {
        return Err(ServerError::InvalidRequest("Module name cannot be empty".into()));
    }
    if api_name.is_empty() || !api_name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(ServerError::InvalidRequest(
            "api_name must be lowercase letters, digits, and underscores".into(),
        ));
    }

    let existing = crm_module::Entity::find()
        .filter(crm_module::Column::OrgId.eq(org_id))
        .filter(crm_module::Column::ApiName.eq(api_name))
        .one(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ServerError::Conflict(format!("Module '{}' already exists", api_name)));
    }

    let created = crm_module::ActiveModel {
        org_id: Set(org_id),
        name: Set(req.name.trim().to_string()),
        api_name: Set(api_name.to_string()),
        has_stages: Set(req.has_stages),
        created_at: Set(unix_now()),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "module": created })))
}

/// GET /api/crm/modules/:id/fields
pub async fn list_fields(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let module = find_module(&state, &headers, module_id).await?;
    let fields = module_fields(&state, module.id).await?;
    Ok(Json(json!({ "fields": fields })))
}

/// POST /api/crm/modules/:id/fields
pub async fn create_field(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateFieldRequest>,
) -> Result<Json<Value>> {
    let module = find_module(&state, &headers, module_id).await?;
    auth::require_admin(&state.db, &state.sessions, &headers, module.org_id).await?;

    if !FIELD_TYPES.contains(&req.field_type.as_str()) {
        return Err(ServerError::InvalidRequest(format!("Unknown field type: {}", req.field_type)));
    }
    let api_name = req.api_name.trim();
    if api_name.is_empty() || !api_name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(ServerError::InvalidRequest(
            "api_name must be lowercase letters, digits, and underscores".into(),
        ));
    }
    if req.field_type == "picklist" && req.options.as_ref().map_or(true, |o| o.is_empty()) {
        return Err(ServerError::InvalidRequest("Picklist fields need options".into()));
    }

    let existing = crm_field::Entity::find()
        .filter(crm_field::Column::ModuleId.eq(module.id))
        .filter(crm_field::Column::ApiName.eq(api_name))
        .one(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ServerError::Conflict(format!("Field '{}' already exists", api_name)));
    }

    let options = match req.options {
        Some(options) if req.field_type == "picklist" => {
            Some(serde_json::to_string(&options).map_err(|e| ServerError::Internal(e.to_string()))?)
        }
        _ => None,
    };

    let created = crm_field::ActiveModel {
        module_id: Set(module.id),
        api_name: Set(api_name.to_string()),
        label: Set(req.label),
        field_type: Set(req.field_type),
        required: Set(req.required),
        options: Set(options),
        sort_order: Set(req.sort_order.unwrap_or(0)),
        created_at: Set(unix_now()),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "field": created })))
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ListRecordsQuery {
    pub stage: Option<String>,
}

/// GET /api/crm/modules/:id/records
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    Query(query): Query<ListRecordsQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let module = find_module(&state, &headers, module_id).await?;

    let mut finder = crm_record::Entity::find()
        .filter(crm_record::Column::ModuleId.eq(module.id));
    if let Some(stage) = query.stage {
        finder = finder.filter(crm_record::Column::Stage.eq(stage));
    }
    let records = finder
        .order_by_desc(crm_record::Column::UpdatedAt)
        .all(&state.db)
        .await?;

    let records: Vec<RecordResponse> = records
        .iter()
        .map(record_response)
        .collect::<Result<_>>()?;

    Ok(Json(json!({ "records": records })))
}

/// POST /api/crm/modules/:id/records
pub async fn create_record(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateRecordRequest>,
) -> Result<Json<Value>> {
    let module = find_module(&state, &headers, module_id).await?;
    let (profile, _) =
        auth::require_membership(&state.db, &state.sessions, &headers, module.org_id).await?;

    if req.stage.is_some() && !module.has_stages {
        return Err(ServerError::InvalidRequest("Module has no stages".into()));
    }

    let fields = module_fields(&state, module.id).await?;
    validate_record_data(&fields, &req.data, true)?;

    let now = unix_now();
    let created = crm_record::ActiveModel {
        module_id: Set(module.id),
        org_id: Set(module.org_id),
        data: Set(Value::Object(req.data.clone()).to_string()),
        stage: Set(req.stage),
        external_key: Set(None),
        created_by: Set(profile.id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    state.automation.fire(RecordEvent {
        org_id: created.org_id,
        module_id: created.module_id,
        record_id: created.id,
        kind: EventKind::RecordCreated,
        data: req.data,
        changed_fields: Vec::new(),
        stage_from: None,
        stage_to: created.stage.clone(),
    });

    Ok(Json(json!({ "record": record_response(&created)? })))
}

/// GET /api/crm/records/:id
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(record_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let (record, _) = find_record(&state, &headers, record_id).await?;
    Ok(Json(json!({ "record": record_response(&record)? })))
}

/// POST /api/crm/records/:id - Apply a data patch (approval-gated)
pub async fn update_record(
    State(state): State<Arc<AppState>>,
    Path(record_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<UpdateRecordRequest>,
) -> Result<Json<Value>> {
    let (record, profile) = find_record(&state, &headers, record_id).await?;

    let fields = module_fields(&state, record.module_id).await?;
    validate_record_data(&fields, &req.data, false)?;

    if approvals::has_pending(&state.db, record.id).await? {
        return Err(ServerError::Conflict("A pending approval exists for this record".into()));
    }

    let current = parse_record_data(&record)?;

    if let Some(rule) = approvals::find_matching_rule(&state.db, record.module_id, "update", &current).await? {
        let request = approvals::open_request(
            &state.db,
            &rule,
            record.id,
            "update",
            Some(Value::Object(req.data).to_string()),
            profile.id,
        )
        .await?;
        return Ok(Json(json!({ "approval_required": true, "request": request })));
    }

    let mut merged = current.clone();
    let mut changed_fields = Vec::new();
    for (key, value) in req.data {
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

    Ok(Json(json!({ "record": record_response(&updated)? })))
}

/// DELETE /api/crm/records/:id (approval-gated)
pub async fn delete_record(
    State(state): State<Arc<AppState>>,
    Path(record_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let (record, profile) = find_record(&state, &headers, record_id).await?;

    if approvals::has_pending(&state.db, record.id).await? {
        return Err(ServerError::Conflict("A pending approval exists for this record".into()));
    }

    let current = parse_record_data(&record)?;

    if let Some(rule) = approvals::find_matching_rule(&state.db, record.module_id, "delete", &current).await? {
        let request =
            approvals::open_request(&state.db, &rule, record.id, "delete", None, profile.id).await?;
        return Ok(Json(json!({ "approval_required": true, "request": request })));
    }

    crm_record::Entity::delete_by_id(record.id).exec(&state.db).await?;

    Ok(Json(json!({ "deleted": record.id })))
}

/// POST /api/crm/records/:id/stage - Blueprint-gated stage transition
pub async fn change_stage(
    State(state): State<Arc<AppState>>,
    Path(record_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<StageChangeRequest>,
) -> Result<Json<Value>> {
    let (record, profile) = find_record(&state, &headers, record_id).await?;

    let module = crm_module::Entity::find_by_id(record.module_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Module".into()))?;
    if !module.has_stages {
        return Err(ServerError::InvalidRequest("Module has no stages".into()));
    }

    // No stage movement while any approval is pending on the record.
    if approvals::has_pending(&state.db, record.id).await? {
        return Err(ServerError::Conflict("A pending approval exists for this record".into()));
    }

    let data = parse_record_data(&record)?;
    blueprints::validate_transition(
        &state.db,
        module.id,
        record.stage.as_deref(),
        &req.stage,
        &data,
    )
    .await?;

    if let Some(rule) =
        approvals::find_matching_rule(&state.db, record.module_id, "stage_change", &data).await?
    {
        let request = approvals::open_request(
            &state.db,
            &rule,
            record.id,
            "stage_change",
            Some(json!({ "stage": req.stage }).to_string()),
            profile.id,
        )
        .await?;
        return Ok(Json(json!({ "approval_required": true, "request": request })));
    }

    let stage_from = record.stage.clone();
    let mut active: crm_record::ActiveModel = record.into();
    active.stage = Set(Some(req.stage.clone()));
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
        stage_to: Some(req.stage),
    });

    Ok(Json(json!({ "record": record_response(&updated)? })))
}

// ============================================================================
// Views
// ============================================================================

/// GET /api/crm/modules/:id/views
pub async fn list_views(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let module = find_module(&state, &headers, module_id).await?;

    let views = crm_view::Entity::find()
        .filter(crm_view::Column::ModuleId.eq(module.id))
        .order_by_asc(crm_view::Column::Name)
        .all(&state.db)
        .await?;

    let views: Vec<Value> = views
        .into_iter()
        .map(|v| {
            let conditions: Value = serde_json::from_str(&v.conditions).unwrap_or(Value::Null);
            json!({
                "id": v.id,
                "module_id": v.module_id,
                "name": v.name,
                "conditions": conditions,
                "created_at": v.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "views": views })))
}

/// POST /api/crm/modules/:id/views
pub async fn create_view(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<CreateViewRequest>,
) -> Result<Json<Value>> {
    let module = find_module(&state, &headers, module_id).await?;
    let (profile, _) =
        auth::require_membership(&state.db, &state.sessions, &headers, module.org_id).await?;

    if req.name.trim().is_empty() {
        return Err(ServerError::InvalidRequest("View name cannot be empty".into()));
    }
    let conditions: RuleGroup = serde_json::from_value(req.conditions)
        .map_err(|e| ServerError::InvalidRequest(format!("Bad conditions: {}", e)))?;

    let created = crm_view::ActiveModel {
        module_id: Set(module.id),
        name: Set(req.name.trim().to_string()),
        conditions: Set(serde_json::to_string(&conditions)
            .map_err(|e| ServerError::Internal(e.to_string()))?),
        created_by: Set(profile.id),
        created_at: Set(unix_now()),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "view": { "id": created.id, "name": created.name } })))
}

/// GET /api/crm/views/:id/records - Run a stored view
pub async fn run_view(
    State(state): State<Arc<AppState>>,
    Path(view_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let view = crm_view::Entity::find_by_id(view_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("View".into()))?;
    let module = find_module(&state, &headers, view.module_id).await?;

    let conditions = RuleGroup::parse(&view.conditions)
        .map_err(|e| ServerError::Internal(format!("view {} has corrupt conditions: {}", view.id, e)))?;

    let records = crm_record::Entity::find()
        .filter(crm_record::Column::ModuleId.eq(module.id))
        .order_by_desc(crm_record::Column::UpdatedAt)
        .all(&state.db)
        .await?;

    let mut matched = Vec::new();
    for record in &records {
        let data = parse_record_data(record)?;
        if rules::evaluate(&conditions, &data) {
            matched.push(record_response(record)?);
        }
    }

    Ok(Json(json!({ "view": view.name, "records": matched })))
}

// ============================================================================
// Layouts
// ============================================================================

/// GET /api/crm/modules/:id/layout
pub async fn get_layout(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let module = find_module(&state, &headers, module_id).await?;

    let layout = crm_layout::Entity::find()
        .filter(crm_layout::Column::ModuleId.eq(module.id))
        .one(&state.db)
        .await?;

    match layout {
        Some(layout) => {
            let sections: Value = serde_json::from_str(&layout.sections).unwrap_or(Value::Null);
            Ok(Json(json!({ "layout": { "sections": sections, "updated_at": layout.updated_at } })))
        }
        None => Ok(Json(json!({ "layout": Value::Null }))),
    }
}

/// PUT /api/crm/modules/:id/layout - Create or replace
pub async fn upsert_layout(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<UpsertLayoutRequest>,
) -> Result<Json<Value>> {
    let module = find_module(&state, &headers, module_id).await?;
    auth::require_admin(&state.db, &state.sessions, &headers, module.org_id).await?;

    if !req.sections.is_array() && !req.sections.is_object() {
        return Err(ServerError::InvalidRequest("Sections must be a JSON array or object".into()));
    }
    let sections = req.sections.to_string();
    let now = unix_now();

    let existing = crm_layout::Entity::find()
        .filter(crm_layout::Column::ModuleId.eq(module.id))
        .one(&state.db)
        .await?;

    match existing {
        Some(layout) => {
            let mut active: crm_layout::ActiveModel = layout.into();
            active.sections = Set(sections);
            active.updated_at = Set(now);
            active.update(&state.db).await?;
        }
        None => {
            crm_layout::ActiveModel {
                module_id: Set(module.id),
                sections: Set(sections),
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

    fn field(api_name: &str, field_type: &str, required: bool, options: Option<&str>) -> crm_field::Model {
        crm_field::Model {
            id: 0,
            module_id: 1,
            api_name: api_name.to_string(),
            label: api_name.to_string(),
            field_type: field_type.to_string(),
            required,
            options: options.map(|s| s.to_string()),
            sort_order: 0,
            created_at: 0,
        }
    }

    fn data(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_unknown_field_rejected() {
        let fields = vec![field("name", "text", true, None)];
        let err = validate_record_data(&fields, &data(json!({"name": "a", "bogus": 1})), true);
        assert!(err.is_err());
    }

    #[test]
    fn test_required_fields_on_create() {
        let fields = vec![field("name", "text", true, None), field("notes", "text", false, None)];

        assert!(validate_record_data(&fields, &data(json!({"name": "Pat"})), true).is_ok());
        assert!(validate_record_data(&fields, &data(json!({"notes": "hi"})), true).is_err());
        assert!(validate_record_data(&fields, &data(json!({"name": "  "})), true).is_err());
    }

    #[test]
    fn test_patch_only_checks_touched_fields() {
        let fields = vec![field("name", "text", true, None), field("notes", "text", false, None)];

        // Patch omitting the required field is fine...
        assert!(validate_record_data(&fields, &data(json!({"notes": "hi"})), false).is_ok());
        // ...but blanking it is not.
        assert!(validate_record_data(&fields, &data(json!({"name": ""})), false).is_err());
    }

    #[test]
    fn test_type_checks() {
        let fields = vec![
            field("premium", "number", false, None),
            field("active", "boolean", false, None),
            field("tier", "picklist", false, Some(r#"["gold","silver"]"#)),
        ];

        assert!(validate_record_data(&fields, &data(json!({"premium": 120})), false).is_ok());
        assert!(validate_record_data(&fields, &data(json!({"premium": "120"})), false).is_err());
        assert!(validate_record_data(&fields, &data(json!({"active": true})), false).is_ok());
        assert!(validate_record_data(&fields, &data(json!({"tier": "gold"})), false).is_ok());
        assert!(validate_record_data(&fields, &data(json!({"tier": "bronze"})), false).is_err());
    }
}
