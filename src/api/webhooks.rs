//! Inbound webhook handler.
//!
//! Callers authenticate with the `X-Webhook-Secret` header; the secret
//! identifies the organization (only its SHA-256 is stored). The payload
//! creates or updates a record in the named module and fires automation
//! like any interactive mutation.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};

use super::auth::sha256_hex;
use super::types::InboundWebhookRequest;
use super::{crm, AppState};
use crate::automation::{EventKind, RecordEvent};
use crate::db::entities::{crm_module, crm_record, organization};
use crate::db::unix_now;
use crate::error::{Result, ServerError};

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// POST /api/crm/webhooks/inbound
pub async fn inbound(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let secret = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ServerError::AuthRequired)?;

    let req: InboundWebhookRequest = serde_json::from_slice(&body)
        .map_err(|e| ServerError::InvalidRequest(format!("Invalid JSON: {}", e)))?;

    let org = organization::Entity::find()
        .filter(organization::Column::WebhookSecretHash.eq(sha256_hex(secret)))
        .one(&state.db)
        .await?
        .ok_or(ServerError::PermissionDenied)?;

    let module = crm_module::Entity::find()
        .filter(crm_module::Column::OrgId.eq(org.id))
        .filter(crm_module::Column::ApiName.eq(req.module_api_name.as_str()))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Module".into()))?;

    if req.stage.is_some() && !module.has_stages {
        return Err(ServerError::InvalidRequest("Module has no stages".into()));
    }

    let fields = crm::module_fields(&state, module.id).await?;

    // Upsert by external key when the sender provides one.
    let existing = match req.external_key.as_deref() {
        Some(key) => {
            crm_record::Entity::find()
                .filter(crm_record::Column::ModuleId.eq(module.id))
                .filter(crm_record::Column::ExternalKey.eq(key))
                .one(&state.db)
                .await?
        }
        None => None,
    };

    let now = unix_now();
    match existing {
        Some(record) => {
            crm::validate_record_data(&fields, &req.data, false)?;

            let current = crm::parse_record_data(&record)?;
            let mut merged = current.clone();
            let mut changed_fields = Vec::new();
            for (key, value) in req.data {
                if current.get(&key) != Some(&value) {
                    changed_fields.push(key.clone());
                }
                merged.insert(key, value);
            }

            let mut active: crm_record::ActiveModel = record.into();
            active.data = Set(Value::Object(merged.clone()).to_string());
            active.updated_at = Set(now);
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

            Ok(Json(json!({ "record": crm::record_response(&updated)?, "created": false })))
        }
        None => {
            crm::validate_record_data(&fields, &req.data, true)?;

            let created = crm_record::ActiveModel {
                module_id: Set(module.id),
                org_id: Set(org.id),
                data: Set(Value::Object(req.data.clone()).to_string()),
                stage: Set(req.stage),
                external_key: Set(req.external_key),
                // Webhook writes have no interactive author.
                created_by: Set(0),
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

            Ok(Json(json!({ "record": crm::record_response(&created)?, "created": true })))
        }
    }
}
