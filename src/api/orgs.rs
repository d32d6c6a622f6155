//! Organization and membership handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::auth::{self, sha256_hex};
use super::types::{AddMemberRequest, ChangeRoleRequest, CreateOrgRequest};
use super::AppState;
use crate::db::entities::{membership, organization, profile};
use crate::db::unix_now;
use crate::error::{Result, ServerError};

const ROLES: [&str; 3] = ["owner", "admin", "member"];

/// Generate an inbound webhook secret. Only the SHA-256 lands in the
/// database; the raw value is returned to the caller once.
fn generate_webhook_secret() -> String {
    let mut hasher = Sha256::new();

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    hasher.update(timestamp.to_le_bytes());

    let thread_id = std::thread::current().id();
    hasher.update(format!("{:?}", thread_id).as_bytes());

    let stack_addr = &timestamp as *const _ as usize;
    hasher.update(stack_addr.to_le_bytes());

    let digest = hasher.finalize();
    // 24 bytes = 32 base64 chars
    format!("whsec_{}", BASE64.encode(&digest[..24]))
}

fn secret_prefix(secret: &str) -> String {
    secret.chars().take(12).collect()
}

/// POST /api/orgs - Create an organization; the creator becomes its owner
pub async fn create_org(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateOrgRequest>,
) -> Result<Json<Value>> {
    let creator = auth::require_profile(&state.db, &state.sessions, &headers).await?;

    let name = req.name.trim();
    let slug = req.slug.trim();
    if name.is_empty() {
        return Err(ServerError::InvalidRequest("Organization name cannot be empty".into()));
    }
    if slug.len() < 2 || !slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(ServerError::InvalidRequest(
            "Slug must be at least 2 characters of lowercase letters, digits, and dashes".into(),
        ));
    }

    let existing = organization::Entity::find()
        .filter(organization::Column::Slug.eq(slug))
        .one(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ServerError::Conflict(format!("Slug '{}' is already taken", slug)));
    }

    let now = unix_now();
    let secret = generate_webhook_secret();

    let org = organization::ActiveModel {
        name: Set(name.to_string()),
        slug: Set(slug.to_string()),
        webhook_secret_hash: Set(sha256_hex(&secret)),
        webhook_secret_prefix: Set(secret_prefix(&secret)),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    membership::ActiveModel {
        org_id: Set(org.id),
        profile_id: Set(creator.id),
        role: Set("owner".to_string()),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({
        "organization": org,
        // Shown once; only the hash is stored.
        "webhook_secret": secret,
    })))
}

/// GET /api/orgs/:org_id
pub async fn get_org(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let org = organization::Entity::find_by_id(org_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Organization".into()))?;

    Ok(Json(json!({ "organization": org })))
}

/// POST /api/orgs/:org_id/webhook-secret - Rotate the inbound secret
pub async fn rotate_webhook_secret(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_admin(&state.db, &state.sessions, &headers, org_id).await?;

    let org = organization::Entity::find_by_id(org_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Organization".into()))?;

    let secret = generate_webhook_secret();
    let mut active: organization::ActiveModel = org.into();
    active.webhook_secret_hash = Set(sha256_hex(&secret));
    active.webhook_secret_prefix = Set(secret_prefix(&secret));
    active.update(&state.db).await?;

    Ok(Json(json!({ "webhook_secret": secret })))
}

/// GET /api/orgs/:org_id/members
pub async fn list_members(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_membership(&state.db, &state.sessions, &headers, org_id).await?;

    let rows = membership::Entity::find()
        .filter(membership::Column::OrgId.eq(org_id))
        .find_also_related(profile::Entity)
        .all(&state.db)
        .await?;

    let members: Vec<Value> = rows
        .into_iter()
        .map(|(m, p)| {
            json!({
                "profile_id": m.profile_id,
                "role": m.role,
                "email": p.as_ref().map(|p| p.email.clone()),
                "display_name": p.as_ref().and_then(|p| p.display_name.clone()),
                "joined_at": m.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "members": members })))
}

/// POST /api/orgs/:org_id/members - Add a profile by email
pub async fn add_member(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<Value>> {
    auth::require_admin(&state.db, &state.sessions, &headers, org_id).await?;

    let role = req.role.as_deref().unwrap_or("member");
    if !ROLES.contains(&role) {
        return Err(ServerError::InvalidRequest(format!("Unknown role: {}", role)));
    }

    let target = profile::Entity::find()
        .filter(profile::Column::Email.eq(req.email.trim()))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Profile".into()))?;

    let existing = membership::Entity::find()
        .filter(membership::Column::OrgId.eq(org_id))
        .filter(membership::Column::ProfileId.eq(target.id))
        .one(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ServerError::Conflict("Already a member".into()));
    }

    let added = membership::ActiveModel {
        org_id: Set(org_id),
        profile_id: Set(target.id),
        role: Set(role.to_string()),
        created_at: Set(unix_now()),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(Json(json!({ "membership": added })))
}

/// POST /api/orgs/:org_id/members/:profile_id/role
pub async fn change_role(
    State(state): State<Arc<AppState>>,
    Path((org_id, profile_id)): Path<(i32, i32)>,
    headers: HeaderMap,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<Json<Value>> {
    auth::require_admin(&state.db, &state.sessions, &headers, org_id).await?;

    if !ROLES.contains(&req.role.as_str()) {
        return Err(ServerError::InvalidRequest(format!("Unknown role: {}", req.role)));
    }

    let target = membership::Entity::find()
        .filter(membership::Column::OrgId.eq(org_id))
        .filter(membership::Column::ProfileId.eq(profile_id))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Membership".into()))?;

    if target.role == "owner" && req.role != "owner" {
        auth::assert_not_last_owner(&state.db, &target).await?;
    }

    let mut active: membership::ActiveModel = target.into();
    active.role = Set(req.role.clone());
    let updated = active.update(&state.db).await?;

    Ok(Json(json!({ "membership": updated })))
}

/// DELETE /api/orgs/:org_id/members/:profile_id
pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    Path((org_id, profile_id)): Path<(i32, i32)>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_admin(&state.db, &state.sessions, &headers, org_id).await?;

    let target = membership::Entity::find()
        .filter(membership::Column::OrgId.eq(org_id))
        .filter(membership::Column::ProfileId.eq(profile_id))
        .one(&state.db)
        .await?
        .ok_or_else(|| ServerError::NotFound("Membership".into()))?;

    auth::assert_not_last_owner(&state.db, &target).await?;

    membership::Entity::delete_by_id(target.id).exec(&state.db).await?;

    Ok(Json(json!({ "removed": profile_id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_secret_shape() {
        let secret = generate_webhook_secret();
        assert!(secret.starts_with("whsec_"));
        assert_eq!(secret.len(), "whsec_".len() + 32);
        assert_eq!(secret_prefix(&secret).len(), 12);
        assert!(secret.starts_with(&secret_prefix(&secret)));
    }

    #[test]
    fn test_role_list() {
        assert!(ROLES.contains(&"owner"));
        assert!(!ROLES.contains(&"superuser"));
    }
}
