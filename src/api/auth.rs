//! Session resolution and tenant authorization.
//!
//! Sessions are issued by the managed auth provider and land in the
//! `sessions` table; this server only resolves the token the frontend
//! presents (cookie or Bearer header) back to a profile, then checks the
//! profile's membership in the organization a route touches. Resolved
//! tokens are cached in memory until they expire.

use std::collections::HashMap;

use axum::http::{header, HeaderMap};
use parking_lot::RwLock;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use sha2::{Digest, Sha256};

use crate::db::entities::{membership, profile, session};
use crate::db::unix_now;
use crate::error::{Result, ServerError};

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Clone, Debug)]
struct CachedSession {
    profile_id: i32,
    /// 0 means no expiry.
    expires_at: i64,
}

impl CachedSession {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at != 0 && now > self.expires_at
    }
}

/// In-memory cache keyed by token hash.
pub struct SessionCache {
    entries: RwLock<HashMap<String, CachedSession>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    fn get(&self, token_hash: &str, now: i64) -> Option<i32> {
        let entries = self.entries.read();
        match entries.get(token_hash) {
            Some(cached) if !cached.is_expired(now) => Some(cached.profile_id),
            _ => None,
        }
    }

    fn insert(&self, token_hash: String, profile_id: i32, expires_at: i64) {
        let mut entries = self.entries.write();
        entries.retain(|_, c| !c.is_expired(unix_now()));
        entries.insert(token_hash, CachedSession { profile_id, expires_at });
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the session token from `Authorization: Bearer` or the `token` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        if let Some(token) = part.trim().strip_prefix("token=") {
            return Some(token.to_string());
        }
    }
    None
}

/// Resolve the request's session to a profile.
pub async fn require_profile(
    db: &DatabaseConnection,
    cache: &SessionCache,
    headers: &HeaderMap,
) -> Result<profile::Model> {
    let token = extract_token(headers).ok_or(ServerError::AuthRequired)?;
    let token_hash = sha256_hex(&token);
    let now = unix_now();

    let profile_id = match cache.get(&token_hash, now) {
        Some(id) => id,
        None => {
            let row = session::Entity::find()
                .filter(session::Column::TokenHash.eq(&token_hash))
                .one(db)
                .await?
                .ok_or(ServerError::AuthRequired)?;
            if row.expires_at != 0 && now > row.expires_at {
                return Err(ServerError::AuthRequired);
            }
            cache.insert(token_hash, row.profile_id, row.expires_at);
            row.profile_id
        }
    };

    profile::Entity::find_by_id(profile_id)
        .one(db)
        .await?
        .ok_or(ServerError::AuthRequired)
}

/// Resolve the session and require membership in the given organization.
pub async fn require_membership(
    db: &DatabaseConnection,
    cache: &SessionCache,
    headers: &HeaderMap,
    org_id: i32,
) -> Result<(profile::Model, membership::Model)> {
    let profile = require_profile(db, cache, headers).await?;
    let membership = membership::Entity::find()
        .filter(membership::Column::OrgId.eq(org_id))
        .filter(membership::Column::ProfileId.eq(profile.id))
        .one(db)
        .await?
        .ok_or(ServerError::PermissionDenied)?;
    Ok((profile, membership))
}

pub fn is_admin(role: &str) -> bool {
    role == "owner" || role == "admin"
}

/// Resolve the session and require an owner or admin membership.
pub async fn require_admin(
    db: &DatabaseConnection,
    cache: &SessionCache,
    headers: &HeaderMap,
    org_id: i32,
) -> Result<(profile::Model, membership::Model)> {
    let (profile, membership) = require_membership(db, cache, headers, org_id).await?;
    if !is_admin(&membership.role) {
        return Err(ServerError::PermissionDenied);
    }
    Ok((profile, membership))
}

/// Reject demoting or removing the only owner of an organization.
pub async fn assert_not_last_owner(
    db: &DatabaseConnection,
    target: &membership::Model,
) -> Result<()> {
    if target.role != "owner" {
        return Ok(());
    }
    let owner_count = membership::Entity::find()
        .filter(membership::Column::OrgId.eq(target.org_id))
        .filter(membership::Column::Role.eq("owner"))
        .count(db)
        .await?;
    if owner_count <= 1 {
        return Err(ServerError::Conflict(
            "Cannot remove or demote the only owner".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use sea_orm::{ActiveModelTrait, Set};
    use tempfile::TempDir;

    use crate::db::entities::organization;

    #[test]
    fn test_sha256_hex_is_stable() {
        let a = sha256_hex("session-token");
        let b = sha256_hex("session-token");
        let c = sha256_hex("other-token");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_extract_token_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_token_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; token=xyz; lang=en"));
        assert_eq!(extract_token(&headers), Some("xyz".to_string()));
    }

    #[test]
    fn test_extract_token_missing() {
        assert_eq!(extract_token(&HeaderMap::new()), None);
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark"));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn test_session_cache_expiry() {
        let cache = SessionCache::new();
        cache.insert("h1".to_string(), 7, 0);
        cache.insert("h2".to_string(), 8, 100);

        assert_eq!(cache.get("h1", 1_000_000), Some(7));
        assert_eq!(cache.get("h2", 99), Some(8));
        assert_eq!(cache.get("h2", 101), None);
        assert_eq!(cache.get("unknown", 0), None);
    }

    #[test]
    fn test_is_admin_roles() {
        assert!(is_admin("owner"));
        assert!(is_admin("admin"));
        assert!(!is_admin("member"));
        assert!(!is_admin(""));
    }

    async fn seed_profile(db: &DatabaseConnection, external_id: &str, email: &str) -> profile::Model {
        profile::ActiveModel {
            external_id: Set(external_id.to_string()),
            email: Set(email.to_string()),
            display_name: Set(None),
            created_at: Set(0),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_require_profile_resolves_provider_sessions() {
        let dir = TempDir::new().unwrap();
        let db = crate::db::init_database(&dir.path().join("auth.db")).await.unwrap();
        let staff = seed_profile(&db, "ext-1", "staff@acme.test").await;

        // The auth provider wrote this session; we only resolve it.
        session::ActiveModel {
            profile_id: Set(staff.id),
            token_hash: Set(sha256_hex("tok-1")),
            expires_at: Set(0),
            created_at: Set(0),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let cache = SessionCache::new();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok-1"));

        let resolved = require_profile(&db, &cache, &headers).await.unwrap();
        assert_eq!(resolved.id, staff.id);

        // Second resolution is served from the cache.
        let again = require_profile(&db, &cache, &headers).await.unwrap();
        assert_eq!(again.id, staff.id);

        let mut unknown = HeaderMap::new();
        unknown.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(require_profile(&db, &cache, &unknown).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let dir = TempDir::new().unwrap();
        let db = crate::db::init_database(&dir.path().join("auth.db")).await.unwrap();
        let staff = seed_profile(&db, "ext-2", "old@acme.test").await;

        session::ActiveModel {
            profile_id: Set(staff.id),
            token_hash: Set(sha256_hex("stale")),
            expires_at: Set(1),
            created_at: Set(0),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let cache = SessionCache::new();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer stale"));
        assert!(require_profile(&db, &cache, &headers).await.is_err());
    }

    #[tokio::test]
    async fn test_last_owner_guard() {
        let dir = TempDir::new().unwrap();
        let db = crate::db::init_database(&dir.path().join("auth.db")).await.unwrap();

        let org = organization::ActiveModel {
            name: Set("Acme Benefits".to_string()),
            slug: Set("acme".to_string()),
            webhook_secret_hash: Set(sha256_hex("whsec_test")),
            webhook_secret_prefix: Set("whsec_test".to_string()),
            created_at: Set(0),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let p1 = seed_profile(&db, "ext-3", "owner@acme.test").await;
        let p2 = seed_profile(&db, "ext-4", "member@acme.test").await;

        let owner = membership::ActiveModel {
            org_id: Set(org.id),
            profile_id: Set(p1.id),
            role: Set("owner".to_string()),
            created_at: Set(0),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();
        let member = membership::ActiveModel {
            org_id: Set(org.id),
            profile_id: Set(p2.id),
            role: Set("member".to_string()),
            created_at: Set(0),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        // The sole owner cannot be demoted or removed.
        assert!(assert_not_last_owner(&db, &owner).await.is_err());
        // Non-owners are never blocked.
        assert!(assert_not_last_owner(&db, &member).await.is_ok());

        // Promoting a second owner lifts the guard.
        let mut active: membership::ActiveModel = member.into();
        active.role = Set("owner".to_string());
        active.update(&db).await.unwrap();
        assert!(assert_not_last_owner(&db, &owner).await.is_ok());
    }
}
