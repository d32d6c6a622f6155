pub mod approvals;
pub mod auth;
pub mod billing;
pub mod blueprints;
pub mod campaigns;
pub mod crm;
pub mod dashboard;
pub mod directory;
pub mod orgs;
pub mod types;
pub mod webhooks;
pub mod workflows;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Json, Router,
};
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};

use crate::automation::AutomationEngine;
use crate::mail::Mailer;
use auth::SessionCache;

/// Application state shared across handlers
pub struct AppState {
    pub db: DatabaseConnection,
    pub sessions: SessionCache,
    pub automation: AutomationEngine,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(db: DatabaseConnection, mailer: Arc<dyn Mailer>) -> Self {
        let automation = AutomationEngine::start(db.clone(), mailer.clone());
        Self {
            db,
            sessions: SessionCache::new(),
            automation,
            mailer,
        }
    }
}

/// Health check endpoint
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// All /api routes.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Organizations and memberships
        .route("/api/orgs", post(orgs::create_org))
        .route("/api/orgs/:org_id", get(orgs::get_org))
        .route("/api/orgs/:org_id/webhook-secret", post(orgs::rotate_webhook_secret))
        .route("/api/orgs/:org_id/members", get(orgs::list_members).post(orgs::add_member))
        .route("/api/orgs/:org_id/members/:profile_id", delete(orgs::remove_member))
        .route("/api/orgs/:org_id/members/:profile_id/role", post(orgs::change_role))
        .route("/api/orgs/:org_id/dashboard", get(dashboard::dashboard))
        // Directory
        .route("/api/orgs/:org_id/advisors", get(directory::list_advisors).post(directory::create_advisor))
        .route(
            "/api/advisors/:id",
            get(directory::get_advisor).post(directory::update_advisor).delete(directory::delete_advisor),
        )
        .route("/api/orgs/:org_id/insured", get(directory::list_insured).post(directory::create_insured))
        .route(
            "/api/insured/:id",
            get(directory::get_insured).post(directory::update_insured).delete(directory::delete_insured),
        )
        .route(
            "/api/insured/:id/enrollments",
            get(directory::list_enrollments).post(directory::create_enrollment),
        )
        .route("/api/enrollments/:id", post(directory::update_enrollment))
        .route("/api/enrollments/:id/terminate", post(directory::terminate_enrollment))
        // Billing
        .route(
            "/api/orgs/:org_id/billing/schedules",
            get(billing::list_schedules).post(billing::create_schedule),
        )
        .route("/api/billing/schedules/:id", post(billing::update_schedule))
        .route("/api/billing/schedules/:id/charge", post(billing::charge_schedule))
        .route("/api/orgs/:org_id/billing/failures", get(billing::list_failures))
        .route("/api/billing/failures/:id/retry", post(billing::retry_failure))
        .route("/api/billing/failures/:id/resolve", post(billing::resolve_failure))
        .route("/api/orgs/:org_id/billing/transactions", get(billing::list_transactions))
        // CRM definitions
        .route("/api/orgs/:org_id/crm/modules", get(crm::list_modules).post(crm::create_module))
        .route("/api/crm/modules/:id/fields", get(crm::list_fields).post(crm::create_field))
        .route("/api/crm/modules/:id/records", get(crm::list_records).post(crm::create_record))
        .route("/api/crm/modules/:id/views", get(crm::list_views).post(crm::create_view))
        .route("/api/crm/modules/:id/layout", get(crm::get_layout).put(crm::upsert_layout))
        .route(
            "/api/crm/modules/:id/approval-rules",
            get(approvals::list_rules).post(approvals::create_rule),
        )
        .route(
            "/api/crm/modules/:id/blueprint",
            get(blueprints::get_blueprint).put(blueprints::upsert_blueprint),
        )
        // Records
        .route(
            "/api/crm/records/:id",
            get(crm::get_record).post(crm::update_record).delete(crm::delete_record),
        )
        .route("/api/crm/records/:id/stage", post(crm::change_stage))
        .route("/api/crm/views/:id/records", get(crm::run_view))
        // Approvals
        .route("/api/orgs/:org_id/approvals", get(approvals::list_pending))
        .route("/api/approval-rules/:id", delete(approvals::delete_rule))
        .route("/api/approvals/:id/approve", post(approvals::approve))
        .route("/api/approvals/:id/reject", post(approvals::reject))
        // Workflows
        .route(
            "/api/orgs/:org_id/workflows",
            get(workflows::list_workflows).post(workflows::create_workflow),
        )
        .route(
            "/api/workflows/:id",
            post(workflows::update_workflow).delete(workflows::delete_workflow),
        )
        .route("/api/workflows/:id/toggle", post(workflows::toggle_workflow))
        .route("/api/workflows/:id/runs", get(workflows::list_runs))
        // Campaigns
        .route(
            "/api/orgs/:org_id/campaigns",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route("/api/campaigns/:id", post(campaigns::update_campaign))
        .route("/api/campaigns/:id/steps", get(campaigns::list_steps).post(campaigns::create_step))
        .route("/api/campaigns/:id/recipients", get(campaigns::list_recipients))
        .route("/api/campaigns/:id/send", post(campaigns::send_campaign))
        // Webhooks
        .route("/api/crm/webhooks/inbound", post(webhooks::inbound))
}
