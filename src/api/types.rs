//! Request and response types for the JSON API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Organizations
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrgRequest {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: String,
}

// ============================================================================
// Directory
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAdvisorRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub license_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAdvisorRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub license_number: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateInsuredMemberRequest {
    pub advisor_id: Option<i32>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateInsuredMemberRequest {
    pub advisor_id: Option<i32>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEnrollmentRequest {
    pub plan_name: String,
    pub monthly_premium_cents: i64,
    /// Defaults to now.
    pub effective_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEnrollmentRequest {
    pub plan_name: Option<String>,
    pub monthly_premium_cents: Option<i64>,
    pub status: Option<String>,
}

// ============================================================================
// Billing
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub enrollment_id: i32,
    /// Defaults to the enrollment's monthly premium.
    pub amount_cents: Option<i64>,
    pub frequency: String,
    /// Defaults to now.
    pub next_charge_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateScheduleRequest {
    pub amount_cents: Option<i64>,
    pub frequency: Option<String>,
    pub status: Option<String>,
}

/// Charge outcome reported by the payment gateway callback.
#[derive(Debug, Deserialize)]
pub struct ChargeOutcomeRequest {
    pub success: bool,
    pub failure_reason: Option<String>,
}

// ============================================================================
// CRM
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateModuleRequest {
    pub name: String,
    pub api_name: String,
    #[serde(default)]
    pub has_stages: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateFieldRequest {
    pub api_name: String,
    pub label: String,
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    pub options: Option<Vec<String>>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub data: Map<String, Value>,
    pub stage: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRecordRequest {
    /// Partial patch merged over the stored data.
    pub data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct StageChangeRequest {
    pub stage: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateViewRequest {
    pub name: String,
    pub conditions: Value,
}

#[derive(Debug, Deserialize)]
pub struct UpsertLayoutRequest {
    pub sections: Value,
}

/// A record with its data column parsed back into JSON.
#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub id: i32,
    pub module_id: i32,
    pub data: Value,
    pub stage: Option<String>,
    pub external_key: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ============================================================================
// Approvals and blueprints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateApprovalRuleRequest {
    pub name: String,
    pub gated_actions: Vec<String>,
    pub conditions: Value,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintTransition {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertBlueprintRequest {
    pub transitions: Vec<BlueprintTransition>,
}

// ============================================================================
// Workflows
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub module_id: i32,
    pub name: String,
    pub trigger_kind: String,
    pub trigger_field: Option<String>,
    pub conditions: Option<Value>,
    pub actions: Value,
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkflowRequest {
    pub name: Option<String>,
    pub trigger_kind: Option<String>,
    pub trigger_field: Option<String>,
    pub conditions: Option<Value>,
    pub actions: Option<Value>,
    pub enabled: Option<bool>,
}

// ============================================================================
// Campaigns
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateStepRequest {
    pub delay_days: i32,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct SendCampaignRequest {
    /// Explicit addresses; defaults to every active insured member with an
    /// email on file.
    pub recipients: Option<Vec<String>>,
}

// ============================================================================
// Webhooks
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InboundWebhookRequest {
    pub module_api_name: String,
    pub external_key: Option<String>,
    pub data: Map<String, Value>,
    pub stage: Option<String>,
}
