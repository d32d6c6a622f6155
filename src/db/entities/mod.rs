//! Database entities

pub mod advisor;
pub mod approval_request;
pub mod approval_rule;
pub mod billing_failure;
pub mod billing_schedule;
pub mod billing_transaction;
pub mod blueprint;
pub mod campaign;
pub mod campaign_recipient;
pub mod campaign_step;
pub mod crm_field;
pub mod crm_layout;
pub mod crm_module;
pub mod crm_record;
pub mod crm_view;
pub mod enrollment;
pub mod member;
pub mod membership;
pub mod organization;
pub mod profile;
pub mod session;
pub mod workflow;
pub mod workflow_run;
