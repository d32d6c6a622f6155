//! Billing failure entity - an open retry workflow for a failed charge
//!
//! Retries follow the fixed 1/3/7 day backoff with a three-attempt cap;
//! see `crate::billing`.

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "billing_failures")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub org_id: i32,
    pub schedule_id: i32,
    pub transaction_id: i32,
    pub amount_cents: i64,
    /// Retries already attempted (0 when the failure is first opened).
    pub retry_attempt: i64,
    pub next_retry_at: Option<i64>,
    pub status: String, // "retrying", "exhausted", "resolved"
    pub last_failure_reason: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::billing_schedule::Entity",
        from = "Column::ScheduleId",
        to = "super::billing_schedule::Column::Id"
    )]
    Schedule,
}

impl Related<super::billing_schedule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Schedule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
