//! Billing transaction entity - the outcome of one charge attempt

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "billing_transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub org_id: i32,
    pub schedule_id: i32,
    pub amount_cents: i64,
    pub status: String, // "succeeded", "failed"
    pub failure_reason: Option<String>,
    pub charged_at: i64,
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
