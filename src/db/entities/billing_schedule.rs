//! Billing schedule entity - recurring charge for an enrollment

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "billing_schedules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub org_id: i32,
    pub enrollment_id: i32,
    pub amount_cents: i64,
    pub frequency: String, // "monthly", "quarterly", "annual"
    pub next_charge_at: i64,
    pub status: String, // "active", "paused", "canceled"
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::enrollment::Entity",
        from = "Column::EnrollmentId",
        to = "super::enrollment::Column::Id"
    )]
    Enrollment,
    #[sea_orm(has_many = "super::billing_transaction::Entity")]
    Transactions,
    #[sea_orm(has_many = "super::billing_failure::Entity")]
    Failures,
}

impl Related<super::enrollment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Enrollment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
