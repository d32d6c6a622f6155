//! Approval request entity - a pending mutation awaiting a decision

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "approval_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub org_id: i32,
    pub rule_id: i32,
    pub record_id: i32,
    pub action: String, // "update", "delete", "stage_change"
    /// JSON of the held mutation: a data patch for updates, the target
    /// stage for stage changes, null for deletes.
    pub proposed: Option<String>,
    pub requested_by: i32,
    pub status: String, // "pending", "approved", "rejected"
    pub decided_by: Option<i32>,
    pub decided_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::approval_rule::Entity",
        from = "Column::RuleId",
        to = "super::approval_rule::Column::Id"
    )]
    Rule,
    #[sea_orm(
        belongs_to = "super::crm_record::Entity",
        from = "Column::RecordId",
        to = "super::crm_record::Column::Id"
    )]
    Record,
}

impl Related<super::approval_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
