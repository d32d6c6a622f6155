//! Approval rule entity - routes matching mutations through human approval

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "approval_rules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub module_id: i32,
    pub org_id: i32,
    pub name: String,
    /// JSON array drawn from "update", "delete", "stage_change".
    pub gated_actions: String,
    /// JSON rule group evaluated against the record's current data.
    pub conditions: String,
    pub enabled: bool,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::crm_module::Entity",
        from = "Column::ModuleId",
        to = "super::crm_module::Column::Id"
    )]
    Module,
    #[sea_orm(has_many = "super::approval_request::Entity")]
    Requests,
}

impl Related<super::approval_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Requests.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
