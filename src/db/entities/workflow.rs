//! Workflow entity - a stored trigger-condition-action automation

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "workflows")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub org_id: i32,
    pub module_id: i32,
    pub name: String,
    pub trigger_kind: String, // "record_created", "record_updated", "field_changed", "stage_changed"
    /// Watched field for field_changed triggers.
    pub trigger_field: Option<String>,
    /// JSON rule group evaluated against the post-mutation data.
    pub conditions: String,
    /// JSON array of actions ("set_field", "send_email", "log").
    pub actions: String,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::crm_module::Entity",
        from = "Column::ModuleId",
        to = "super::crm_module::Column::Id"
    )]
    Module,
    #[sea_orm(has_many = "super::workflow_run::Entity")]
    Runs,
}

impl Related<super::workflow_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Runs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
