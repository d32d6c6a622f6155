//! CRM field entity - one typed column of a module

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "crm_fields")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub module_id: i32,
    pub api_name: String,
    pub label: String,
    pub field_type: String, // "text", "number", "boolean", "date", "email", "phone", "picklist"
    pub required: bool,
    /// JSON array of picklist options, null for other types.
    pub options: Option<String>,
    pub sort_order: i32,
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
}

impl Related<super::crm_module::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Module.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
