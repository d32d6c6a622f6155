//! CRM record entity - one row of a module, field values stored as JSON

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "crm_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub module_id: i32,
    pub org_id: i32,
    /// JSON object keyed by field api_name.
    pub data: String,
    pub stage: Option<String>,
    /// Key supplied by inbound webhooks for upserts.
    pub external_key: Option<String>,
    pub created_by: i32,
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
    #[sea_orm(has_many = "super::approval_request::Entity")]
    ApprovalRequests,
}

impl Related<super::crm_module::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Module.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
