//! CRM layout entity - stored section/field arrangement for a module

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "crm_layouts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub module_id: i32,
    /// Opaque JSON consumed by the frontend.
    pub sections: String,
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
}

impl Related<super::crm_module::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Module.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
