//! Organization entity - the tenant boundary for all data

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    #[sea_orm(unique)]
    pub slug: String,
    /// SHA-256 of the inbound webhook secret (raw value shown once).
    #[serde(skip_serializing)]
    pub webhook_secret_hash: String,
    /// First characters of the secret for identification.
    pub webhook_secret_prefix: String,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::membership::Entity")]
    Memberships,
    #[sea_orm(has_many = "super::advisor::Entity")]
    Advisors,
    #[sea_orm(has_many = "super::member::Entity")]
    Members,
}

impl Related<super::membership::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memberships.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
