//! Blocklisted or allowlisted subject imported from a source file.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entries")]
pub struct Model {
    /// Truncated keccak of the canonical URL
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// `blocked` or `verified`
    pub kind: String,
    pub url: String,
    pub hostname: String,
    pub name: String,
    /// `domain` when the entry covers the whole host, `path` otherwise
    pub path_scope: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub reporter: Option<String>,
    pub coin: Option<String>,
    pub severity: i32,
    pub featured: bool,
    pub ip: Option<String>,
    pub status: Option<String>,
    pub status_code: Option<i32>,
    pub checked_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::address_binding::Entity")]
    AddressBinding,
}

impl Related<super::address_binding::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AddressBinding.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
