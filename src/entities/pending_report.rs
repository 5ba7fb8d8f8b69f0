//! Report command awaiting submission to the upstream repository.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "pending_reports")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// JSON-encoded `ReportCommand`
    #[sea_orm(column_type = "Text")]
    pub command: String,
    /// Lowercased url used for duplicate detection
    pub url_key: Option<String>,
    /// Lowercased name used for duplicate detection
    pub name_key: Option<String>,
    /// Lowercased addresses, comma separated
    #[sea_orm(column_type = "Text")]
    pub address_keys: String,
    /// `queued`, `failed` or `submitted`
    pub status: String,
    pub attempts: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    pub request_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
