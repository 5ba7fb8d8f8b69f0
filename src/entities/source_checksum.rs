use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "source_checksums")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub source_name: String,
    /// Hex-encoded SHA-256 of the last imported source bytes
    pub checksum: String,
    pub row_count: i32,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
