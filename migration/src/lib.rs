pub use sea_orm_migration::prelude::*;

mod m20260101_000001_create_entry_tables;
mod m20260101_000002_add_pending_reports;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000001_create_entry_tables::Migration),
            Box::new(m20260101_000002_add_pending_reports::Migration),
        ]
    }
}
