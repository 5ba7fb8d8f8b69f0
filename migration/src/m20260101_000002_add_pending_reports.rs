use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Reports queued for submission to the upstream blocklist repository
        manager
            .create_table(
                Table::create()
                    .table(PendingReports::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PendingReports::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PendingReports::Command).text().not_null())
                    .col(ColumnDef::new(PendingReports::UrlKey).string_len(512).null())
                    .col(ColumnDef::new(PendingReports::NameKey).string_len(255).null())
                    .col(ColumnDef::new(PendingReports::AddressKeys).text().not_null())
                    .col(
                        ColumnDef::new(PendingReports::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingReports::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(PendingReports::LastError).text().null())
                    .col(
                        ColumnDef::new(PendingReports::RequestUrl)
                            .string_len(512)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PendingReports::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingReports::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Index for draining the queue by status
        manager
            .create_index(
                Index::create()
                    .name("idx_pending_reports_status")
                    .table(PendingReports::Table)
                    .col(PendingReports::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PendingReports::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PendingReports {
    Table,
    Id,
    Command,
    UrlKey,
    NameKey,
    AddressKeys,
    Status,
    Attempts,
    LastError,
    RequestUrl,
    CreatedAt,
    UpdatedAt,
}
