use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Entries::Id)
                            .string_len(16)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Entries::Kind).string_len(16).not_null())
                    .col(ColumnDef::new(Entries::Url).string_len(512).not_null())
                    .col(ColumnDef::new(Entries::Hostname).string_len(255).not_null())
                    .col(ColumnDef::new(Entries::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Entries::PathScope).string_len(16).not_null())
                    .col(ColumnDef::new(Entries::Category).string_len(64).null())
                    .col(ColumnDef::new(Entries::Subcategory).string_len(64).null())
                    .col(ColumnDef::new(Entries::Description).text().null())
                    .col(ColumnDef::new(Entries::Reporter).string_len(128).null())
                    .col(ColumnDef::new(Entries::Coin).string_len(16).null())
                    .col(
                        ColumnDef::new(Entries::Severity)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Entries::Featured)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    // Liveness columns, written by the background checker only.
                    .col(ColumnDef::new(Entries::Ip).string_len(64).null())
                    .col(ColumnDef::new(Entries::Status).string_len(16).null())
                    .col(ColumnDef::new(Entries::StatusCode).integer().null())
                    .col(ColumnDef::new(Entries::CheckedAt).big_integer().null())
                    .col(ColumnDef::new(Entries::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Entries::UpdatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        for (name, column) in [
            ("idx_entries_hostname", Entries::Hostname),
            ("idx_entries_url", Entries::Url),
            ("idx_entries_reporter", Entries::Reporter),
            ("idx_entries_ip", Entries::Ip),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(Entries::Table)
                        .col(column)
                        .to_owned(),
                )
                .await?;
        }

        manager
            .create_table(
                Table::create()
                    .table(AddressBindings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AddressBindings::Address)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AddressBindings::EntryId)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(AddressBindings::Coin).string_len(16).not_null())
                    .col(
                        ColumnDef::new(AddressBindings::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_address_bindings")
                            .col(AddressBindings::Address)
                            .col(AddressBindings::EntryId)
                            .col(AddressBindings::Coin),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_address_bindings_entry")
                            .from(AddressBindings::Table, AddressBindings::EntryId)
                            .to(Entries::Table, Entries::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_address_bindings_entry")
                    .table(AddressBindings::Table)
                    .col(AddressBindings::EntryId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SourceChecksums::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SourceChecksums::SourceName)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SourceChecksums::Checksum)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SourceChecksums::RowCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SourceChecksums::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SourceChecksums::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AddressBindings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Entries::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Entries {
    Table,
    Id,
    Kind,
    Url,
    Hostname,
    Name,
    PathScope,
    Category,
    Subcategory,
    Description,
    Reporter,
    Coin,
    Severity,
    Featured,
    Ip,
    Status,
    StatusCode,
    CheckedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AddressBindings {
    Table,
    Address,
    EntryId,
    Coin,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SourceChecksums {
    Table,
    SourceName,
    Checksum,
    RowCount,
    UpdatedAt,
}
