//! Entry, binding and checksum persistence. Every function takes any
//! `ConnectionTrait` so it runs on the pool or inside an import transaction.

use std::collections::BTreeSet;

use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder,
};

use crate::entities::{address_binding, entry, source_checksum};
use crate::entry::{EntryKind, SCOPE_DOMAIN, entry_id};

/// Entry fields derived from one source row, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub id: String,
    pub kind: EntryKind,
    pub url: String,
    pub hostname: String,
    pub name: String,
    pub path_scope: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub reporter: Option<String>,
    pub coin: Option<String>,
    pub severity: i32,
    pub featured: bool,
    /// `(address, coin)` pairs
    pub bindings: BTreeSet<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingDiff {
    pub inserted: u64,
    pub deleted: u64,
}

pub async fn get_entry<C: ConnectionTrait>(db: &C, id: &str) -> Result<Option<entry::Model>, DbErr> {
    entry::Entity::find_by_id(id.to_string()).one(db).await
}

/// Inserts a new entry or refreshes its descriptive fields. Liveness columns
/// and the kind are only written on insert.
pub async fn upsert_entry<C: ConnectionTrait>(
    db: &C,
    record: &EntryRecord,
    now: i64,
) -> Result<UpsertOutcome, DbErr> {
    assert!(!record.id.is_empty(), "Entry id cannot be empty");
    assert!(!record.hostname.is_empty(), "Entry hostname cannot be empty");

    let Some(existing) = get_entry(db, &record.id).await? else {
        let model = entry::ActiveModel {
            id: Set(record.id.clone()),
            kind: Set(record.kind.as_str().to_string()),
            url: Set(record.url.clone()),
            hostname: Set(record.hostname.clone()),
            name: Set(record.name.clone()),
            path_scope: Set(record.path_scope.clone()),
            category: Set(record.category.clone()),
            subcategory: Set(record.subcategory.clone()),
            description: Set(record.description.clone()),
            reporter: Set(record.reporter.clone()),
            coin: Set(record.coin.clone()),
            severity: Set(record.severity),
            featured: Set(record.featured),
            ip: Set(None),
            status: Set(None),
            status_code: Set(None),
            checked_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        model.insert(db).await?;
        return Ok(UpsertOutcome::Inserted);
    };

    if descriptive_fields_match(&existing, record) {
        return Ok(UpsertOutcome::Unchanged);
    }

    let mut model = existing.into_active_model();
    model.name = Set(record.name.clone());
    model.path_scope = Set(record.path_scope.clone());
    model.category = Set(record.category.clone());
    model.subcategory = Set(record.subcategory.clone());
    model.description = Set(record.description.clone());
    model.reporter = Set(record.reporter.clone());
    model.coin = Set(record.coin.clone());
    model.severity = Set(record.severity);
    model.featured = Set(record.featured);
    model.updated_at = Set(now);
    model.update(db).await?;
    Ok(UpsertOutcome::Updated)
}

fn descriptive_fields_match(existing: &entry::Model, record: &EntryRecord) -> bool {
    existing.name == record.name
        && existing.path_scope == record.path_scope
        && existing.category == record.category
        && existing.subcategory == record.subcategory
        && existing.description == record.description
        && existing.reporter == record.reporter
        && existing.coin == record.coin
        && existing.severity == record.severity
        && existing.featured == record.featured
}

pub async fn list_address_bindings<C: ConnectionTrait>(
    db: &C,
    entry_id: &str,
) -> Result<Vec<address_binding::Model>, DbErr> {
    address_binding::Entity::find()
        .filter(address_binding::Column::EntryId.eq(entry_id))
        .order_by_asc(address_binding::Column::Address)
        .all(db)
        .await
}

pub async fn insert_address_bindings<C: ConnectionTrait>(
    db: &C,
    entry_id: &str,
    bindings: &[(String, String)],
    now: i64,
) -> Result<u64, DbErr> {
    if bindings.is_empty() {
        return Ok(0);
    }
    let models = bindings.iter().map(|(address, coin)| address_binding::ActiveModel {
        address: Set(address.clone()),
        entry_id: Set(entry_id.to_string()),
        coin: Set(coin.clone()),
        created_at: Set(now),
    });
    address_binding::Entity::insert_many(models)
        .exec_without_returning(db)
        .await
}

pub async fn delete_address_binding<C: ConnectionTrait>(
    db: &C,
    address: &str,
    entry_id: &str,
    coin: &str,
) -> Result<u64, DbErr> {
    let result = address_binding::Entity::delete_many()
        .filter(address_binding::Column::Address.eq(address))
        .filter(address_binding::Column::EntryId.eq(entry_id))
        .filter(address_binding::Column::Coin.eq(coin))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Makes the stored bindings of `record` equal to its freshest row.
pub async fn reconcile_bindings<C: ConnectionTrait>(
    db: &C,
    record: &EntryRecord,
    now: i64,
) -> Result<BindingDiff, DbErr> {
    let stored: BTreeSet<(String, String)> = list_address_bindings(db, &record.id)
        .await?
        .into_iter()
        .map(|binding| (binding.address, binding.coin))
        .collect();

    let mut diff = BindingDiff::default();
    for (address, coin) in stored.difference(&record.bindings) {
        diff.deleted += delete_address_binding(db, address, &record.id, coin).await?;
    }
    let missing: Vec<(String, String)> = record.bindings.difference(&stored).cloned().collect();
    diff.inserted = insert_address_bindings(db, &record.id, &missing, now).await?;
    Ok(diff)
}

pub async fn get_checksum<C: ConnectionTrait>(
    db: &C,
    source_name: &str,
) -> Result<Option<source_checksum::Model>, DbErr> {
    source_checksum::Entity::find_by_id(source_name.to_string())
        .one(db)
        .await
}

pub async fn set_checksum<C: ConnectionTrait>(
    db: &C,
    source_name: &str,
    checksum: &str,
    row_count: usize,
    now: i64,
) -> Result<(), DbErr> {
    assert!(!source_name.is_empty(), "Source name cannot be empty");
    assert_eq!(checksum.len(), 64, "Checksum must be hex-encoded SHA-256");
    let row_count = i32::try_from(row_count)
        .map_err(|_| DbErr::Custom(format!("Row count {row_count} overflows i32")))?;

    match get_checksum(db, source_name).await? {
        Some(existing) => {
            let mut model = existing.into_active_model();
            model.checksum = Set(checksum.to_string());
            model.row_count = Set(row_count);
            model.updated_at = Set(now);
            model.update(db).await?;
        }
        None => {
            let model = source_checksum::ActiveModel {
                source_name: Set(source_name.to_string()),
                checksum: Set(checksum.to_string()),
                row_count: Set(row_count),
                updated_at: Set(now),
            };
            model.insert(db).await?;
        }
    }
    Ok(())
}

/// Every entry and binding, ordered for deterministic view construction.
pub async fn load_index<C: ConnectionTrait>(
    db: &C,
) -> Result<(Vec<entry::Model>, Vec<address_binding::Model>), DbErr> {
    let entries = entry::Entity::find()
        .order_by_asc(entry::Column::Id)
        .all(db)
        .await?;
    let bindings = address_binding::Entity::find()
        .order_by_asc(address_binding::Column::EntryId)
        .order_by_asc(address_binding::Column::Address)
        .all(db)
        .await?;
    Ok((entries, bindings))
}

/// Entries with the same canonical url, or covering `name` either by display
/// name or as a whole-domain listing of that host.
pub async fn find_entries_matching<C: ConnectionTrait>(
    db: &C,
    url: Option<&str>,
    name: Option<&str>,
) -> Result<Vec<entry::Model>, DbErr> {
    let mut found: Vec<entry::Model> = Vec::new();
    if let Some(url) = url {
        if let Some(model) = get_entry(db, &entry_id(url)).await? {
            found.push(model);
        }
    }
    if let Some(name) = name {
        let lowered = name.trim().to_ascii_lowercase();
        let candidates = entry::Entity::find()
            .filter(
                Condition::any()
                    .add(entry::Column::Hostname.eq(lowered.as_str()))
                    .add(entry::Column::Name.eq(lowered.as_str())),
            )
            .all(db)
            .await?;
        for model in candidates {
            let covers = model.name.eq_ignore_ascii_case(&lowered) || model.path_scope == SCOPE_DOMAIN;
            if covers && !found.iter().any(|existing| existing.id == model.id) {
                found.push(model);
            }
        }
    }
    Ok(found)
}

pub async fn find_bindings_for_addresses<C: ConnectionTrait>(
    db: &C,
    addresses: &[String],
) -> Result<Vec<address_binding::Model>, DbErr> {
    if addresses.is_empty() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for address in addresses {
        let matches = address_binding::Entity::find()
            .filter(
                Expr::expr(Func::lower(Expr::col(address_binding::Column::Address)))
                    .eq(address.trim().to_ascii_lowercase()),
            )
            .all(db)
            .await?;
        found.extend(matches);
    }
    Ok(found)
}
