pub mod source;
pub mod store;
pub mod views;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::classify::Classifier;
use crate::config::{IndexerConfig, SourceConfig};
use crate::indexer::source::{SourceFetcher, SourceFile, SourceRow, parse_rows};
use crate::indexer::store::UpsertOutcome;
use crate::indexer::views::{IndexViews, ViewStore};

#[derive(Debug, thiserror::Error)]
pub enum ImportSourceError {
    #[error("source {source_name} could not be fetched: {reason}")]
    Fetch { source_name: String, reason: String },
    #[error("source {source_name} is not a valid document")]
    Parse {
        source_name: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("source {source_name} failed to persist")]
    Database {
        source_name: String,
        #[source]
        source: DbErr,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Imported,
    /// Checksum matched the last successful import
    Unchanged,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
    pub rows: usize,
    pub rows_skipped: usize,
    pub entries_inserted: u64,
    pub entries_updated: u64,
    pub bindings_inserted: u64,
    pub bindings_deleted: u64,
    pub error: Option<String>,
}

impl SourceOutcome {
    fn new(source: &str, status: SourceStatus) -> Self {
        Self {
            source: source.to_string(),
            status,
            rows: 0,
            rows_skipped: 0,
            entries_inserted: 0,
            entries_updated: 0,
            bindings_inserted: 0,
            bindings_deleted: 0,
            error: None,
        }
    }

    fn failed(source: &str, err: &ImportSourceError) -> Self {
        let mut outcome = Self::new(source, SourceStatus::Failed);
        outcome.error = Some(format!("{err}"));
        outcome
    }

    pub fn writes(&self) -> u64 {
        self.entries_inserted + self.entries_updated + self.bindings_inserted + self.bindings_deleted
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub sources: Vec<SourceOutcome>,
}

impl ImportReport {
    #[cfg(test)]
    pub fn outcome(&self, source: &str) -> Option<&SourceOutcome> {
        self.sources.iter().find(|outcome| outcome.source == source)
    }

    pub fn failed(&self) -> usize {
        self.sources
            .iter()
            .filter(|outcome| outcome.status == SourceStatus::Failed)
            .count()
    }
}

/// Imports each source in kind order. A failing source is reported and left
/// for the next run without affecting the others.
pub async fn import_sources(
    database: &DatabaseConnection,
    classifier: &Classifier,
    sources: &[SourceFile],
) -> ImportReport {
    let mut ordered: Vec<&SourceFile> = sources.iter().collect();
    ordered.sort_by_key(|source| source.kind);

    let mut report = ImportReport::default();
    for source in ordered {
        match import_source(database, classifier, source).await {
            Ok(outcome) => {
                debug!(
                    source = %source.name,
                    status = ?outcome.status,
                    writes = outcome.writes(),
                    "Source processed"
                );
                report.sources.push(outcome);
            }
            Err(err) => {
                error!(source = %source.name, "Source import failed: {err:#}");
                report.sources.push(SourceOutcome::failed(&source.name, &err));
            }
        }
    }
    report
}

async fn import_source(
    database: &DatabaseConnection,
    classifier: &Classifier,
    source: &SourceFile,
) -> Result<SourceOutcome, ImportSourceError> {
    let db_err = |source_err: DbErr| ImportSourceError::Database {
        source_name: source.name.clone(),
        source: source_err,
    };

    let checksum = source.checksum();
    let stored = store::get_checksum(database, &source.name)
        .await
        .map_err(db_err)?;
    if stored.is_some_and(|stored| stored.checksum == checksum) {
        return Ok(SourceOutcome::new(&source.name, SourceStatus::Unchanged));
    }

    let rows = parse_rows(&source.bytes).map_err(|err| ImportSourceError::Parse {
        source_name: source.name.clone(),
        source: err,
    })?;
    let row_count = rows.len();
    let now = now_millis();

    let mut outcome = SourceOutcome::new(&source.name, SourceStatus::Imported);
    outcome.rows = row_count;

    let txn = database.begin().await.map_err(db_err)?;
    if let Err(err) = apply_rows(&txn, classifier, source, rows, now, &mut outcome).await {
        if let Err(rollback_err) = txn.rollback().await {
            warn!(source = %source.name, "Rollback failed: {rollback_err}");
        }
        return Err(db_err(err));
    }
    txn.commit().await.map_err(db_err)?;

    store::set_checksum(database, &source.name, &checksum, row_count, now)
        .await
        .map_err(db_err)?;
    Ok(outcome)
}

async fn apply_rows(
    txn: &DatabaseTransaction,
    classifier: &Classifier,
    source: &SourceFile,
    rows: Vec<SourceRow>,
    now: i64,
    outcome: &mut SourceOutcome,
) -> Result<(), DbErr> {
    for (index, row) in rows.into_iter().enumerate() {
        let Some(record) = row.into_record(source.kind, classifier) else {
            warn!(source = %source.name, index, "Skipping row without url or name");
            outcome.rows_skipped += 1;
            continue;
        };
        match store::upsert_entry(txn, &record, now).await? {
            UpsertOutcome::Inserted => outcome.entries_inserted += 1,
            UpsertOutcome::Updated => outcome.entries_updated += 1,
            UpsertOutcome::Unchanged => {}
        }
        let diff = store::reconcile_bindings(txn, &record, now).await?;
        outcome.bindings_inserted += diff.inserted;
        outcome.bindings_deleted += diff.deleted;
    }
    Ok(())
}

/// Full recomputation of the lookup views from persisted state.
pub async fn rebuild_views(database: &DatabaseConnection) -> Result<IndexViews, DbErr> {
    let (entries, bindings) = store::load_index(database).await?;
    Ok(IndexViews::build(entries, bindings, now_millis()))
}

pub struct SourceIndexer {
    database: DatabaseConnection,
    classifier: Arc<Classifier>,
    sources: Vec<SourceConfig>,
    fetcher: SourceFetcher,
    config: IndexerConfig,
    views: ViewStore,
}

impl SourceIndexer {
    pub fn new(
        database: DatabaseConnection,
        classifier: Arc<Classifier>,
        sources: Vec<SourceConfig>,
        config: IndexerConfig,
        views: ViewStore,
    ) -> Result<Self> {
        let fetcher = SourceFetcher::new(config.fetch_timeout())?;
        Ok(Self {
            database,
            classifier,
            sources,
            fetcher,
            config,
            views,
        })
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(sources = self.sources.len(), "Starting source indexer loop");
        let initial = rebuild_views(&self.database)
            .await
            .context("Failed to load lookup views")?;
        self.views.replace(initial).await;
        self.tick().await?;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Indexer shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Shutdown channel closed unexpectedly. Exiting indexer loop");
                            break;
                        }
                    }
                }
                _ = sleep(self.config.poll_interval()) => {
                    self.tick().await?;
                }
            }
        }

        Ok(())
    }

    pub async fn tick(&self) -> Result<ImportReport> {
        let mut files = Vec::with_capacity(self.sources.len());
        let mut fetch_failures = Vec::new();
        for source in &self.sources {
            match self.fetcher.fetch(source).await {
                Ok(file) => files.push(file),
                Err(err) => {
                    warn!(source = %source.name, "Source fetch failed: {err:#}");
                    let err = ImportSourceError::Fetch {
                        source_name: source.name.clone(),
                        reason: format!("{err:#}"),
                    };
                    fetch_failures.push(SourceOutcome::failed(&source.name, &err));
                }
            }
        }

        let mut report = import_sources(&self.database, &self.classifier, &files).await;
        report.sources.extend(fetch_failures);

        let views = rebuild_views(&self.database)
            .await
            .context("Failed to rebuild lookup views")?;
        info!(
            entries = views.entry_count,
            addresses = views.by_address.len(),
            failed_sources = report.failed(),
            "Lookup views rebuilt"
        );
        self.views.replace(views).await;
        Ok(report)
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coins::default_coins;
    use crate::config::SourceKind;
    use crate::entities::entry;
    use crate::test_support::{memory_database, name_config};
    use sea_orm::ActiveValue::Set;
    use sea_orm::{ActiveModelTrait, EntityTrait, IntoActiveModel};

    const BLACKLIST_V1: &str = "\
- name: myetherwallet-login.com
  category: Phishing
  subcategory: MyEtherWallet
  reporter: MyCrypto
  addresses:
    - '0x742d35cc6634c0532925a3b844bc454e4438f44e'
    - '0xd8da6bf26964af9d7eed9e03e53415d37aa96045'
- url: http://sites.google.com/view/free-eth
  category: Scamming
  addresses: ['0x1111111111111111111111111111111111111111']
";

    const WHITELIST: &str = "\
- name: mycrypto.com
  featured: true
- name: ethereum.org
  featured: true
";

    fn classifier() -> Classifier {
        Classifier::new(&default_coins(), &name_config()).unwrap()
    }

    fn file(name: &str, kind: SourceKind, text: &str) -> SourceFile {
        SourceFile {
            name: name.to_string(),
            kind,
            bytes: text.as_bytes().to_vec(),
        }
    }

    async fn all_entries(db: &DatabaseConnection) -> Vec<entry::Model> {
        entry::Entity::find().all(db).await.unwrap()
    }

    #[tokio::test]
    async fn first_import_creates_entries_and_bindings() {
        let db = memory_database().await;
        let report = import_sources(
            &db,
            &classifier(),
            &[
                file("whitelist", SourceKind::Allowlist, WHITELIST),
                file("blacklist", SourceKind::Blocklist, BLACKLIST_V1),
            ],
        )
        .await;

        // Blocklist sources are imported first regardless of input order.
        assert_eq!(report.sources[0].source, "blacklist");
        let blacklist = report.outcome("blacklist").unwrap();
        assert_eq!(blacklist.status, SourceStatus::Imported);
        assert_eq!(blacklist.entries_inserted, 2);
        assert_eq!(blacklist.bindings_inserted, 3);
        assert_eq!(report.outcome("whitelist").unwrap().entries_inserted, 2);

        let views = rebuild_views(&db).await.unwrap();
        assert_eq!(views.entry_count, 4);
        assert_eq!(views.featured.len(), 2);
        assert_eq!(views.hostname_entries("sites.google.com")[0].path_scope, "path");
        assert_eq!(
            views.address_hits("0x742D35CC6634C0532925A3B844BC454E4438F44E")[0].coin,
            "ETH"
        );
    }

    #[tokio::test]
    async fn identical_reimport_performs_no_writes() {
        let db = memory_database().await;
        let sources = [file("blacklist", SourceKind::Blocklist, BLACKLIST_V1)];
        import_sources(&db, &classifier(), &sources).await;
        let entries_before = all_entries(&db).await;
        let checksum_before = store::get_checksum(&db, "blacklist").await.unwrap();

        let report = import_sources(&db, &classifier(), &sources).await;
        let outcome = report.outcome("blacklist").unwrap();
        assert_eq!(outcome.status, SourceStatus::Unchanged);
        assert_eq!(outcome.writes(), 0);
        assert_eq!(all_entries(&db).await, entries_before);
        assert_eq!(store::get_checksum(&db, "blacklist").await.unwrap(), checksum_before);
    }

    #[tokio::test]
    async fn dropped_address_deletes_only_that_binding() {
        let db = memory_database().await;
        import_sources(
            &db,
            &classifier(),
            &[file("blacklist", SourceKind::Blocklist, BLACKLIST_V1)],
        )
        .await;

        let v2 = BLACKLIST_V1.replace("    - '0xd8da6bf26964af9d7eed9e03e53415d37aa96045'\n", "");
        let report = import_sources(
            &db,
            &classifier(),
            &[file("blacklist", SourceKind::Blocklist, &v2)],
        )
        .await;
        let outcome = report.outcome("blacklist").unwrap();
        assert_eq!(outcome.status, SourceStatus::Imported);
        assert_eq!(outcome.bindings_deleted, 1);
        assert_eq!(outcome.bindings_inserted, 0);
        assert_eq!(outcome.entries_updated, 0);

        let views = rebuild_views(&db).await.unwrap();
        assert!(views.address_hits("0xd8da6bf26964af9d7eed9e03e53415d37aa96045").is_empty());
        assert_eq!(views.address_hits("0x742d35cc6634c0532925a3b844bc454e4438f44e").len(), 1);
        assert_eq!(views.address_hits("0x1111111111111111111111111111111111111111").len(), 1);
    }

    #[tokio::test]
    async fn parse_failure_is_isolated_and_retried() {
        let db = memory_database().await;
        let report = import_sources(
            &db,
            &classifier(),
            &[
                file("blacklist", SourceKind::Blocklist, "- name: [unclosed"),
                file("whitelist", SourceKind::Allowlist, WHITELIST),
            ],
        )
        .await;
        assert_eq!(report.outcome("blacklist").unwrap().status, SourceStatus::Failed);
        assert_eq!(report.outcome("whitelist").unwrap().status, SourceStatus::Imported);
        assert!(store::get_checksum(&db, "blacklist").await.unwrap().is_none());
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn reimport_keeps_liveness_fields() {
        let db = memory_database().await;
        import_sources(
            &db,
            &classifier(),
            &[file("blacklist", SourceKind::Blocklist, BLACKLIST_V1)],
        )
        .await;

        let id = crate::entry::entry_id("http://myetherwallet-login.com");
        let mut live = store::get_entry(&db, &id)
            .await
            .unwrap()
            .unwrap()
            .into_active_model();
        live.ip = Set(Some("104.27.168.171".to_string()));
        live.status = Set(Some("Active".to_string()));
        live.status_code = Set(Some(200));
        live.update(&db).await.unwrap();

        let v2 = BLACKLIST_V1.replace("subcategory: MyEtherWallet", "subcategory: MyCrypto");
        let report = import_sources(
            &db,
            &classifier(),
            &[file("blacklist", SourceKind::Blocklist, &v2)],
        )
        .await;
        assert_eq!(report.outcome("blacklist").unwrap().entries_updated, 1);

        let stored = store::get_entry(&db, &id).await.unwrap().unwrap();
        assert_eq!(stored.subcategory.as_deref(), Some("MyCrypto"));
        assert_eq!(stored.ip.as_deref(), Some("104.27.168.171"));
        assert_eq!(stored.status.as_deref(), Some("Active"));
        assert_eq!(stored.status_code, Some(200));

        let views = rebuild_views(&db).await.unwrap();
        assert_eq!(views.ip_entries("104.27.168.171")[0].id, id);
    }
}
