//! Report intake and the fork, commit, pull request, cleanup pipeline that
//! carries a report to the upstream blocklist repository.

pub mod queue;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::classify::Classifier;
use crate::config::SubmissionConfig;
use crate::entry::{EntryKind, strip_scheme};
use crate::indexer::{now_millis, store};
use crate::models::report::{DrainSummary, ReportRequest, SubmitResponse};

const COMMIT_MESSAGE: &str = "Added a new entry";
const REQUEST_TITLE: &str = "Added a new entry";
const REQUEST_BODY: &str = "Added a new entry from the scamdb-api report endpoint";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandType {
    Add,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCommand {
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub data: ReportData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    pub reporter: String,
}

/// Case-insensitive identity of a report for duplicate detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportKeys {
    pub url: Option<String>,
    pub name: Option<String>,
    pub addresses: Vec<String>,
}

impl ReportKeys {
    pub fn overlaps(&self, other: &ReportKeys) -> bool {
        let same = |a: &Option<String>, b: &Option<String>| matches!((a, b), (Some(a), Some(b)) if a == b);
        same(&self.url, &other.url)
            || same(&self.name, &other.name)
            || self
                .addresses
                .iter()
                .any(|address| other.addresses.contains(address))
    }
}

impl ReportCommand {
    /// Scheme and `www.` are dropped from the name, a missing url or name is
    /// filled in from the other, and the coin is inferred from the first address.
    /// `reporter` is the owner of the API key the report arrived with.
    pub fn from_request(
        request: ReportRequest,
        reporter: &str,
        classifier: &Classifier,
    ) -> Result<Self, SubmissionError> {
        let addresses: Vec<String> = request
            .addresses
            .map(|list| list.into_vec())
            .unwrap_or_default()
            .into_iter()
            .map(|address| address.trim().to_string())
            .filter(|address| !address.is_empty())
            .collect();

        let (name, url) = match (non_empty(request.name), non_empty(request.url)) {
            (Some(name), Some(url)) => {
                let url = format!("http://{}", bare_host(&url));
                (Some(bare_host(&name).to_string()), Some(url))
            }
            (Some(name), None) => {
                let name = bare_host(&name).to_string();
                let url = format!("http://{name}");
                (Some(name), Some(url))
            }
            (None, Some(url)) => {
                let url = drop_www(&url);
                (Some(strip_scheme(&url).to_string()), Some(url))
            }
            (None, None) => (None, None),
        };
        if name.is_none() && addresses.is_empty() {
            return Err(SubmissionError::InvalidReport {
                reason: "reports must contain an addresses, name, or url field".to_string(),
            });
        }

        let coin = non_empty(request.coin)
            .map(|coin| coin.to_ascii_uppercase())
            .or_else(|| {
                addresses
                    .first()
                    .and_then(|address| classifier.candidates(address).into_iter().next())
            });

        Ok(Self {
            command_type: CommandType::Add,
            data: ReportData {
                name,
                url,
                category: non_empty(request.category),
                subcategory: non_empty(request.subcategory),
                description: non_empty(request.description),
                coin,
                addresses,
                reporter: reporter.to_string(),
            },
        })
    }

    pub fn keys(&self) -> ReportKeys {
        let mut addresses: Vec<String> = self
            .data
            .addresses
            .iter()
            .map(|address| address.to_ascii_lowercase())
            .collect();
        addresses.sort();
        addresses.dedup();
        ReportKeys {
            url: self.data.url.as_ref().map(|url| url.to_ascii_lowercase()),
            name: self.data.name.as_ref().map(|name| name.to_ascii_lowercase()),
            addresses,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn bare_host(value: &str) -> &str {
    let value = strip_scheme(value);
    value.strip_prefix("www.").unwrap_or(value)
}

fn drop_www(url: &str) -> String {
    let url = url.trim();
    match url.split_once("://") {
        Some((scheme, rest)) => format!("{scheme}://{}", rest.strip_prefix("www.").unwrap_or(rest)),
        None => url.strip_prefix("www.").unwrap_or(url).to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Queued,
    Forking,
    Forked,
    Committing,
    Committed,
    OpeningRequest,
    Open,
    CleaningUp,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DuplicateReason {
    AlreadyQueued { report_id: i32 },
    AlreadyBlocked { entry_id: String },
    AlreadyAllowlisted { entry_id: String },
}

impl std::fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicateReason::AlreadyQueued { report_id } => {
                write!(f, "duplicate entry already exists in the report queue (report {report_id})")
            }
            DuplicateReason::AlreadyBlocked { entry_id } => {
                write!(f, "entry already exists in the blocklist (entry {entry_id})")
            }
            DuplicateReason::AlreadyAllowlisted { entry_id } => {
                write!(f, "entry already exists in the allowlist (entry {entry_id})")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("invalid report: {reason}")]
    InvalidReport { reason: String },
    #[error("{0}")]
    Duplicate(DuplicateReason),
    #[error("report submission is disabled")]
    Disabled,
    #[error("submission failed while {state:?}: {source:#}")]
    Failed {
        state: PipelineState,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Code-hosting service that accepts contributions through forks.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Returns as soon as the host has accepted the fork request; the fork
    /// may not be usable until `ForkHandle::wait_until_ready` succeeds.
    async fn fork_repo(&self, upstream: &str) -> anyhow::Result<Box<dyn ForkHandle>>;
}

#[async_trait]
pub trait ForkHandle: Send + Sync {
    fn full_name(&self) -> &str;
    async fn wait_until_ready(&self) -> anyhow::Result<()>;
    async fn write_file(&self, path: &str, message: &str, content: &str) -> anyhow::Result<()>;
    /// Opens a pull request against `base` and returns its URL when the host reports one.
    async fn open_request(&self, title: &str, body: &str, base: &str) -> anyhow::Result<Option<String>>;
    async fn delete(&self) -> anyhow::Result<()>;
}

pub struct SubmissionPipeline {
    database: DatabaseConnection,
    host: Arc<dyn RepoHost>,
    config: SubmissionConfig,
    // Held across the duplicate check and the enqueue.
    intake: Mutex<()>,
    // Held for a whole pipeline run; at most one fork exists at a time.
    running: Mutex<()>,
}

/// Result of taking one report through the run lock.
enum Attempt {
    Submitted(Option<String>),
    /// Another run already submitted the report.
    AlreadySubmitted(Option<String>),
}

impl SubmissionPipeline {
    pub fn new(database: DatabaseConnection, host: Arc<dyn RepoHost>, config: SubmissionConfig) -> Self {
        assert!(!config.upstream.is_empty(), "Upstream repository must be configured");
        assert!(!config.file_path.is_empty(), "Command file path must be configured");
        Self {
            database,
            host,
            config,
            intake: Mutex::new(()),
            running: Mutex::new(()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Owner of a configured API key.
    pub fn reporter_for(&self, api_key: &str) -> Option<&str> {
        self.config.key_owner(api_key)
    }

    /// Duplicate check, enqueue, then one pipeline run. A failed run leaves
    /// the report queued for the next drain.
    pub async fn submit(&self, command: ReportCommand) -> Result<SubmitResponse, SubmissionError> {
        if !self.config.enabled {
            return Err(SubmissionError::Disabled);
        }
        let report = {
            let _intake = self.intake.lock().await;
            self.check_duplicate(&command).await?;
            queue::enqueue_report(&self.database, &command, now_millis()).await?
        };
        info!(report_id = report.id, "Report queued");

        let url = match self.attempt(report.id, &command).await? {
            Attempt::Submitted(url) | Attempt::AlreadySubmitted(url) => url,
        };
        Ok(SubmitResponse {
            success: true,
            report_id: report.id,
            url,
        })
    }

    /// Runs every queued or previously failed report through the pipeline.
    pub async fn drain(&self) -> Result<DrainSummary, SubmissionError> {
        let pending = queue::list_pending_reports(&self.database).await?;
        let mut summary = DrainSummary {
            attempted: 0,
            submitted: 0,
            failed: 0,
        };
        for report in pending {
            let command = match queue::decode_command(&report) {
                Ok(command) => command,
                Err(err) => {
                    error!(report_id = report.id, "Skipping undecodable report: {err}");
                    queue::record_failure(&self.database, report.id, &err.to_string(), now_millis())
                        .await?;
                    summary.attempted += 1;
                    summary.failed += 1;
                    continue;
                }
            };
            match self.attempt(report.id, &command).await {
                Ok(Attempt::Submitted(_)) => {
                    summary.attempted += 1;
                    summary.submitted += 1;
                }
                Ok(Attempt::AlreadySubmitted(_)) => {}
                Err(SubmissionError::Database(err)) => return Err(SubmissionError::Database(err)),
                Err(err) => {
                    warn!(report_id = report.id, "Queued report still pending: {err:#}");
                    summary.attempted += 1;
                    summary.failed += 1;
                }
            }
        }
        if summary.attempted > 0 {
            info!(
                attempted = summary.attempted,
                submitted = summary.submitted,
                failed = summary.failed,
                "Report queue drained"
            );
        }
        Ok(summary)
    }

    async fn check_duplicate(&self, command: &ReportCommand) -> Result<(), SubmissionError> {
        let keys = command.keys();
        if let Some(existing) = queue::find_duplicate(&self.database, &keys).await? {
            return Err(SubmissionError::Duplicate(DuplicateReason::AlreadyQueued {
                report_id: existing.id,
            }));
        }

        let mut entries = store::find_entries_matching(
            &self.database,
            command.data.url.as_deref(),
            command.data.name.as_deref(),
        )
        .await?;
        let bindings = store::find_bindings_for_addresses(&self.database, &command.data.addresses).await?;
        for binding in bindings {
            if !entries.iter().any(|entry| entry.id == binding.entry_id) {
                if let Some(entry) = store::get_entry(&self.database, &binding.entry_id).await? {
                    entries.push(entry);
                }
            }
        }

        // Allowlisted conflicts are reported first since they are the stronger signal.
        if let Some(entry) = entries
            .iter()
            .find(|entry| EntryKind::parse(&entry.kind) == Some(EntryKind::Verified))
        {
            return Err(SubmissionError::Duplicate(DuplicateReason::AlreadyAllowlisted {
                entry_id: entry.id.clone(),
            }));
        }
        if let Some(entry) = entries.first() {
            return Err(SubmissionError::Duplicate(DuplicateReason::AlreadyBlocked {
                entry_id: entry.id.clone(),
            }));
        }
        Ok(())
    }

    /// Runs the pipeline for a report unless a run that held the lock
    /// before this one already submitted it.
    async fn attempt(&self, report_id: i32, command: &ReportCommand) -> Result<Attempt, SubmissionError> {
        let _guard = self.running.lock().await;
        let Some(report) = queue::get_report(&self.database, report_id).await? else {
            return Err(DbErr::RecordNotFound(format!("pending report {report_id}")).into());
        };
        if !queue::is_pending(&report) {
            debug!(report_id, status = %report.status, "Report already submitted");
            return Ok(Attempt::AlreadySubmitted(report.request_url));
        }

        match self.run_pipeline(report_id, command).await {
            Ok(url) => {
                queue::dequeue_report(&self.database, report_id, url.clone(), now_millis()).await?;
                info!(report_id, url = url.as_deref().unwrap_or("-"), "Report submitted");
                Ok(Attempt::Submitted(url))
            }
            Err(err) => {
                let message = format!("{err:#}");
                queue::record_failure(&self.database, report_id, &message, now_millis()).await?;
                Err(err)
            }
        }
    }

    async fn run_pipeline(&self, report_id: i32, command: &ReportCommand) -> Result<Option<String>, SubmissionError> {
        let deadline = Instant::now() + self.config.run_timeout();
        let content = serde_yaml::to_string(command).map_err(|err| SubmissionError::Failed {
            state: PipelineState::Queued,
            source: anyhow!(err).context("Failed to serialize report command"),
        })?;

        let mut state = PipelineState::Queued;
        advance(&mut state, PipelineState::Forking, report_id);
        let fork = match within(deadline, self.host.fork_repo(&self.config.upstream)).await {
            Ok(fork) => fork,
            Err(source) => {
                let failed_in = state;
                advance(&mut state, PipelineState::Failed, report_id);
                return Err(SubmissionError::Failed {
                    state: failed_in,
                    source,
                });
            }
        };

        // Cleanup runs for every fork the host accepted, ready or not.
        let outcome = self
            .publish(fork.as_ref(), &content, deadline, &mut state, report_id)
            .await;

        let failed_in = state;
        advance(&mut state, PipelineState::CleaningUp, report_id);
        if let Err(err) = fork.delete().await {
            warn!(report_id, fork = fork.full_name(), "Fork cleanup failed: {err:#}");
        }

        match outcome {
            Ok(url) => {
                advance(&mut state, PipelineState::Done, report_id);
                Ok(url)
            }
            Err(source) => {
                advance(&mut state, PipelineState::Failed, report_id);
                Err(SubmissionError::Failed {
                    state: failed_in,
                    source,
                })
            }
        }
    }

    async fn publish(
        &self,
        fork: &dyn ForkHandle,
        content: &str,
        deadline: Instant,
        state: &mut PipelineState,
        report_id: i32,
    ) -> anyhow::Result<Option<String>> {
        within(deadline, fork.wait_until_ready()).await?;
        advance(state, PipelineState::Forked, report_id);

        advance(state, PipelineState::Committing, report_id);
        within(
            deadline,
            fork.write_file(&self.config.file_path, COMMIT_MESSAGE, content),
        )
        .await?;
        advance(state, PipelineState::Committed, report_id);

        advance(state, PipelineState::OpeningRequest, report_id);
        let url = within(
            deadline,
            fork.open_request(REQUEST_TITLE, REQUEST_BODY, &self.config.base_branch),
        )
        .await?;
        advance(state, PipelineState::Open, report_id);
        Ok(url)
    }
}

fn advance(state: &mut PipelineState, next: PipelineState, report_id: i32) {
    assert!(
        !state.is_terminal(),
        "Pipeline cannot leave terminal state {state:?}"
    );
    debug!(report_id, from = ?state, to = ?next, "Pipeline transition");
    *state = next;
}

async fn within<T>(
    deadline: Instant,
    step: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match timeout_at(deadline, step).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("submission run exceeded its deadline")),
    }
}

/// Drains the queue on a fixed interval until shutdown.
pub async fn run_drain_loop(
    pipeline: Arc<SubmissionPipeline>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!("Starting report drain loop");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                match changed {
                    Ok(_) => {
                        if *shutdown.borrow() {
                            info!("Report drain shutdown signal received");
                            break;
                        }
                    }
                    Err(_) => {
                        warn!("Shutdown channel closed unexpectedly. Exiting drain loop");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(interval) => {
                pipeline.drain().await?;
            }
        }
    }
    Ok(())
}
