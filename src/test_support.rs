//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use crate::balance::BalanceLookup;
use crate::coins::CoinDescriptor;
use crate::config::{ApiKeyConfig, NameServiceConfig, SubmissionConfig};
use crate::names::{NULL_ADDRESS, NameService};
use crate::reports::{ForkHandle, RepoHost};

pub fn name_config() -> NameServiceConfig {
    NameServiceConfig {
        rpc_url: "http://localhost:8545".to_string(),
        registry: "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e".to_string(),
        suffixes: vec!["eth".to_string(), "luxe".to_string(), "test".to_string()],
        min_label_len: 7,
        max_label_len: 100,
        request_timeout_ms: None,
    }
}

pub fn submission_config() -> SubmissionConfig {
    SubmissionConfig {
        enabled: true,
        upstream: "CryptoScamDB/blacklist".to_string(),
        base_branch: "master".to_string(),
        file_path: "commands/cmd.yaml".to_string(),
        api_base: "https://api.github.com".to_string(),
        token: Some("ghp_test".to_string()),
        drain_interval_ms: 600_000,
        run_timeout_ms: 1_000,
        request_timeout_ms: 1_000,
        api_keys: vec![ApiKeyConfig {
            key: "TestApiKey".to_string(),
            owner: "Tester".to_string(),
        }],
    }
}

/// Migrated in-memory SQLite. A single connection keeps every query on the same database.
pub async fn memory_database() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let database = Database::connect(options)
        .await
        .expect("in-memory sqlite connects");
    migration::Migrator::up(&database, None)
        .await
        .expect("migrations apply");
    database
}

/// Scripted balance per ticker; a missing ticker fails the lookup.
#[derive(Default)]
pub struct StubBalances {
    pub balances: HashMap<String, f64>,
    pub delays_ms: HashMap<String, u64>,
    pub calls: AtomicUsize,
}

impl StubBalances {
    pub fn with(entries: &[(&str, f64)]) -> Self {
        Self {
            balances: entries
                .iter()
                .map(|(ticker, balance)| (ticker.to_string(), *balance))
                .collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BalanceLookup for StubBalances {
    async fn lookup_balance(&self, _address: &str, coin: &CoinDescriptor) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays_ms.get(&coin.ticker) {
            tokio::time::sleep(std::time::Duration::from_millis(*delay)).await;
        }
        self.balances
            .get(&coin.ticker)
            .copied()
            .ok_or_else(|| anyhow!("explorer for {} unavailable", coin.ticker))
    }
}

/// Replays scripted answers in order, then keeps returning the null address.
pub struct StubNames {
    answers: Mutex<Vec<Result<String, String>>>,
    pub calls: AtomicUsize,
}

impl StubNames {
    pub fn new(answers: Vec<Result<String, String>>) -> Self {
        let mut answers = answers;
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_null() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NameService for StubNames {
    async fn resolve(&self, _name: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.answers.lock().expect("stub lock").pop();
        match next {
            Some(Ok(address)) => Ok(address),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(NULL_ADDRESS.to_string()),
        }
    }
}

/// Host that refuses every fork; reports stay queued.
pub struct OfflineHost;

#[async_trait]
impl RepoHost for OfflineHost {
    async fn fork_repo(&self, upstream: &str) -> Result<Box<dyn ForkHandle>> {
        Err(anyhow!("forking {upstream} is unavailable"))
    }
}
