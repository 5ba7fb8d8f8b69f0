use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::coins::{CoinDescriptor, default_coins};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default = "default_coins")]
    pub coins: Vec<CoinDescriptor>,
    pub names: NameServiceConfig,
    #[serde(default)]
    pub balances: BalanceConfig,
    pub submission: SubmissionConfig,
    pub cache: CacheConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path = std::env::var("SCAMDB_API_CONFIG")
            .unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("SCAMDB_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        // Secrets such as the GitHub token come from SCAMDB_API__SUBMISSION__TOKEN
        builder = builder.add_source(
            Environment::with_prefix("SCAMDB_API")
                .prefix_separator("__")
                .separator("__"),
        );

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&mut self) -> Result<()> {
        assert!(
            !self.database.url.is_empty(),
            "Database URL must be specified"
        );
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        if self.coins.is_empty() {
            bail!("At least one coin descriptor must be configured");
        }
        for coin in &mut self.coins {
            coin.ticker = coin.ticker.trim().to_ascii_uppercase();
            if coin.ticker.is_empty() {
                bail!("Coin ticker cannot be empty");
            }
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() || source.url.trim().is_empty() {
                bail!("Source entries require both a name and a url");
            }
            if !seen.insert(source.name.as_str()) {
                bail!("Duplicate source name {}", source.name);
            }
        }
        if self.submission.enabled && self.submission.token.is_none() {
            bail!("Report submission is enabled but no GitHub token is configured");
        }
        if self.submission.enabled && self.submission.api_keys.is_empty() {
            bail!("Report submission is enabled but no API keys are configured");
        }
        for api_key in &self.submission.api_keys {
            if api_key.key.trim().is_empty() || api_key.owner.trim().is_empty() {
                bail!("submission.api_keys entries require both a key and an owner");
            }
        }
        self.indexer.ensure_bounds()?;
        self.names.ensure_bounds()?;
        self.cache.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    pub poll_interval_ms: u64,
    #[serde(default = "IndexerConfig::default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl IndexerConfig {
    pub fn poll_interval(&self) -> Duration {
        assert!(
            self.poll_interval_ms >= 1_000,
            "Poll interval must be >= 1 second"
        );
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn ensure_bounds(&self) -> Result<()> {
        if self.poll_interval_ms < 1_000 {
            bail!("indexer.poll_interval_ms must be at least 1000");
        }
        if !(100..=120_000).contains(&self.fetch_timeout_ms) {
            bail!("indexer.fetch_timeout_ms must be within 100..=120000");
        }
        Ok(())
    }

    const fn default_fetch_timeout_ms() -> u64 {
        30_000
    }
}

/// Kind of list a source file carries. Import order follows the variant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Blocklist,
    Allowlist,
    SupplementaryBlocklist,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// `http(s)://` URL or a local file path
    pub url: String,
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NameServiceConfig {
    pub rpc_url: String,
    #[serde(default = "NameServiceConfig::default_registry")]
    pub registry: String,
    #[serde(default = "NameServiceConfig::default_suffixes")]
    pub suffixes: Vec<String>,
    #[serde(default = "NameServiceConfig::default_min_label_len")]
    pub min_label_len: usize,
    #[serde(default = "NameServiceConfig::default_max_label_len")]
    pub max_label_len: usize,
    pub request_timeout_ms: Option<u64>,
}

impl NameServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(5_000);
        assert!(millis >= 100, "Name service timeout must be at least 100ms");
        assert!(
            millis <= 60_000,
            "Name service timeout cannot exceed 60 seconds"
        );
        Duration::from_millis(millis)
    }

    fn ensure_bounds(&self) -> Result<()> {
        if self.suffixes.is_empty() {
            bail!("names.suffixes must not be empty");
        }
        if self.min_label_len == 0 || self.min_label_len > self.max_label_len {
            bail!("names.min_label_len must be positive and <= names.max_label_len");
        }
        if let Some(millis) = self.request_timeout_ms {
            if !(100..=60_000).contains(&millis) {
                bail!("names.request_timeout_ms must be within 100..=60000");
            }
        }
        Ok(())
    }

    fn default_registry() -> String {
        "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e".to_string()
    }

    fn default_suffixes() -> Vec<String> {
        vec!["eth".to_string(), "luxe".to_string(), "test".to_string()]
    }

    const fn default_min_label_len() -> usize {
        7
    }

    const fn default_max_label_len() -> usize {
        100
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceConfig {
    pub request_timeout_ms: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
        }
    }
}

impl BalanceConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.clamp(100, 60_000);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    pub enabled: bool,
    #[serde(default = "SubmissionConfig::default_upstream")]
    pub upstream: String,
    #[serde(default = "SubmissionConfig::default_base_branch")]
    pub base_branch: String,
    #[serde(default = "SubmissionConfig::default_file_path")]
    pub file_path: String,
    #[serde(default = "SubmissionConfig::default_api_base")]
    pub api_base: String,
    pub token: Option<String>,
    #[serde(default = "SubmissionConfig::default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    #[serde(default = "SubmissionConfig::default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    #[serde(default = "SubmissionConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Keys accepted in the `x-api-key` header of `PUT /v1/report`
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    /// Recorded as the reporter of every report made with this key
    pub owner: String,
}

impl SubmissionConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1_000))
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms.max(1_000))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.clamp(100, 60_000))
    }

    pub fn key_owner(&self, key: &str) -> Option<&str> {
        self.api_keys
            .iter()
            .find(|api_key| api_key.key == key)
            .map(|api_key| api_key.owner.as_str())
    }

    fn default_upstream() -> String {
        "CryptoScamDB/blacklist".to_string()
    }

    fn default_base_branch() -> String {
        "master".to_string()
    }

    fn default_file_path() -> String {
        "commands/cmd.yaml".to_string()
    }

    fn default_api_base() -> String {
        "https://api.github.com".to_string()
    }

    const fn default_drain_interval_ms() -> u64 {
        600_000
    }

    const fn default_run_timeout_ms() -> u64 {
        120_000
    }

    const fn default_request_timeout_ms() -> u64 {
        15_000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub disambiguation_max_capacity: u64,
    pub disambiguation_ttl_seconds: u64,
}

impl CacheConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.disambiguation_max_capacity >= 10,
            "Disambiguation cache capacity must be at least 10"
        );
        assert!(
            self.disambiguation_ttl_seconds <= 86_400,
            "Disambiguation cache TTL cannot exceed one day"
        );
        Ok(())
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
