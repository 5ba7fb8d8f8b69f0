//! Source documents: fetching raw bytes and turning rows into entry records.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::classify::Classifier;
use crate::config::{SourceConfig, SourceKind};
use crate::entry::{EntryKind, canonical_url, entry_id, hostname_of, path_scope, severity, strip_scheme};
use crate::indexer::store::EntryRecord;

const MAX_SOURCE_BYTES: usize = 64 * 1024 * 1024;
const UNKNOWN_COIN: &str = "UNKNOWN";

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub kind: SourceKind,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRow {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reporter: Option<String>,
    #[serde(default)]
    pub coin: Option<String>,
    #[serde(default)]
    pub featured: Option<bool>,
    #[serde(default)]
    pub addresses: Option<RowAddresses>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RowAddresses {
    One(String),
    List(Vec<String>),
    ByCoin(BTreeMap<String, Vec<String>>),
}

/// YAML list of rows; JSON parses too.
pub fn parse_rows(bytes: &[u8]) -> Result<Vec<SourceRow>, serde_yaml::Error> {
    let rows: Option<Vec<SourceRow>> = serde_yaml::from_slice(bytes)?;
    Ok(rows.unwrap_or_default())
}

impl SourceRow {
    /// `None` when the row names neither a url nor a host.
    pub fn into_record(self, kind: SourceKind, classifier: &Classifier) -> Option<EntryRecord> {
        let url = canonical_url(self.url.as_deref(), self.name.as_deref())?;
        let hostname = hostname_of(&url)?;
        let entry_kind = match kind {
            SourceKind::Allowlist => EntryKind::Verified,
            SourceKind::Blocklist | SourceKind::SupplementaryBlocklist => EntryKind::Blocked,
        };
        let scope = path_scope(&url);
        let category = clean(self.category);
        let coin = clean(self.coin).map(|coin| coin.to_ascii_uppercase());
        let name = clean(self.name)
            .map(|name| strip_scheme(&name).to_string())
            .unwrap_or_else(|| hostname.clone());

        let mut bindings = BTreeSet::new();
        match self.addresses {
            Some(RowAddresses::One(address)) => {
                push_binding(&mut bindings, address, coin.as_deref(), classifier)
            }
            Some(RowAddresses::List(addresses)) => {
                for address in addresses {
                    push_binding(&mut bindings, address, coin.as_deref(), classifier);
                }
            }
            Some(RowAddresses::ByCoin(by_coin)) => {
                for (ticker, addresses) in by_coin {
                    let ticker = ticker.trim().to_ascii_uppercase();
                    for address in addresses {
                        push_binding(&mut bindings, address, Some(&ticker), classifier);
                    }
                }
            }
            None => {}
        }

        Some(EntryRecord {
            id: entry_id(&url),
            kind: entry_kind,
            severity: severity(entry_kind, category.as_deref(), scope),
            path_scope: scope.to_string(),
            url,
            hostname,
            name,
            category,
            subcategory: clean(self.subcategory),
            description: clean(self.description),
            reporter: clean(self.reporter),
            coin,
            featured: entry_kind == EntryKind::Verified && self.featured.unwrap_or(false),
            bindings,
        })
    }
}

fn push_binding(
    bindings: &mut BTreeSet<(String, String)>,
    address: String,
    coin: Option<&str>,
    classifier: &Classifier,
) {
    let address = address.trim().to_string();
    if address.is_empty() {
        return;
    }
    let coin = coin
        .map(str::to_string)
        .or_else(|| classifier.candidates(&address).into_iter().next())
        .unwrap_or_else(|| UNKNOWN_COIN.to_string());
    bindings.insert((address, coin));
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Reads sources over HTTP(S) or from the local filesystem.
pub struct SourceFetcher {
    client: Client,
}

impl SourceFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("scamdb-api/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build source HTTP client")?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, source: &SourceConfig) -> Result<SourceFile> {
        let location = source.url.trim();
        let bytes = if location.starts_with("http://") || location.starts_with("https://") {
            let response = self
                .client
                .get(location)
                .send()
                .await
                .with_context(|| format!("Failed to fetch source {}", source.name))?
                .error_for_status()
                .with_context(|| format!("Source {} returned an error status", source.name))?;
            response
                .bytes()
                .await
                .with_context(|| format!("Failed to read source {}", source.name))?
                .to_vec()
        } else {
            tokio::fs::read(location)
                .await
                .with_context(|| format!("Failed to read source file {location}"))?
        };
        if bytes.len() > MAX_SOURCE_BYTES {
            bail!("Source {} exceeds {} bytes", source.name, MAX_SOURCE_BYTES);
        }
        Ok(SourceFile {
            name: source.name.clone(),
            kind: source.kind,
            bytes,
        })
    }
}
