//! Human-readable name resolution with one bounded retry on the null address.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde_json::json;
use sha3::{Digest, Keccak256};
use tracing::{debug, warn};

use crate::config::NameServiceConfig;

/// Address a name service returns for names it does not know.
pub const NULL_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

const RESOLVER_SELECTOR: &str = "0178b8bf";
const ADDR_SELECTOR: &str = "3b3b57de";

#[async_trait]
pub trait NameService: Send + Sync {
    /// One resolution attempt. The null address means "not registered".
    async fn resolve(&self, name: &str) -> Result<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("name {name} could not be resolved")]
    NotFound { name: String },
    #[error("name service unavailable for {name}")]
    Transport {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

pub struct NameResolver {
    service: Arc<dyn NameService>,
}

impl NameResolver {
    pub fn new(service: Arc<dyn NameService>) -> Self {
        Self { service }
    }

    /// At most two calls: the second only when the first returned the null address.
    pub async fn resolve_name(&self, name: &str) -> Result<String, NameError> {
        for attempt in 1..=2 {
            let address = self
                .service
                .resolve(name)
                .await
                .map_err(|source| NameError::Transport {
                    name: name.to_string(),
                    source,
                })?;
            if !is_null_address(&address) {
                debug!(%name, %address, attempt, "Name resolved");
                return Ok(address);
            }
            debug!(%name, attempt, "Name service returned the null address");
        }
        Err(NameError::NotFound {
            name: name.to_string(),
        })
    }
}

pub fn is_null_address(address: &str) -> bool {
    let trimmed = address.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NULL_ADDRESS)
}

/// EIP-137 namehash.
pub fn namehash(name: &str) -> [u8; 32] {
    let mut node = [0u8; 32];
    let normalized = name.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return node;
    }
    for label in normalized.rsplit('.') {
        let label_hash = Keccak256::digest(label.as_bytes());
        let mut hasher = Keccak256::new();
        hasher.update(node);
        hasher.update(label_hash);
        node.copy_from_slice(&hasher.finalize());
    }
    node
}

/// ENS lookup through `eth_call` against the registry and then the name's resolver.
#[derive(Clone)]
pub struct EnsClient {
    inner: HttpClient,
    registry: String,
}

impl EnsClient {
    pub fn new(config: &NameServiceConfig) -> Result<Self> {
        Self::with_timeout(&config.rpc_url, &config.registry, config.request_timeout())
    }

    pub fn with_timeout(endpoint: &str, registry: &str, timeout: Duration) -> Result<Self> {
        assert!(!endpoint.is_empty(), "RPC endpoint must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );
        if !is_hex_address(registry) {
            bail!("Invalid name registry address {registry}");
        }

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint)
            .with_context(|| format!("Failed to build RPC client for {endpoint}"))?;

        Ok(Self {
            inner: client,
            registry: registry.to_string(),
        })
    }

    async fn call_address(&self, to: &str, selector: &str, node: &[u8; 32]) -> Result<String> {
        let call = json!({
            "to": to,
            "data": format!("0x{selector}{}", hex::encode(node)),
        });
        let word: String = self
            .inner
            .request("eth_call", rpc_params![call, "latest"])
            .await
            .with_context(|| format!("RPC call eth_call to {to} failed"))?;
        address_from_word(&word)
    }
}

#[async_trait]
impl NameService for EnsClient {
    async fn resolve(&self, name: &str) -> Result<String> {
        let node = namehash(name);
        let resolver = self
            .call_address(&self.registry, RESOLVER_SELECTOR, &node)
            .await?;
        if is_null_address(&resolver) {
            warn!(%name, "No resolver registered");
            return Ok(NULL_ADDRESS.to_string());
        }
        self.call_address(&resolver, ADDR_SELECTOR, &node).await
    }
}

/// Last 20 bytes of a 32-byte ABI word; an empty return reads as the null address.
fn address_from_word(word: &str) -> Result<String> {
    let digits = word.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(NULL_ADDRESS.to_string());
    }
    if digits.len() < 64 {
        bail!("eth_call returned a short word: {word}");
    }
    let bytes = hex::decode(&digits[..64]).context("eth_call returned non-hex data")?;
    Ok(format!("0x{}", hex::encode(&bytes[12..32])))
}

fn is_hex_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|digits| digits.len() == 40 && digits.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubNames;

    #[test]
    fn namehash_matches_known_vectors() {
        assert_eq!(namehash(""), [0u8; 32]);
        assert_eq!(
            hex::encode(namehash("eth")),
            "93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae"
        );
        assert_eq!(
            hex::encode(namehash("foo.eth")),
            "de9b09fd7c5f901e23a3f19fecc54828e9c848539801e86591bd9801b019f84f"
        );
    }

    #[test]
    fn abi_word_decodes_to_address() {
        let word = "0x000000000000000000000000d8da6bf26964af9d7eed9e03e53415d37aa96045";
        assert_eq!(
            address_from_word(word).unwrap(),
            "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
        );
        assert_eq!(address_from_word("0x").unwrap(), NULL_ADDRESS);
        assert!(address_from_word("0x1234").is_err());
    }

    #[tokio::test]
    async fn double_null_is_not_found_after_two_calls() {
        let stub = Arc::new(StubNames::always_null());
        let resolver = NameResolver::new(stub.clone());
        let err = resolver.resolve_name("promocrypt.eth").await.unwrap_err();
        assert!(matches!(err, NameError::NotFound { .. }));
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn retry_recovers_from_one_null_answer() {
        let address = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045".to_string();
        let stub = Arc::new(StubNames::new(vec![
            Ok(NULL_ADDRESS.to_string()),
            Ok(address.clone()),
        ]));
        let resolver = NameResolver::new(stub.clone());
        assert_eq!(resolver.resolve_name("vitalik.eth").await.unwrap(), address);
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn transport_error_is_not_retried() {
        let stub = Arc::new(StubNames::new(vec![Err("connection refused".to_string())]));
        let resolver = NameResolver::new(stub.clone());
        let err = resolver.resolve_name("promocrypt.eth").await.unwrap_err();
        assert!(matches!(err, NameError::Transport { .. }));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn first_answer_wins_without_retry() {
        let stub = Arc::new(StubNames::new(vec![Ok(
            "0x742d35cc6634c0532925a3b844bc454e4438f44e".to_string(),
        )]));
        let resolver = NameResolver::new(stub.clone());
        assert!(resolver.resolve_name("mycryptowallet.eth").await.is_ok());
        assert_eq!(stub.calls(), 1);
    }
}
