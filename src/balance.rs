//! Block-explorer balance lookups used to tell overlapping address formats apart.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::coins::CoinDescriptor;

#[async_trait]
pub trait BalanceLookup: Send + Sync {
    /// Balance of `address` on `coin`, in whole coins.
    async fn lookup_balance(&self, address: &str, coin: &CoinDescriptor) -> Result<f64>;
}

pub struct ExplorerClient {
    client: Client,
}

impl ExplorerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        assert!(
            timeout >= Duration::from_millis(100),
            "Explorer timeout below 100ms is unsafe"
        );
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("scamdb-api/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build explorer HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BalanceLookup for ExplorerClient {
    async fn lookup_balance(&self, address: &str, coin: &CoinDescriptor) -> Result<f64> {
        let url = coin.balance_url(address);
        debug!(coin = %coin.ticker, %url, "Querying explorer balance");
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("{} explorer request failed", coin.ticker))?
            .error_for_status()
            .with_context(|| format!("{} explorer returned an error status", coin.ticker))?
            .json()
            .await
            .with_context(|| format!("{} explorer returned malformed JSON", coin.ticker))?;

        let raw = extract_field(&body, &coin.balance_field)?;
        Ok(scale(raw, coin.decimals))
    }
}

/// Walks a dotted path and reads the value as a number, accepting numeric strings.
pub fn extract_field(body: &Value, path: &str) -> Result<f64> {
    let mut current = body;
    for segment in path.split('.').filter(|segment| !segment.is_empty()) {
        current = current
            .get(segment)
            .ok_or_else(|| anyhow!("balance field {path} missing at {segment}"))?;
    }
    let value = match current {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| anyhow!("balance field {path} is not representable"))?,
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .with_context(|| format!("balance field {path} is not numeric"))?,
        other => bail!("balance field {path} has unexpected type {other}"),
    };
    if !value.is_finite() || value < 0.0 {
        bail!("balance field {path} is out of range");
    }
    Ok(value)
}

fn scale(raw: f64, decimals: u32) -> f64 {
    raw / 10f64.powi(decimals as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_nested_numeric_and_string_fields() {
        let body = json!({"data": {"balance": 150000000}});
        assert_eq!(extract_field(&body, "data.balance").unwrap(), 150000000.0);

        let body = json!({"status": "1", "result": "2500000000000000000"});
        let raw = extract_field(&body, "result").unwrap();
        assert!((scale(raw, 18) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn malformed_bodies_are_errors() {
        assert!(extract_field(&json!({"result": "Invalid address"}), "result").is_err());
        assert!(extract_field(&json!({"data": null}), "data.balance").is_err());
        assert!(extract_field(&json!({"balance": [1]}), "balance").is_err());
        assert!(extract_field(&json!({"balance": -4}), "balance").is_err());
    }
}
