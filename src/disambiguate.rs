//! Picks one chain for an address whose format matches several coins.
//!
//! Every candidate's explorer is queried concurrently and all lookups are
//! awaited. The largest balance wins, ties go to the first coin in configured
//! order. When some explorers fail, the pick among the remaining ones carries
//! a caveat. When every explorer fails nothing is guessed.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use moka::future::Cache;
use serde::Serialize;
use tracing::{debug, warn};

use crate::balance::BalanceLookup;
use crate::coins::CoinDescriptor;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub coin: String,
    /// Absent when the address had a single candidate and no lookup ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    /// Set when the pick was made without every explorer answering
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caveat: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisambiguationError {
    #[error("no candidate coins for {address}")]
    NoCandidates { address: String },
    #[error("coin {ticker} is not configured")]
    UnknownCoin { ticker: String },
    #[error("balance lookup unavailable for {address} on {}", .coins.join(", "))]
    Unavailable { address: String, coins: Vec<String> },
}

pub struct Disambiguator {
    lookup: Arc<dyn BalanceLookup>,
    coins: Vec<CoinDescriptor>,
    timeout: Duration,
    cache: Option<Cache<String, Resolution>>,
}

impl Disambiguator {
    pub fn new(lookup: Arc<dyn BalanceLookup>, coins: Vec<CoinDescriptor>, timeout: Duration) -> Self {
        assert!(!coins.is_empty(), "Disambiguator requires configured coins");
        assert!(
            timeout >= Duration::from_millis(1),
            "Balance lookup timeout must be positive"
        );
        Self {
            lookup,
            coins,
            timeout,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Cache<String, Resolution>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn disambiguate(
        &self,
        address: &str,
        candidates: &[String],
    ) -> Result<Resolution, DisambiguationError> {
        let ordered = self.ordered_candidates(address, candidates)?;
        if ordered.len() == 1 {
            return Ok(Resolution {
                coin: ordered[0].ticker.clone(),
                balance: None,
                caveat: None,
            });
        }

        let cache_key = format!(
            "{}|{}",
            address.to_ascii_lowercase(),
            ordered
                .iter()
                .map(|coin| coin.ticker.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&cache_key).await {
                debug!(%address, coin = %hit.coin, "Disambiguation cache hit");
                return Ok(hit);
            }
        }

        let lookups = ordered.iter().map(|coin| async move {
            match tokio::time::timeout(self.timeout, self.lookup.lookup_balance(address, coin)).await
            {
                Ok(Ok(balance)) => Some(balance),
                Ok(Err(err)) => {
                    warn!(coin = %coin.ticker, %address, "Balance lookup failed: {err:#}");
                    None
                }
                Err(_) => {
                    warn!(coin = %coin.ticker, %address, "Balance lookup timed out");
                    None
                }
            }
        });
        let results = join_all(lookups).await;
        assert_eq!(results.len(), ordered.len(), "Every candidate must report");

        let mut best: Option<(usize, f64)> = None;
        let mut failed = Vec::new();
        for (index, result) in results.iter().enumerate() {
            match result {
                Some(balance) => {
                    // Strictly greater keeps the earliest coin on ties.
                    if best.is_none_or(|(_, top)| *balance > top) {
                        best = Some((index, *balance));
                    }
                }
                None => failed.push(ordered[index].ticker.clone()),
            }
        }

        let Some((index, balance)) = best else {
            return Err(DisambiguationError::Unavailable {
                address: address.to_string(),
                coins: failed,
            });
        };

        let caveat = (!failed.is_empty()).then(|| {
            format!(
                "balance lookup failed for {}; {} was chosen without confirmation",
                failed.join(", "),
                ordered[index].ticker
            )
        });
        let resolution = Resolution {
            coin: ordered[index].ticker.clone(),
            balance: Some(balance),
            caveat,
        };

        if let (Some(cache), None) = (&self.cache, &resolution.caveat) {
            cache.insert(cache_key, resolution.clone()).await;
        }
        Ok(resolution)
    }

    /// Candidates restricted to configured coins, in configured order.
    fn ordered_candidates(
        &self,
        address: &str,
        candidates: &[String],
    ) -> Result<Vec<&CoinDescriptor>, DisambiguationError> {
        if candidates.is_empty() {
            return Err(DisambiguationError::NoCandidates {
                address: address.to_string(),
            });
        }
        for ticker in candidates {
            if !self
                .coins
                .iter()
                .any(|coin| coin.ticker.eq_ignore_ascii_case(ticker))
            {
                return Err(DisambiguationError::UnknownCoin {
                    ticker: ticker.clone(),
                });
            }
        }
        Ok(self
            .coins
            .iter()
            .filter(|coin| {
                candidates
                    .iter()
                    .any(|ticker| coin.ticker.eq_ignore_ascii_case(ticker))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coins::default_coins;
    use crate::test_support::StubBalances;

    const EVM: &str = "0x742d35cc6634c0532925a3b844bc454e4438f44e";

    fn evm_candidates() -> Vec<String> {
        vec!["ETH".to_string(), "ETC".to_string()]
    }

    fn disambiguator(stub: Arc<StubBalances>) -> Disambiguator {
        Disambiguator::new(stub, default_coins(), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn larger_balance_wins() {
        let stub = Arc::new(StubBalances::with(&[("ETH", 10.0), ("ETC", 0.0)]));
        let resolution = disambiguator(stub.clone())
            .disambiguate(EVM, &evm_candidates())
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution {
                coin: "ETH".to_string(),
                balance: Some(10.0),
                caveat: None,
            }
        );
        assert_eq!(stub.calls(), 2);

        let stub = Arc::new(StubBalances::with(&[("ETH", 0.5), ("ETC", 3.0)]));
        let resolution = disambiguator(stub)
            .disambiguate(EVM, &evm_candidates())
            .await
            .unwrap();
        assert_eq!(resolution.coin, "ETC");
    }

    #[tokio::test]
    async fn ties_go_to_configured_order() {
        for balance in [0.0, 7.25] {
            let stub = Arc::new(StubBalances::with(&[("ETH", balance), ("ETC", balance)]));
            // Caller order does not matter, configured order does.
            let reversed = vec!["ETC".to_string(), "ETH".to_string()];
            let resolution = disambiguator(stub)
                .disambiguate(EVM, &reversed)
                .await
                .unwrap();
            assert_eq!(resolution.coin, "ETH");
        }
    }

    #[tokio::test]
    async fn one_failure_picks_the_other_with_caveat() {
        let stub = Arc::new(StubBalances::with(&[("ETC", 0.0)]));
        let resolution = disambiguator(stub)
            .disambiguate(EVM, &evm_candidates())
            .await
            .unwrap();
        assert_eq!(resolution.coin, "ETC");
        assert_eq!(resolution.balance, Some(0.0));
        assert!(resolution.caveat.as_deref().unwrap().contains("ETH"));
    }

    #[tokio::test]
    async fn timeout_counts_as_failure_not_zero() {
        let mut stub = StubBalances::with(&[("BTC", 1.0), ("BCH", 0.0)]);
        stub.delays_ms.insert("BTC".to_string(), 5_000);
        let resolution = disambiguator(Arc::new(stub))
            .disambiguate(
                "1BoatSLRHtKNngkdXEeobR76b53LETtpyT",
                &["BTC".to_string(), "BCH".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(resolution.coin, "BCH");
        assert!(resolution.caveat.is_some());
    }

    #[tokio::test]
    async fn all_failures_are_an_error() {
        let stub = Arc::new(StubBalances::default());
        let err = disambiguator(stub)
            .disambiguate(EVM, &evm_candidates())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DisambiguationError::Unavailable {
                address: EVM.to_string(),
                coins: evm_candidates(),
            }
        );
    }

    #[tokio::test]
    async fn single_candidate_skips_lookup() {
        let stub = Arc::new(StubBalances::default());
        let resolution = disambiguator(stub.clone())
            .disambiguate("LQ3B36Yv2rBTxdgAdYpU2UcEZsaNwXeATk", &["LTC".to_string()])
            .await
            .unwrap();
        assert_eq!(resolution.coin, "LTC");
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn confirmed_results_are_cached() {
        let stub = Arc::new(StubBalances::with(&[("ETH", 1.0), ("ETC", 2.0)]));
        let cached = disambiguator(stub.clone()).with_cache(Cache::new(16));
        for _ in 0..3 {
            let resolution = cached.disambiguate(EVM, &evm_candidates()).await.unwrap();
            assert_eq!(resolution.coin, "ETC");
        }
        assert_eq!(stub.calls(), 2);
    }
}
