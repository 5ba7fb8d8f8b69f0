//! Turns a search string into a verdict against the current index views.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::classify::{Classification, Classifier, ClassifyError};
use crate::disambiguate::{DisambiguationError, Disambiguator, Resolution};
use crate::entry::EntryKind;
use crate::indexer::views::{IndexViews, ViewStore};
use crate::models::entry::EntryView;
use crate::names::{NameError, NameResolver};

/// Names resolve to addresses on this chain.
const NAME_CHAIN: &str = "ETH";
const UNKNOWN_COIN: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Blocked,
    Allowlisted,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Address,
    Name,
    Domain,
    Ip,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub input: String,
    #[serde(rename = "type")]
    pub input_type: InputType,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin: Option<String>,
    /// The checked address; for names, the address the name resolved to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub entries: Vec<Arc<EntryView>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Invalid(#[from] ClassifyError),
    #[error("coin {coin} is not supported")]
    UnsupportedCoin { coin: String },
    #[error(transparent)]
    Ambiguous(#[from] DisambiguationError),
    #[error(transparent)]
    Name(#[from] NameError),
}

pub struct Checker {
    classifier: Arc<Classifier>,
    disambiguator: Disambiguator,
    names: NameResolver,
    views: ViewStore,
}

impl Checker {
    pub fn new(
        classifier: Arc<Classifier>,
        disambiguator: Disambiguator,
        names: NameResolver,
        views: ViewStore,
    ) -> Self {
        Self {
            classifier,
            disambiguator,
            names,
            views,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// With `coin` set the input is checked as an address of that coin and
    /// classification is skipped.
    pub async fn check(&self, input: &str, coin: Option<&str>) -> Result<CheckOutcome, CheckError> {
        let input = input.trim();
        let views = self.views.snapshot().await;

        if let Some(coin) = coin.map(str::trim).filter(|coin| !coin.is_empty()) {
            let coin = coin.to_ascii_uppercase();
            if !self.classifier.supports(&coin) {
                return Err(CheckError::UnsupportedCoin { coin });
            }
            return Ok(address_outcome(&views, input, InputType::Address, input, coin, None));
        }

        match self.classifier.classify(input)? {
            Classification::Address {
                address,
                candidates,
            } => {
                let resolution = self.disambiguator.disambiguate(&address, &candidates).await?;
                let coin = resolution.coin.clone();
                let resolution = (candidates.len() > 1).then_some(resolution);
                Ok(address_outcome(
                    &views,
                    input,
                    InputType::Address,
                    &address,
                    coin,
                    resolution,
                ))
            }
            Classification::Name { name } => {
                let address = self.names.resolve_name(&name).await?;
                debug!(%name, %address, "Checking resolved name");
                Ok(address_outcome(
                    &views,
                    input,
                    InputType::Name,
                    &address,
                    NAME_CHAIN.to_string(),
                    None,
                ))
            }
            Classification::Domain { hostname, .. } => {
                let entries = views.hostname_entries(&hostname).to_vec();
                Ok(CheckOutcome {
                    input: input.to_string(),
                    input_type: InputType::Domain,
                    verdict: verdict_for(&entries),
                    coin: None,
                    address: None,
                    resolution: None,
                    entries,
                })
            }
            Classification::Ip { address, .. } => {
                let entries = views.ip_entries(&address.to_string()).to_vec();
                Ok(CheckOutcome {
                    input: input.to_string(),
                    input_type: InputType::Ip,
                    verdict: verdict_for(&entries),
                    coin: None,
                    address: None,
                    resolution: None,
                    entries,
                })
            }
        }
    }
}

fn address_outcome(
    views: &IndexViews,
    input: &str,
    input_type: InputType,
    address: &str,
    coin: String,
    resolution: Option<Resolution>,
) -> CheckOutcome {
    let entries: Vec<Arc<EntryView>> = views
        .address_hits(address)
        .iter()
        .filter(|hit| hit.coin.eq_ignore_ascii_case(&coin) || hit.coin == UNKNOWN_COIN)
        .map(|hit| Arc::clone(&hit.entry))
        .collect();
    CheckOutcome {
        input: input.to_string(),
        input_type,
        verdict: verdict_for(&entries),
        coin: Some(coin),
        address: Some(address.to_string()),
        resolution,
        entries,
    }
}

/// Allowlisted wins over blocked.
pub fn verdict_for(entries: &[Arc<EntryView>]) -> Verdict {
    if entries.iter().any(|entry| entry.kind == EntryKind::Verified) {
        Verdict::Allowlisted
    } else if entries.iter().any(|entry| entry.kind == EntryKind::Blocked) {
        Verdict::Blocked
    } else {
        Verdict::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::coins::default_coins;
    use crate::entities::{address_binding, entry};
    use crate::test_support::{StubBalances, StubNames, name_config};

    const ADDRESS: &str = "0x742d35cc6634c0532925a3b844bc454e4438f44e";

    fn model(id: &str, kind: &str, hostname: &str) -> entry::Model {
        entry::Model {
            id: id.to_string(),
            kind: kind.to_string(),
            url: format!("http://{hostname}"),
            hostname: hostname.to_string(),
            name: hostname.to_string(),
            path_scope: "domain".to_string(),
            category: Some("Phishing".to_string()),
            subcategory: None,
            description: None,
            reporter: None,
            coin: None,
            severity: 4,
            featured: false,
            ip: Some("198.51.100.7".to_string()),
            status: None,
            status_code: None,
            checked_at: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    async fn checker(balances: StubBalances, names: StubNames) -> (Checker, Arc<StubNames>) {
        let views = ViewStore::default();
        views
            .replace(IndexViews::build(
                vec![
                    model("a1", "blocked", "fake-mew.com"),
                    model("b2", "verified", "mycrypto.com"),
                ],
                vec![address_binding::Model {
                    address: ADDRESS.to_string(),
                    entry_id: "a1".to_string(),
                    coin: "ETH".to_string(),
                    created_at: 1,
                }],
                1,
            ))
            .await;
        let classifier = Arc::new(Classifier::new(&default_coins(), &name_config()).unwrap());
        let names = Arc::new(names);
        let checker = Checker::new(
            classifier,
            Disambiguator::new(Arc::new(balances), default_coins(), Duration::from_millis(200)),
            NameResolver::new(names.clone()),
            views,
        );
        (checker, names)
    }

    #[tokio::test]
    async fn shared_evm_address_resolves_to_larger_balance() {
        let (checker, _) = checker(
            StubBalances::with(&[("ETH", 10.0), ("ETC", 0.0)]),
            StubNames::always_null(),
        )
        .await;
        let outcome = checker.check(ADDRESS, None).await.unwrap();
        assert_eq!(outcome.coin.as_deref(), Some("ETH"));
        let resolution = outcome.resolution.unwrap();
        assert_eq!(resolution.balance, Some(10.0));
        assert!(resolution.caveat.is_none());
        assert_eq!(outcome.verdict, Verdict::Blocked);
        assert_eq!(outcome.entries[0].id, "a1");
    }

    #[tokio::test]
    async fn unresolvable_name_is_a_name_failure() {
        let (checker, names) = checker(StubBalances::default(), StubNames::always_null()).await;
        let err = checker.check("promocrypt.eth", None).await.unwrap_err();
        assert!(matches!(err, CheckError::Name(NameError::NotFound { .. })));
        assert_eq!(names.calls(), 2);
    }

    #[tokio::test]
    async fn resolved_name_is_checked_as_eth_address() {
        let (checker, _) = checker(
            StubBalances::default(),
            StubNames::new(vec![Ok(ADDRESS.to_string())]),
        )
        .await;
        let outcome = checker.check("promocrypt.eth", None).await.unwrap();
        assert_eq!(outcome.input_type, InputType::Name);
        assert_eq!(outcome.address.as_deref(), Some(ADDRESS));
        assert_eq!(outcome.verdict, Verdict::Blocked);
    }

    #[tokio::test]
    async fn domains_and_ips_use_their_views() {
        let (checker, _) = checker(StubBalances::default(), StubNames::always_null()).await;
        let blocked = checker.check("https://www.fake-mew.com/login", None).await.unwrap();
        assert_eq!(blocked.input_type, InputType::Domain);
        assert_eq!(blocked.verdict, Verdict::Blocked);

        let allowed = checker.check("mycrypto.com", None).await.unwrap();
        assert_eq!(allowed.verdict, Verdict::Allowlisted);

        let unknown = checker.check("example.org", None).await.unwrap();
        assert_eq!(unknown.verdict, Verdict::Neutral);
        assert!(unknown.entries.is_empty());

        let ip = checker.check("198.51.100.7", None).await.unwrap();
        assert_eq!(ip.input_type, InputType::Ip);
        assert_eq!(ip.verdict, Verdict::Allowlisted);
    }

    #[tokio::test]
    async fn pinned_coin_skips_disambiguation() {
        let balances = StubBalances::default();
        let (checker, _) = checker(balances, StubNames::always_null()).await;
        let outcome = checker.check(ADDRESS, Some("etc")).await.unwrap();
        assert_eq!(outcome.coin.as_deref(), Some("ETC"));
        assert!(outcome.resolution.is_none());
        assert_eq!(outcome.verdict, Verdict::Neutral);

        let err = checker.check(ADDRESS, Some("DOGE")).await.unwrap_err();
        assert!(matches!(err, CheckError::UnsupportedCoin { .. }));
    }

    #[tokio::test]
    async fn garbage_input_is_rejected() {
        let (checker, _) = checker(StubBalances::default(), StubNames::always_null()).await;
        let err = checker.check("not an identifier", None).await.unwrap_err();
        assert!(matches!(err, CheckError::Invalid(ClassifyError::Unrecognized { .. })));
        let err = checker.check("abc.eth", None).await.unwrap_err();
        assert!(matches!(err, CheckError::Invalid(ClassifyError::InvalidName { .. })));
    }
}
