//! Ordered dispatch from a raw search string to its syntactic category.
//!
//! Rules are evaluated in a fixed priority: coin address patterns, name-service
//! names, domains, then IP literals. Patterns use the linear-time `regex` engine.

use std::net::{IpAddr, Ipv6Addr};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

use crate::coins::CoinDescriptor;
use crate::config::NameServiceConfig;
use crate::entry::hostname_of;

pub const MAX_INPUT_LEN: usize = 2048;

const DOMAIN_PATTERN: &str =
    r"(?i)^(?:[a-z][a-z0-9+.-]*://)?(?:[a-z0-9_-]+\.)+[a-z][a-z0-9-]{1,62}(?::[0-9]{1,5})?(?:[/?#][^\s]*)?$";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Classification {
    /// Matches one or more coin address formats, in configured coin order
    Address {
        address: String,
        candidates: Vec<String>,
    },
    Name {
        name: String,
    },
    Domain {
        input: String,
        hostname: String,
    },
    Ip {
        address: IpAddr,
        zone: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("invalid name {name}")]
    InvalidName { name: String },
    #[error("unsupported input type")]
    Unrecognized { input: String },
}

struct CoinPattern {
    ticker: String,
    pattern: Regex,
}

pub struct Classifier {
    coins: Vec<CoinPattern>,
    name_suffixes: Vec<String>,
    min_label_len: usize,
    max_label_len: usize,
    domain: Regex,
}

impl Classifier {
    pub fn new(coins: &[CoinDescriptor], names: &NameServiceConfig) -> Result<Self> {
        assert!(!coins.is_empty(), "Classifier requires at least one coin");
        let mut compiled = Vec::with_capacity(coins.len());
        for coin in coins {
            let pattern = Regex::new(&coin.pattern)
                .with_context(|| format!("Invalid address pattern for {}", coin.ticker))?;
            compiled.push(CoinPattern {
                ticker: coin.ticker.to_ascii_uppercase(),
                pattern,
            });
        }

        let name_suffixes = names
            .suffixes
            .iter()
            .map(|suffix| suffix.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|suffix| !suffix.is_empty())
            .collect();

        Ok(Self {
            coins: compiled,
            name_suffixes,
            min_label_len: names.min_label_len,
            max_label_len: names.max_label_len,
            domain: Regex::new(DOMAIN_PATTERN).context("Invalid domain pattern")?,
        })
    }

    pub fn classify(&self, input: &str) -> Result<Classification, ClassifyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_INPUT_LEN {
            return Err(ClassifyError::Unrecognized {
                input: truncate(trimmed),
            });
        }

        let candidates = self.candidates(trimmed);
        if !candidates.is_empty() {
            return Ok(Classification::Address {
                address: trimmed.to_string(),
                candidates,
            });
        }

        if let Some(suffix_match) = self.name_suffix(trimmed) {
            return if suffix_match {
                Ok(Classification::Name {
                    name: trimmed.to_ascii_lowercase(),
                })
            } else {
                Err(ClassifyError::InvalidName {
                    name: trimmed.to_string(),
                })
            };
        }

        if self.domain.is_match(trimmed) {
            if let Some(hostname) = hostname_of(trimmed) {
                return Ok(Classification::Domain {
                    input: trimmed.to_string(),
                    hostname,
                });
            }
        }

        if let Some((address, zone)) = parse_ip(trimmed) {
            return Ok(Classification::Ip { address, zone });
        }

        Err(ClassifyError::Unrecognized {
            input: truncate(trimmed),
        })
    }

    /// Tickers of every coin whose address pattern matches, in configured order.
    pub fn candidates(&self, address: &str) -> Vec<String> {
        self.coins
            .iter()
            .filter(|coin| coin.pattern.is_match(address))
            .map(|coin| coin.ticker.clone())
            .collect()
    }

    pub fn supports(&self, ticker: &str) -> bool {
        self.coins
            .iter()
            .any(|coin| coin.ticker.eq_ignore_ascii_case(ticker))
    }

    /// `None` when no configured suffix applies, otherwise whether the name is valid.
    fn name_suffix(&self, input: &str) -> Option<bool> {
        let lowered = input.to_ascii_lowercase();
        let suffix = self.name_suffixes.iter().find(|suffix| {
            lowered.len() > suffix.len() + 1
                && lowered.ends_with(suffix.as_str())
                && lowered.as_bytes()[lowered.len() - suffix.len() - 1] == b'.'
        })?;

        let stem = &lowered[..lowered.len() - suffix.len() - 1];
        let labels: Vec<&str> = stem.split('.').collect();
        let valid_labels = labels.iter().all(|label| {
            !label.is_empty()
                && label
                    .bytes()
                    .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-')
        });
        let root_len = labels.last().map(|label| label.len()).unwrap_or(0);
        Some(valid_labels && (self.min_label_len..=self.max_label_len).contains(&root_len))
    }
}

fn parse_ip(input: &str) -> Option<(IpAddr, Option<String>)> {
    if let Ok(address) = input.parse::<IpAddr>() {
        return Some((address, None));
    }
    let (address, zone) = input.split_once('%')?;
    if zone.is_empty() {
        return None;
    }
    let address = address.parse::<Ipv6Addr>().ok()?;
    Some((IpAddr::V6(address), Some(zone.to_string())))
}

fn truncate(input: &str) -> String {
    input.chars().take(256).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coins::default_coins;
    use crate::test_support::name_config;

    fn classifier() -> Classifier {
        Classifier::new(&default_coins(), &name_config()).expect("classifier builds")
    }

    #[test]
    fn single_coin_address_has_one_candidate() {
        let result = classifier()
            .classify("LQ3B36Yv2rBTxdgAdYpU2UcEZsaNwXeATk")
            .expect("classifies");
        assert_eq!(
            result,
            Classification::Address {
                address: "LQ3B36Yv2rBTxdgAdYpU2UcEZsaNwXeATk".to_string(),
                candidates: vec!["LTC".to_string()],
            }
        );

        let cashaddr = "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a";
        match classifier().classify(cashaddr).expect("classifies") {
            Classification::Address { candidates, .. } => assert_eq!(candidates, vec!["BCH"]),
            other => panic!("unexpected classification {other:?}"),
        }
    }

    #[test]
    fn shared_formats_collect_every_candidate_in_order() {
        let evm = classifier()
            .classify("0x742d35cc6634c0532925a3b844bc454e4438f44e")
            .expect("classifies");
        match evm {
            Classification::Address { candidates, .. } => {
                assert_eq!(candidates, vec!["ETH", "ETC"])
            }
            other => panic!("unexpected classification {other:?}"),
        }

        let legacy = classifier()
            .classify("1BoatSLRHtKNngkdXEeobR76b53LETtpyT")
            .expect("classifies");
        match legacy {
            Classification::Address { candidates, .. } => {
                assert_eq!(candidates, vec!["BTC", "BCH"])
            }
            other => panic!("unexpected classification {other:?}"),
        }
    }

    #[test]
    fn names_are_recognised_before_domains() {
        assert_eq!(
            classifier().classify("promocrypt.eth"),
            Ok(Classification::Name {
                name: "promocrypt.eth".to_string()
            })
        );
        assert_eq!(
            classifier().classify("wallet.MyCryptoWallet.eth"),
            Ok(Classification::Name {
                name: "wallet.mycryptowallet.eth".to_string()
            })
        );
    }

    #[test]
    fn short_name_is_terminal_invalid() {
        assert_eq!(
            classifier().classify("abc.eth"),
            Err(ClassifyError::InvalidName {
                name: "abc.eth".to_string()
            })
        );
        assert!(matches!(
            classifier().classify("bad_label!.eth"),
            Err(ClassifyError::InvalidName { .. })
        ));
    }

    #[test]
    fn domains_keep_hostname_without_www() {
        assert_eq!(
            classifier().classify("https://www.MyEtherWallet.com/login"),
            Ok(Classification::Domain {
                input: "https://www.MyEtherWallet.com/login".to_string(),
                hostname: "myetherwallet.com".to_string(),
            })
        );
        assert!(matches!(
            classifier().classify("scam-site.co.uk"),
            Ok(Classification::Domain { .. })
        ));
    }

    #[test]
    fn ip_literals_including_zone_ids() {
        assert_eq!(
            classifier().classify("104.27.168.171"),
            Ok(Classification::Ip {
                address: "104.27.168.171".parse().unwrap(),
                zone: None,
            })
        );
        assert_eq!(
            classifier().classify("fe80::1%eth0"),
            Ok(Classification::Ip {
                address: "fe80::1".parse().unwrap(),
                zone: Some("eth0".to_string()),
            })
        );
        assert!(matches!(
            classifier().classify("2606:4700::6812:a8ab"),
            Ok(Classification::Ip { zone: None, .. })
        ));
    }

    #[test]
    fn unrecognized_inputs_are_errors_not_panics() {
        for input in ["", "   ", "hello world", "0x12", "999.1.1.1", "fe80::1%"] {
            assert!(
                matches!(
                    classifier().classify(input),
                    Err(ClassifyError::Unrecognized { .. })
                ),
                "{input}"
            );
        }
    }

    #[test]
    fn adversarial_input_is_bounded() {
        let long = format!("{}!", "a.".repeat(5_000));
        assert!(matches!(
            classifier().classify(&long),
            Err(ClassifyError::Unrecognized { .. })
        ));

        let nested = format!("{}x", "a-".repeat(900));
        assert!(classifier().classify(&nested).is_err());
    }

    #[test]
    fn supports_is_case_insensitive() {
        let classifier = classifier();
        assert!(classifier.supports("eth"));
        assert!(classifier.supports("BCH"));
        assert!(!classifier.supports("XMR"));
    }
}
