//! Static description of the chains whose addresses can be classified.

use serde::Deserialize;

/// Address format and balance explorer for one coin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoinDescriptor {
    pub ticker: String,
    /// Anchored address pattern, compiled with the linear-time `regex` engine
    pub pattern: String,
    /// Explorer URL; `{address}` is substituted, otherwise the address is appended
    pub balance_endpoint: String,
    /// Dotted path to the balance in the explorer's JSON body
    pub balance_field: String,
    pub decimals: u32,
}

impl CoinDescriptor {
    pub fn balance_url(&self, address: &str) -> String {
        if self.balance_endpoint.contains("{address}") {
            self.balance_endpoint.replace("{address}", address)
        } else {
            format!("{}{}", self.balance_endpoint, address)
        }
    }
}

const BASE58_LEGACY: &str = "[13][a-km-zA-HJ-NP-Z1-9]{25,34}";

pub fn default_coins() -> Vec<CoinDescriptor> {
    vec![
        CoinDescriptor {
            ticker: "ETH".to_string(),
            pattern: "^0x[0-9a-fA-F]{40}$".to_string(),
            balance_endpoint:
                "https://api.etherscan.io/api?module=account&action=balance&tag=latest&address="
                    .to_string(),
            balance_field: "result".to_string(),
            decimals: 18,
        },
        CoinDescriptor {
            ticker: "ETC".to_string(),
            pattern: "^0x[0-9a-fA-F]{40}$".to_string(),
            balance_endpoint:
                "https://blockscout.com/etc/mainnet/api?module=account&action=balance&address="
                    .to_string(),
            balance_field: "result".to_string(),
            decimals: 18,
        },
        CoinDescriptor {
            ticker: "BTC".to_string(),
            pattern: format!("^{BASE58_LEGACY}$"),
            balance_endpoint: "https://api.blockcypher.com/v1/btc/main/addrs/".to_string(),
            balance_field: "balance".to_string(),
            decimals: 8,
        },
        CoinDescriptor {
            ticker: "BCH".to_string(),
            pattern: format!(
                "^(?:{BASE58_LEGACY}|(?:bitcoincash:)?[qp][a-z0-9]{{41}}|(?:BITCOINCASH:)?[QP][A-Z0-9]{{41}})$"
            ),
            balance_endpoint: "https://bch-chain.api.btc.com/v3/address/".to_string(),
            balance_field: "data.balance".to_string(),
            decimals: 8,
        },
        CoinDescriptor {
            ticker: "LTC".to_string(),
            pattern: "^[LM][a-km-zA-HJ-NP-Z1-9]{26,33}$".to_string(),
            balance_endpoint: "https://api.blockcypher.com/v1/ltc/main/addrs/".to_string(),
            balance_field: "balance".to_string(),
            decimals: 8,
        },
    ]
}
