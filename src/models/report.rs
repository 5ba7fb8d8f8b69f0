use serde::{Deserialize, Serialize};

/// Body of `PUT /v1/report`, before normalisation. The reporter is taken
/// from the API key, never from the body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportRequest {
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
    pub coin: Option<String>,
    #[serde(default)]
    pub addresses: Option<AddressList>,
}

/// A single address string or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressList {
    One(String),
    Many(Vec<String>),
}

impl AddressList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            AddressList::One(address) => vec![address],
            AddressList::Many(addresses) => addresses,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub report_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub attempted: usize,
    pub submitted: usize,
    pub failed: usize,
}
