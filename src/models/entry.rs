use serde::Serialize;

use crate::entities::entry;
use crate::entry::EntryKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub url: String,
    pub hostname: String,
    pub name: String,
    pub path_scope: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub reporter: Option<String>,
    pub coin: Option<String>,
    pub severity: i32,
    pub featured: bool,
    pub ip: Option<String>,
    pub status: Option<String>,
    pub status_code: Option<i32>,
    pub checked_at: Option<i64>,
    pub addresses: Vec<AddressView>,
    pub updated_at: i64,
}

impl EntryView {
    /// `None` when the stored kind is not one the service understands.
    pub fn from_model(model: entry::Model, addresses: Vec<AddressView>) -> Option<Self> {
        let kind = EntryKind::parse(&model.kind)?;
        Some(Self {
            id: model.id,
            kind,
            url: model.url,
            hostname: model.hostname,
            name: model.name,
            path_scope: model.path_scope,
            category: model.category,
            subcategory: model.subcategory,
            description: model.description,
            reporter: model.reporter,
            coin: model.coin,
            severity: model.severity,
            featured: model.featured,
            ip: model.ip,
            status: model.status,
            status_code: model.status_code,
            checked_at: model.checked_at,
            addresses,
            updated_at: model.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressView {
    pub address: String,
    pub coin: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReporterSummary {
    pub reporter: String,
    pub entry_count: usize,
}
