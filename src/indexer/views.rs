//! Read-side lookup views rebuilt from the full entry set after each import run.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::entities::{address_binding, entry};
use crate::entry::EntryKind;
use crate::models::entry::{AddressView, EntryView, ReporterSummary};

#[derive(Debug, Clone)]
pub struct AddressHit {
    pub entry: Arc<EntryView>,
    pub coin: String,
}

#[derive(Debug, Default)]
pub struct IndexViews {
    /// Keyed by lowercased address
    pub by_address: HashMap<String, Vec<AddressHit>>,
    pub by_ip: HashMap<String, Vec<Arc<EntryView>>>,
    pub by_hostname: HashMap<String, Vec<Arc<EntryView>>>,
    pub by_reporter: BTreeMap<String, Vec<Arc<EntryView>>>,
    /// Featured allowlist entries sorted by name
    pub featured: Vec<Arc<EntryView>>,
    pub entry_count: usize,
    pub built_at: Option<i64>,
}

impl IndexViews {
    pub fn build(
        entries: Vec<entry::Model>,
        bindings: Vec<address_binding::Model>,
        built_at: i64,
    ) -> Self {
        let mut addresses_by_entry: HashMap<String, Vec<AddressView>> = HashMap::new();
        for binding in bindings {
            addresses_by_entry
                .entry(binding.entry_id)
                .or_default()
                .push(AddressView {
                    address: binding.address,
                    coin: binding.coin,
                });
        }

        let mut views = IndexViews {
            built_at: Some(built_at),
            ..Default::default()
        };
        for model in entries {
            let addresses = addresses_by_entry.remove(&model.id).unwrap_or_default();
            let id = model.id.clone();
            let Some(view) = EntryView::from_model(model, addresses) else {
                warn!(entry = %id, "Skipping entry with unknown kind");
                continue;
            };
            let view = Arc::new(view);
            views.entry_count += 1;

            for address in &view.addresses {
                views
                    .by_address
                    .entry(address.address.trim().to_ascii_lowercase())
                    .or_default()
                    .push(AddressHit {
                        entry: Arc::clone(&view),
                        coin: address.coin.clone(),
                    });
            }
            if let Some(ip) = view.ip.as_deref().map(str::trim).filter(|ip| !ip.is_empty()) {
                views
                    .by_ip
                    .entry(canonical_ip(ip))
                    .or_default()
                    .push(Arc::clone(&view));
            }
            views
                .by_hostname
                .entry(view.hostname.clone())
                .or_default()
                .push(Arc::clone(&view));
            if let Some(reporter) = view.reporter.as_deref().filter(|r| !r.is_empty()) {
                views
                    .by_reporter
                    .entry(reporter.to_string())
                    .or_default()
                    .push(Arc::clone(&view));
            }
            if view.featured && view.kind == EntryKind::Verified {
                views.featured.push(Arc::clone(&view));
            }
        }
        views.featured.sort_by(|a, b| {
            a.name
                .to_ascii_lowercase()
                .cmp(&b.name.to_ascii_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        views
    }

    pub fn address_hits(&self, address: &str) -> &[AddressHit] {
        self.by_address
            .get(&address.trim().to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn hostname_entries(&self, hostname: &str) -> &[Arc<EntryView>] {
        self.by_hostname
            .get(&hostname.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn ip_entries(&self, ip: &str) -> &[Arc<EntryView>] {
        self.by_ip.get(ip).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn reporters(&self) -> Vec<ReporterSummary> {
        self.by_reporter
            .iter()
            .map(|(reporter, entries)| ReporterSummary {
                reporter: reporter.clone(),
                entry_count: entries.len(),
            })
            .collect()
    }
}

/// Lookups format parsed addresses, so stored IPs are keyed the same way.
fn canonical_ip(ip: &str) -> String {
    ip.parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| ip.to_string())
}

/// Current views; readers take a snapshot and never see a partial rebuild.
#[derive(Clone, Default)]
pub struct ViewStore {
    current: Arc<RwLock<Arc<IndexViews>>>,
}

impl ViewStore {
    pub async fn snapshot(&self) -> Arc<IndexViews> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn replace(&self, views: IndexViews) {
        let views = Arc::new(views);
        *self.current.write().await = views;
    }
}
