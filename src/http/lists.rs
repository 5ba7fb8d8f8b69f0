use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::models::entry::{EntryView, ReporterSummary};
use crate::state::AppState;

use super::{Envelope, HttpError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/addresses", get(addresses))
        .route("/ips", get(ips))
        .route("/featured", get(featured))
        .route("/reporters", get(reporters))
}

#[derive(Debug, Deserialize)]
struct AddressQuery {
    coin: Option<String>,
}

async fn addresses(
    Query(query): Query<AddressQuery>,
    State(state): State<AppState>,
) -> Result<Json<Envelope<BTreeMap<String, Vec<Arc<EntryView>>>>>, HttpError> {
    let coin = match query.coin.as_deref().map(str::trim) {
        Some(coin) if !coin.is_empty() => {
            if !(3..=5).contains(&coin.len()) || !coin.bytes().all(|b| b.is_ascii_alphabetic()) {
                return Err(HttpError::new(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid coin ticker {coin}"),
                ));
            }
            Some(coin.to_ascii_uppercase())
        }
        _ => None,
    };

    let views = state.views.snapshot().await;
    let mut result: BTreeMap<String, Vec<Arc<EntryView>>> = BTreeMap::new();
    for (address, hits) in &views.by_address {
        let entries: Vec<Arc<EntryView>> = hits
            .iter()
            .filter(|hit| coin.as_deref().is_none_or(|coin| hit.coin == coin))
            .map(|hit| Arc::clone(&hit.entry))
            .collect();
        if !entries.is_empty() {
            result.insert(address.clone(), entries);
        }
    }
    Ok(Envelope::ok(result))
}

async fn ips(
    State(state): State<AppState>,
) -> Result<Json<Envelope<BTreeMap<String, Vec<Arc<EntryView>>>>>, HttpError> {
    let views = state.views.snapshot().await;
    let result = views
        .by_ip
        .iter()
        .map(|(ip, entries)| (ip.clone(), entries.clone()))
        .collect();
    Ok(Envelope::ok(result))
}

#[derive(Debug, Serialize)]
struct FeaturedEntry {
    id: String,
    name: String,
    description: Option<String>,
    url: String,
}

async fn featured(State(state): State<AppState>) -> Result<Json<Envelope<Vec<FeaturedEntry>>>, HttpError> {
    let views = state.views.snapshot().await;
    let result = views
        .featured
        .iter()
        .map(|entry| FeaturedEntry {
            id: entry.id.clone(),
            name: entry.name.clone(),
            description: entry.description.clone(),
            url: entry.url.clone(),
        })
        .collect();
    Ok(Envelope::ok(result))
}

async fn reporters(State(state): State<AppState>) -> Result<Json<Envelope<Vec<ReporterSummary>>>, HttpError> {
    let views = state.views.snapshot().await;
    Ok(Envelope::ok(views.reporters()))
}
