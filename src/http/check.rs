use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::disambiguate::DisambiguationError;
use crate::entry::hostname_of;
use crate::lookup::{CheckError, CheckOutcome, Verdict, verdict_for};
use crate::models::entry::EntryView;
use crate::names::NameError;
use crate::state::AppState;

use super::{Envelope, HttpError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/check/{search}", get(check))
        .route("/domain/{domain}", get(domain))
}

#[derive(Debug, Deserialize)]
struct CheckQuery {
    coin: Option<String>,
}

async fn check(
    Path(search): Path<String>,
    Query(query): Query<CheckQuery>,
    State(state): State<AppState>,
) -> Result<Json<Envelope<CheckOutcome>>, HttpError> {
    let outcome = state
        .checker
        .check(&search, query.coin.as_deref())
        .await
        .map_err(check_error)?;
    Ok(Envelope::ok(outcome))
}

fn check_error(err: CheckError) -> HttpError {
    let status = match &err {
        CheckError::Invalid(_) | CheckError::UnsupportedCoin { .. } => StatusCode::BAD_REQUEST,
        CheckError::Name(NameError::NotFound { .. }) => StatusCode::NOT_FOUND,
        CheckError::Name(NameError::Transport { .. })
        | CheckError::Ambiguous(DisambiguationError::Unavailable { .. }) => StatusCode::BAD_GATEWAY,
        CheckError::Ambiguous(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    HttpError::new(status, err.to_string())
}

#[derive(Debug, Serialize)]
struct DomainResult {
    domain: String,
    verdict: Verdict,
    entries: Vec<Arc<EntryView>>,
}

async fn domain(
    Path(domain): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Envelope<DomainResult>>, HttpError> {
    let hostname = hostname_of(&domain).ok_or_else(|| {
        HttpError::new(StatusCode::BAD_REQUEST, format!("Invalid domain {domain}"))
    })?;
    let views = state.views.snapshot().await;
    let entries = views.hostname_entries(&hostname).to_vec();
    if entries.is_empty() {
        return Err(HttpError::new(
            StatusCode::NOT_FOUND,
            format!("Couldn't find requested domain {hostname}"),
        ));
    }
    Ok(Envelope::ok(DomainResult {
        domain: hostname,
        verdict: verdict_for(&entries),
        entries,
    }))
}
