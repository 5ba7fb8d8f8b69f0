use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::put;
use axum::{Json, Router};

use crate::models::report::{ReportRequest, SubmitResponse};
use crate::reports::{ReportCommand, SubmissionError};
use crate::state::AppState;

use super::HttpError;

pub const API_KEY_HEADER: &str = "x-api-key";

pub fn router() -> Router<AppState> {
    Router::new().route("/report", put(submit_report))
}

async fn submit_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReportRequest>,
) -> Result<Json<SubmitResponse>, HttpError> {
    let pipeline = state
        .reports
        .as_ref()
        .ok_or_else(|| submission_error(SubmissionError::Disabled))?;

    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            HttpError::new(
                StatusCode::UNAUTHORIZED,
                format!("API key required; include an {API_KEY_HEADER} header"),
            )
        })?;
    let reporter = pipeline
        .reporter_for(api_key)
        .ok_or_else(|| HttpError::new(StatusCode::UNAUTHORIZED, "invalid API key".to_string()))?;

    let command = ReportCommand::from_request(request, reporter, state.checker.classifier())
        .map_err(submission_error)?;
    let response = pipeline.submit(command).await.map_err(submission_error)?;
    Ok(Json(response))
}

fn submission_error(err: SubmissionError) -> HttpError {
    match err {
        SubmissionError::InvalidReport { .. } => HttpError::new(StatusCode::BAD_REQUEST, err.to_string()),
        SubmissionError::Duplicate(_) => HttpError::new(StatusCode::CONFLICT, err.to_string()),
        SubmissionError::Disabled => HttpError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        SubmissionError::Failed { .. } => HttpError::new(
            StatusCode::BAD_GATEWAY,
            format!("{err}; the report stays queued for retry"),
        ),
        SubmissionError::Database(db_err) => HttpError::internal(db_err),
    }
}
