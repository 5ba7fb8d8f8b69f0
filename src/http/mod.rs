use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::{ACCEPT, CONTENT_TYPE, HeaderName};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::state::AppState;

mod check;
mod lists;
mod report;

/// Successful JSON envelope shared by the `/v1` routes.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub result: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(result: T) -> Json<Self> {
        Json(Self {
            success: true,
            result,
        })
    }
}

pub fn router(state: AppState) -> Router {
    assert!(
        state.start_time.elapsed() < Duration::from_secs(86_400),
        "Application uptime exceeds 24 hours before router creation"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static(report::API_KEY_HEADER),
        ])
        .max_age(Duration::from_secs(3600));

    let v1 = Router::new()
        .merge(check::router())
        .merge(lists::router())
        .merge(report::router())
        .with_state(state.clone());
    Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .nest("/v1", v1)
        .layer(cors)
        .with_state(state)
}

async fn health_live(State(state): State<AppState>) -> Result<Json<HealthResponse>, HttpError> {
    let uptime = state.start_time.elapsed().as_secs();
    let response = HealthResponse {
        status: "live",
        uptime_seconds: uptime,
    };
    Ok(Json(response))
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    state
        .database
        .ping()
        .await
        .map_err(|err| HttpError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;

    let views = state.views.snapshot().await;
    let Some(views_built_at) = views.built_at else {
        return Err(HttpError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Lookup views have not been built yet".to_string(),
        ));
    };

    let response = ReadyResponse {
        status: "ready",
        entries: views.entry_count,
        views_built_at,
        submission_enabled: state.reports.is_some(),
        cache_entries: CacheSummary {
            disambiguation: state.cache.disambiguation.entry_count(),
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    entries: usize,
    views_built_at: i64,
    submission_enabled: bool,
    cache_entries: CacheSummary,
}

#[derive(Debug, Serialize)]
struct CacheSummary {
    disambiguation: u64,
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self { status, message }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!("HTTP error: {}", self.message);
        let body = Json(ErrorBody {
            success: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::classify::Classifier;
    use crate::coins::default_coins;
    use crate::config::{CacheConfig, SourceKind};
    use crate::disambiguate::Disambiguator;
    use crate::indexer::source::SourceFile;
    use crate::indexer::views::ViewStore;
    use crate::indexer::{import_sources, rebuild_views};
    use crate::lookup::Checker;
    use crate::names::NameResolver;
    use crate::state::ApiCache;
    use crate::test_support::{StubBalances, StubNames, memory_database, name_config};

    const BLOCKLIST: &str = "\
- name: fake-mew.com
  category: Phishing
  reporter: MyCrypto
  addresses:
    - '0x742d35cc6634c0532925a3b844bc454e4438f44e'
";
    const ALLOWLIST: &str = "\
- name: mycrypto.com
  featured: true
  description: Wallet
";

    pub(crate) async fn test_state() -> AppState {
        let database = memory_database().await;
        let classifier = Arc::new(Classifier::new(&default_coins(), &name_config()).unwrap());
        import_sources(
            &database,
            &classifier,
            &[
                SourceFile {
                    name: "blacklist".to_string(),
                    kind: SourceKind::Blocklist,
                    bytes: BLOCKLIST.as_bytes().to_vec(),
                },
                SourceFile {
                    name: "whitelist".to_string(),
                    kind: SourceKind::Allowlist,
                    bytes: ALLOWLIST.as_bytes().to_vec(),
                },
            ],
        )
        .await;
        let views = ViewStore::default();
        views.replace(rebuild_views(&database).await.unwrap()).await;

        let cache = Arc::new(ApiCache::new(&CacheConfig {
            disambiguation_max_capacity: 100,
            disambiguation_ttl_seconds: 60,
        }));
        let checker = Checker::new(
            classifier,
            Disambiguator::new(
                Arc::new(StubBalances::with(&[("ETH", 10.0), ("ETC", 0.0)])),
                default_coins(),
                Duration::from_millis(200),
            )
            .with_cache(cache.disambiguation.clone()),
            NameResolver::new(Arc::new(StubNames::always_null())),
            views.clone(),
        );
        AppState::new(database, views, cache, Arc::new(checker), None)
    }

    pub(crate) async fn call(state: AppState, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router(state)
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn readiness_reports_built_views() {
        let (status, body) = call(test_state().await, Method::GET, "/health/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"], 2);
        assert_eq!(body["submission_enabled"], false);
    }

    #[tokio::test]
    async fn errors_use_json_body() {
        let (status, body) = call(test_state().await, Method::GET, "/v1/check/%20%20", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("unsupported input type"));
    }
}
