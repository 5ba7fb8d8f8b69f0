use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use sea_orm::DatabaseConnection;

use crate::config::CacheConfig;
use crate::disambiguate::Resolution;
use crate::indexer::views::ViewStore;
use crate::lookup::Checker;
use crate::reports::SubmissionPipeline;

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub views: ViewStore,
    pub cache: Arc<ApiCache>,
    pub checker: Arc<Checker>,
    /// `None` when report submission is disabled
    pub reports: Option<Arc<SubmissionPipeline>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        database: DatabaseConnection,
        views: ViewStore,
        cache: Arc<ApiCache>,
        checker: Arc<Checker>,
        reports: Option<Arc<SubmissionPipeline>>,
    ) -> Self {
        assert!(
            reports.as_ref().is_none_or(|pipeline| pipeline.enabled()),
            "Disabled pipelines must not be mounted"
        );
        Self {
            database,
            views,
            cache,
            checker,
            reports,
            start_time: Instant::now(),
        }
    }
}

pub struct ApiCache {
    pub disambiguation: Cache<String, Resolution>,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.disambiguation_max_capacity >= 10,
            "Disambiguation cache capacity threshold"
        );

        let disambiguation = Cache::builder()
            .max_capacity(config.disambiguation_max_capacity)
            .time_to_live(Duration::from_secs(config.disambiguation_ttl_seconds))
            .time_to_idle(Duration::from_secs(config.disambiguation_ttl_seconds / 2 + 1))
            .build();

        Self { disambiguation }
    }
}
