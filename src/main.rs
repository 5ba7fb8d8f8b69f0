mod balance;
mod classify;
mod coins;
mod config;
mod disambiguate;
mod entities;
mod entry;
mod github;
mod http;
mod indexer;
mod lookup;
mod models;
mod names;
mod reports;
mod state;
#[cfg(test)]
mod test_support;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::balance::ExplorerClient;
use crate::classify::Classifier;
use crate::config::ApiConfig;
use crate::disambiguate::Disambiguator;
use crate::github::GithubHost;
use crate::indexer::SourceIndexer;
use crate::indexer::views::ViewStore;
use crate::lookup::Checker;
use crate::names::{EnsClient, NameResolver};
use crate::reports::{SubmissionPipeline, run_drain_loop};
use crate::state::{ApiCache, AppState};
use anyhow::{Context, Result};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::ConnectOptions;
use sea_orm::Database;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ApiConfig::load().context("Failed to load configuration")?;
    let database = connect_database(&config).await?;
    run_migrations(&database).await?;

    let classifier = Arc::new(
        Classifier::new(&config.coins, &config.names).context("Failed to build classifier")?,
    );
    let cache = Arc::new(ApiCache::new(&config.cache));
    let explorer = ExplorerClient::new(config.balances.request_timeout())
        .context("Failed to initialize balance explorer client")?;
    let disambiguator = Disambiguator::new(
        Arc::new(explorer),
        config.coins.clone(),
        config.balances.request_timeout(),
    )
    .with_cache(cache.disambiguation.clone());
    let ens = EnsClient::new(&config.names).context("Failed to initialize name service client")?;

    let views = ViewStore::default();
    let checker = Arc::new(Checker::new(
        Arc::clone(&classifier),
        disambiguator,
        NameResolver::new(Arc::new(ens)),
        views.clone(),
    ));

    let pipeline = if config.submission.enabled {
        let host = GithubHost::new(&config.submission).context("Failed to initialize GitHub client")?;
        Some(Arc::new(SubmissionPipeline::new(
            database.clone(),
            Arc::new(host),
            config.submission.clone(),
        )))
    } else {
        info!("Report submission disabled");
        None
    };

    let app_state = AppState::new(
        database.clone(),
        views.clone(),
        Arc::clone(&cache),
        checker,
        pipeline.clone(),
    );

    let indexer = SourceIndexer::new(
        database.clone(),
        Arc::clone(&classifier),
        config.sources.clone(),
        config.indexer.clone(),
        views,
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let indexer_handle = tokio::spawn(supervise(
        "Indexer",
        indexer.run(shutdown_rx.clone()),
        shutdown_tx.clone(),
    ));
    let drain_handle = pipeline.map(|pipeline| {
        let interval = config.submission.drain_interval();
        tokio::spawn(supervise(
            "Report drain loop",
            run_drain_loop(pipeline, interval, shutdown_rx.clone()),
            shutdown_tx.clone(),
        ))
    });

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("ScamDB API listening on {local_addr}");

    let router: Router = http::router(app_state.clone());
    let server = axum::serve(listener, router.into_make_service());
    server
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone(), shutdown_rx))
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    let mut failure = None;
    for handle in std::iter::once(indexer_handle).chain(drain_handle) {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                failure.get_or_insert(err);
            }
            Err(join_err) => error!("Background task join error: {join_err}"),
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Runs a background task; an error stops the server so the process exits
/// with it instead of serving stale state.
async fn supervise(
    task: &'static str,
    work: impl Future<Output = Result<()>>,
    shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
    let result = work.await;
    if let Err(err) = &result {
        error!("{task} terminated with error: {err:#}");
        shutdown_tx.send(true).ok();
    }
    result.with_context(|| format!("{task} failed"))
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

async fn connect_database(config: &ApiConfig) -> Result<sea_orm::DatabaseConnection> {
    let mut options = ConnectOptions::new(config.database.url.clone());
    options
        .max_connections(config.database.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));

    if let Some(min) = config.database.min_connections {
        options.min_connections(min);
    }

    assert!(
        config.database.max_connections >= config.database.min_connections.unwrap_or(1),
        "Max connections must be >= min connections"
    );

    Database::connect(options)
        .await
        .context("Failed to connect to PostgreSQL")
}

async fn run_migrations(database: &sea_orm::DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>, mut shutdown_rx: watch::Receiver<bool>) {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!("Failed to listen for shutdown signal: {err}");
                return;
            }
        }
        _ = stop_requested(&mut shutdown_rx) => {
            info!("Shutdown requested by a background task");
        }
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}

async fn stop_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown_rx.borrow_and_update();
        if stop || shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
