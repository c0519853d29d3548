use anyhow::{Context, Result};
use clap::Parser;
use router_core::RegistryStore;
use router_probe::{http, logging, MetricsCollector, ScoreClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

mod api;
mod config;
mod score_sync;

use api::ApiState;
use config::Config;
use score_sync::ScoreSync;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    logging::init("info", config.log_json);

    info!("Starting meta-router...");

    let store = RegistryStore::new(config.catalog());
    info!("Registry store initialized");

    let metrics = MetricsCollector::new().context("creating metrics collector")?;

    let score_client = ScoreClient::new(config.score_fetch_timeout())?;
    let score_sync = ScoreSync::new(store.clone(), Arc::new(score_client))
        .with_metrics(metrics.clone());
    tokio::spawn(score_sync.run(config.score_sync_interval()));
    info!(
        "Score sync scheduled every {:?} ({:?} fetch timeout)",
        config.score_sync_interval(),
        config.score_fetch_timeout()
    );

    tokio::spawn(dump_registry(store.clone(), config.dump_interval()));

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!("Starting http router-server on {}", config.listen);

    let state = ApiState::new(store, metrics);
    http::serve(listener, move |method, path, body| {
        api::handle_request(state.clone(), method, path, body)
    })
    .await;

    Ok(())
}

/// Periodically log the whole registry
async fn dump_registry(store: RegistryStore, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Some(dump) = render_registry(&store).await {
            debug!("Registry periodic log:\n{}", dump);
        }
    }
}

async fn render_registry(store: &RegistryStore) -> Option<String> {
    let snapshot = store.snapshot().await;
    info!("Registry holds {} servers", snapshot.server_count());
    match serde_json::to_string_pretty(&snapshot) {
        Ok(dump) => Some(dump),
        Err(e) => {
            warn!("Error encoding registry dump: {}", e);
            None
        }
    }
}
