use anyhow::{Context, Result};
use clap::Parser;
use router_api::ServerRecord;
use router_probe::{http, logging, HttpProber, MetricsCollector, RegistryClient, RouteRanker};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

mod agent;
mod config;
mod status;

use agent::{Agent, AgentSettings};
use config::Config;
use status::StatusState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    logging::init("info", config.log_json);

    info!(
        "Starting route-agent {}/{} at {}...",
        config.role, config.place, config.ip
    );

    let metrics = MetricsCollector::new().context("creating metrics collector")?;
    let registry = RegistryClient::new(config.registry_url.clone(), config.registry_timeout())?;
    let ranker = RouteRanker::new(Arc::new(HttpProber::new()), config.probe_timeout())
        .with_metrics(metrics.clone());

    let settings = AgentSettings {
        cycle_interval: config.cycle_interval(),
        register_policy: config.register_policy(),
        snapshot_policy: config.snapshot_policy(),
        empty_ranking: config.empty_ranking_policy(),
        listen_port: Some(config.listen_addr().port()),
    };
    let agent = Agent::new(
        ServerRecord::new(config.role, config.place.clone(), config.ip.clone()),
        Arc::new(registry),
        ranker,
        settings,
    );

    // Peers may probe us as soon as we are registered, so listen first
    let listen = config.listen_addr();
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {}", listen))?;
    info!("Serving /ping and /route-scores on {}", listen);

    let state = StatusState {
        agent: agent.clone(),
        metrics,
    };
    tokio::spawn(http::serve(listener, move |method, path, body| {
        status::handle_request(state.clone(), method, path, body)
    }));

    tokio::select! {
        result = agent.run() => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, exiting...");
            Ok(())
        }
    }
}
