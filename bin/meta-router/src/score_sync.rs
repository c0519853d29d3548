//! Periodic pull of every agent's score document into the registry

use router_core::{RegisteredServer, RegistryStore};
use router_probe::{MetricsCollector, ScoreSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of one sync pass over all registered servers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub merged: usize,
    pub failed: usize,
}

pub struct ScoreSync {
    store: RegistryStore,
    source: Arc<dyn ScoreSource>,
    metrics: Option<MetricsCollector>,
}

impl ScoreSync {
    pub fn new(store: RegistryStore, source: Arc<dyn ScoreSource>) -> Self {
        Self {
            store,
            source,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run a pass every `interval`, the first one after a full interval.
    /// Passes never overlap: ticks missed during a slow pass are skipped.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            info!("Periodic server scores update");
            let report = self.sync_once().await;
            info!(
                "Score sync finished: {} merged, {} failed",
                report.merged, report.failed
            );
        }
    }

    /// Fetch and merge the score document of every registered server.
    ///
    /// Each server is fetched in its own task; one failure never affects the others.
    pub async fn sync_once(&self) -> SyncReport {
        let mut fetches = JoinSet::new();

        for server in self.store.servers().await {
            let store = self.store.clone();
            let source = self.source.clone();
            fetches.spawn(async move { sync_server(store, source, server).await });
        }

        let mut report = SyncReport::default();
        while let Some(joined) = fetches.join_next().await {
            let merged = match joined {
                Ok(merged) => merged,
                Err(e) => {
                    warn!("Score sync task failed: {}", e);
                    false
                }
            };
            if merged {
                report.merged += 1;
            } else {
                report.failed += 1;
            }
            if let Some(metrics) = &self.metrics {
                let label = if merged { "ok" } else { "failed" };
                metrics.score_merges_total.with_label_values(&[label]).inc();
            }
        }
        report
    }
}

async fn sync_server(
    store: RegistryStore,
    source: Arc<dyn ScoreSource>,
    server: RegisteredServer,
) -> bool {
    let RegisteredServer { record, address } = server;

    let scores = match source.fetch_scores(&address).await {
        Ok(scores) => scores,
        Err(e) => {
            warn!("Periodic scores fetch for {}/{} failed: {:#}", record.role, record.place, e);
            return false;
        }
    };

    match store
        .merge_scores(record.role, &record.place, &record.ip, scores)
        .await
    {
        Ok(()) => {
            debug!("Merged scores of {}/{}", record.role, record.place);
            true
        }
        Err(e) => {
            warn!("Periodic scores merge failed: {}", e);
            false
        }
    }
}
