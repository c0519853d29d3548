//! Route ranking: probe every peer of a role concurrently and order them by latency

use crate::metrics::MetricsCollector;
use crate::probe::{ProbeOutcome, ProbeResult, Prober, UnreachableReason};
use router_api::{Peer, Ranking};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// What to do with a ranking that came back empty although peers were known
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmptyRankingPolicy {
    /// Publish the empty ranking
    #[default]
    Overwrite,
    /// Keep the previously published ranking
    KeepPrevious,
}

impl EmptyRankingPolicy {
    /// Decide which ranking to publish after a batch over `peer_count` peers
    pub fn resolve(&self, peer_count: usize, previous: &[String], fresh: Ranking) -> Ranking {
        match self {
            EmptyRankingPolicy::KeepPrevious if fresh.is_empty() && peer_count > 0 => {
                previous.to_vec()
            }
            _ => fresh,
        }
    }
}

/// Ranks a role's peers by probing all of them at once
#[derive(Clone)]
pub struct RouteRanker {
    prober: Arc<dyn Prober>,
    timeout: Duration,
    metrics: Option<MetricsCollector>,
}

impl RouteRanker {
    /// Create a ranker; `timeout` bounds every single probe
    pub fn new(prober: Arc<dyn Prober>, timeout: Duration) -> Self {
        Self {
            prober,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe every peer concurrently and return the ids of the reachable
    /// ones, fastest first
    pub async fn rank(&self, peers: Vec<Peer>) -> Ranking {
        order_by_latency(self.rank_detailed(peers).await)
    }

    /// Probe every peer concurrently and return one result per peer, in input order.
    ///
    /// Resolves once every probe has finished or hit its timeout.
    pub async fn rank_detailed(&self, peers: Vec<Peer>) -> Vec<ProbeResult> {
        let ids: Vec<String> = peers.iter().map(|p| p.id.clone()).collect();
        let mut probes = JoinSet::new();

        for (index, peer) in peers.into_iter().enumerate() {
            let prober = self.prober.clone();
            let timeout = self.timeout;
            probes.spawn(async move { (index, prober.probe(&peer, timeout).await) });
        }

        let mut slots: Vec<Option<ProbeResult>> = ids.iter().map(|_| None).collect();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("Probe task failed: {}", e),
            }
        }

        let results: Vec<ProbeResult> = slots
            .into_iter()
            .zip(ids)
            .map(|(slot, id)| {
                slot.unwrap_or_else(|| {
                    ProbeResult::unreachable(
                        id,
                        UnreachableReason::Transport("probe task failed".to_string()),
                    )
                })
            })
            .collect();

        if let Some(metrics) = &self.metrics {
            for result in &results {
                match &result.outcome {
                    ProbeOutcome::Reachable { elapsed } => {
                        metrics.probes_total.with_label_values(&["ok"]).inc();
                        metrics.probe_latency_seconds.observe(elapsed.as_secs_f64());
                    }
                    ProbeOutcome::Unreachable(reason) => {
                        metrics.probes_total.with_label_values(&[reason.label()]).inc();
                    }
                }
            }
            metrics.rankings_total.inc();
        }

        debug!(
            "Probed {} peers, {} reachable",
            results.len(),
            results.iter().filter(|r| r.is_reachable()).count()
        );
        results
    }
}

/// Drop unreachable results and sort the rest ascending by latency.
///
/// The sort is stable: equal latencies keep their input order.
pub fn order_by_latency(results: Vec<ProbeResult>) -> Ranking {
    let mut scored: Vec<(Duration, String)> = results
        .into_iter()
        .filter_map(|result| result.elapsed().map(|elapsed| (elapsed, result.server_id)))
        .collect();

    scored.sort_by_key(|(elapsed, _)| *elapsed);
    scored.into_iter().map(|(_, id)| id).collect()
}
