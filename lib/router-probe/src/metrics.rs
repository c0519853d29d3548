//! Prometheus metrics for probing, ranking and the registry

use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics collector shared by the agent and the meta router.
///
/// Clones share the same underlying registry and metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    /// Probes issued, by outcome (ok, timeout, transport, bad_status)
    pub probes_total: IntCounterVec,
    /// Latency of successful probes in seconds
    pub probe_latency_seconds: Histogram,
    /// Completed ranking batches
    pub rankings_total: IntCounter,
    /// Registration requests, by result
    pub registrations_total: IntCounterVec,
    /// Score document merges, by result
    pub score_merges_total: IntCounterVec,
    /// Servers currently held by the registry
    pub registered_servers: IntGauge,
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let probes_total = IntCounterVec::new(
            Opts::new("route_probes_total", "Latency probes issued, by outcome"),
            &["outcome"],
        )?;

        let probe_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "route_probe_latency_seconds",
                "Round trip of successful latency probes in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        let rankings_total = IntCounter::new(
            "route_rankings_total",
            "Completed ranking batches",
        )?;

        let registrations_total = IntCounterVec::new(
            Opts::new("registry_registrations_total", "Server registrations, by result"),
            &["result"],
        )?;

        let score_merges_total = IntCounterVec::new(
            Opts::new("registry_score_merges_total", "Score document merges, by result"),
            &["result"],
        )?;

        let registered_servers = IntGauge::new(
            "registry_servers",
            "Servers currently registered",
        )?;

        registry.register(Box::new(probes_total.clone()))?;
        registry.register(Box::new(probe_latency_seconds.clone()))?;
        registry.register(Box::new(rankings_total.clone()))?;
        registry.register(Box::new(registrations_total.clone()))?;
        registry.register(Box::new(score_merges_total.clone()))?;
        registry.register(Box::new(registered_servers.clone()))?;

        Ok(Self {
            probes_total,
            probe_latency_seconds,
            rankings_total,
            registrations_total,
            score_merges_total,
            registered_servers,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
