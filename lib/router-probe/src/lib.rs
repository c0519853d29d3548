//! Latency probing, route ranking and the HTTP plumbing shared by the
//! meta router and the route agents
pub mod client;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod policy;
pub mod probe;
pub mod ranking;

pub use client::{RegistryApi, RegistryClient, ScoreClient, ScoreSource};
pub use metrics::MetricsCollector;
pub use policy::RetryPolicy;
pub use probe::{HttpProber, ProbeOutcome, ProbeResult, Prober, UnreachableReason};
pub use ranking::{order_by_latency, EmptyRankingPolicy, RouteRanker};
