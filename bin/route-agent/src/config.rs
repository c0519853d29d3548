//! Command line and environment configuration

use clap::Parser;
use router_api::Role;
use router_probe::{EmptyRankingPolicy, RetryPolicy};
use std::net::SocketAddr;
use std::time::Duration;

/// Per-server agent: registers with the meta router and ranks peers by latency
#[derive(Parser, Debug, Clone)]
#[command(name = "route-agent", version)]
pub struct Config {
    /// Role of this server (node, chat, media)
    #[arg(long, env = "ROUTE_AGENT_ROLE")]
    pub role: Role,

    /// Identifier of this server within its role
    #[arg(long, env = "ROUTE_AGENT_PLACE")]
    pub place: String,

    /// Address peers and the meta router reach this server on
    #[arg(long, env = "ROUTE_AGENT_IP")]
    pub ip: String,

    /// Base URL of the meta router
    #[arg(long, env = "ROUTE_AGENT_REGISTRY_URL", default_value = "http://localhost:8084")]
    pub registry_url: String,

    /// Listen address for /ping and /route-scores; defaults to the role's default port on
    /// all interfaces. The port must match the one the meta router advertises for the role,
    /// unless `--ip` carries its own port.
    #[arg(long, env = "ROUTE_AGENT_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Timeout of a single latency probe
    #[arg(long, env = "ROUTE_AGENT_PROBE_TIMEOUT_MS", default_value_t = 5000)]
    pub probe_timeout_ms: u64,

    /// Seconds between two sync and rank cycles
    #[arg(long, env = "ROUTE_AGENT_CYCLE_INTERVAL_SECS", default_value_t = 60)]
    pub cycle_interval_secs: u64,

    /// Timeout of a single call to the meta router
    #[arg(long, env = "ROUTE_AGENT_REGISTRY_TIMEOUT_MS", default_value_t = 10000)]
    pub registry_timeout_ms: u64,

    /// Registration attempts before giving up
    #[arg(long, env = "ROUTE_AGENT_REGISTER_ATTEMPTS", default_value_t = 5)]
    pub register_attempts: u32,

    /// Snapshot pull attempts per cycle before keeping the cached one
    #[arg(long, env = "ROUTE_AGENT_SNAPSHOT_ATTEMPTS", default_value_t = 3)]
    pub snapshot_attempts: u32,

    /// Keep the previous ranking when every peer of a role is unreachable
    #[arg(long, env = "ROUTE_AGENT_KEEP_PREVIOUS_ON_EMPTY")]
    pub keep_previous_on_empty: bool,

    /// Emit logs as JSON
    #[arg(long, env = "ROUTE_AGENT_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], self.role.default_port())))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs.max(1))
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_timeout_ms)
    }

    pub fn register_policy(&self) -> RetryPolicy {
        RetryPolicy::with_attempts(self.register_attempts)
    }

    pub fn snapshot_policy(&self) -> RetryPolicy {
        RetryPolicy::with_attempts(self.snapshot_attempts)
    }

    pub fn empty_ranking_policy(&self) -> EmptyRankingPolicy {
        if self.keep_previous_on_empty {
            EmptyRankingPolicy::KeepPrevious
        } else {
            EmptyRankingPolicy::Overwrite
        }
    }
}
