//! Command line and environment configuration

use clap::Parser;
use router_api::{Role, RoleCatalog};
use std::net::SocketAddr;
use std::time::Duration;

/// Central registry of servers and their latency rankings
#[derive(Parser, Debug, Clone)]
#[command(name = "meta-router", version)]
pub struct Config {
    /// Address the registry API listens on
    #[arg(long, env = "META_ROUTER_LISTEN", default_value = "0.0.0.0:8084")]
    pub listen: SocketAddr,

    /// Port node servers listen on
    #[arg(long, env = "META_ROUTER_NODE_PORT", default_value_t = 8083)]
    pub node_port: u16,

    /// Port chat servers listen on
    #[arg(long, env = "META_ROUTER_CHAT_PORT", default_value_t = 8082)]
    pub chat_port: u16,

    /// Port media servers listen on
    #[arg(long, env = "META_ROUTER_MEDIA_PORT", default_value_t = 8081)]
    pub media_port: u16,

    /// Seconds between two score sync passes
    #[arg(long, env = "META_ROUTER_SCORE_SYNC_INTERVAL_SECS", default_value_t = 60)]
    pub score_sync_interval_secs: u64,

    /// Timeout for fetching one server's score document
    #[arg(long, env = "META_ROUTER_SCORE_FETCH_TIMEOUT_MS", default_value_t = 5000)]
    pub score_fetch_timeout_ms: u64,

    /// Seconds between two registry dumps in the log
    #[arg(long, env = "META_ROUTER_DUMP_INTERVAL_SECS", default_value_t = 70)]
    pub dump_interval_secs: u64,

    /// Emit logs as JSON
    #[arg(long, env = "META_ROUTER_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn catalog(&self) -> RoleCatalog {
        RoleCatalog::new(vec![
            (Role::Node, self.node_port),
            (Role::Chat, self.chat_port),
            (Role::Media, self.media_port),
        ])
    }

    pub fn score_sync_interval(&self) -> Duration {
        Duration::from_secs(self.score_sync_interval_secs.max(1))
    }

    pub fn score_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.score_fetch_timeout_ms)
    }

    pub fn dump_interval(&self) -> Duration {
        Duration::from_secs(self.dump_interval_secs.max(1))
    }
}
