//! Timed liveness probes against peer servers

use async_trait::async_trait;
use router_api::{Peer, ServerId};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::debug;

/// Why a probe produced no measurement
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnreachableReason {
    Timeout,
    Transport(String),
    BadStatus(u16),
}

impl UnreachableReason {
    /// Metric label for this reason
    pub fn label(&self) -> &'static str {
        match self {
            UnreachableReason::Timeout => "timeout",
            UnreachableReason::Transport(_) => "transport",
            UnreachableReason::BadStatus(_) => "bad_status",
        }
    }
}

impl fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreachableReason::Timeout => f.write_str("timed out"),
            UnreachableReason::Transport(e) => write!(f, "transport error: {}", e),
            UnreachableReason::BadStatus(code) => write!(f, "status {}", code),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable { elapsed: Duration },
    Unreachable(UnreachableReason),
}

/// Result of probing one peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeResult {
    pub server_id: ServerId,
    pub outcome: ProbeOutcome,
}

impl ProbeResult {
    pub fn reachable(server_id: impl Into<ServerId>, elapsed: Duration) -> Self {
        Self {
            server_id: server_id.into(),
            outcome: ProbeOutcome::Reachable { elapsed },
        }
    }

    pub fn unreachable(server_id: impl Into<ServerId>, reason: UnreachableReason) -> Self {
        Self {
            server_id: server_id.into(),
            outcome: ProbeOutcome::Unreachable(reason),
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match self.outcome {
            ProbeOutcome::Reachable { elapsed } => Some(elapsed),
            ProbeOutcome::Unreachable(_) => None,
        }
    }

    pub fn elapsed_millis(&self) -> Option<i64> {
        self.elapsed().map(|d| d.as_millis() as i64)
    }

    pub fn is_reachable(&self) -> bool {
        self.elapsed().is_some()
    }
}

/// Measures the round trip to one peer
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `peer` once. Never retries; every failure is reported as unreachable.
    async fn probe(&self, peer: &Peer, timeout: Duration) -> ProbeResult;
}

/// Prober issuing `GET http://{address}/ping`
pub struct HttpProber {
    client: reqwest::Client,
    path: String,
}

impl HttpProber {
    pub fn new() -> Self {
        Self::with_path("/ping")
    }

    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            path: path.into(),
        }
    }

    fn url(&self, peer: &Peer) -> String {
        format!("http://{}{}", peer.address, self.path)
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, peer: &Peer, timeout: Duration) -> ProbeResult {
        let url = self.url(peer);
        let started = Instant::now();

        let outcome = match time::timeout(timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => ProbeOutcome::Reachable {
                elapsed: started.elapsed(),
            },
            Ok(Ok(response)) => {
                ProbeOutcome::Unreachable(UnreachableReason::BadStatus(response.status().as_u16()))
            }
            Ok(Err(e)) if e.is_timeout() => ProbeOutcome::Unreachable(UnreachableReason::Timeout),
            Ok(Err(e)) => ProbeOutcome::Unreachable(UnreachableReason::Transport(e.to_string())),
            Err(_) => ProbeOutcome::Unreachable(UnreachableReason::Timeout),
        };

        match &outcome {
            ProbeOutcome::Reachable { elapsed } => {
                debug!("Ping({}) at {} took {} ms", peer.id, peer.address, elapsed.as_millis())
            }
            ProbeOutcome::Unreachable(reason) => {
                debug!("Ping({}) at {} failed: {}", peer.id, peer.address, reason)
            }
        }

        ProbeResult {
            server_id: peer.id.clone(),
            outcome,
        }
    }
}
