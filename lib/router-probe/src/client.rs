//! HTTP clients for the meta router API and for agents' score documents

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use router_api::{MeshSnapshot, Scores, ServerRecord};
use std::time::Duration;
use tracing::debug;

/// The registry operations an agent relies on
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Push a server record, replacing any previous one with the same role and place
    async fn register(&self, record: &ServerRecord) -> Result<()>;

    /// Pull the full registry
    async fn snapshot(&self) -> Result<MeshSnapshot>;
}

/// Client for the meta router's `/new-server` and `/full-router` endpoints
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building registry HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn register(&self, record: &ServerRecord) -> Result<()> {
        let url = format!("{}/new-server", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(record)
            .send()
            .await
            .with_context(|| format!("pushing {}/{} to {}", record.role, record.place, url))?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            bail!("registry rejected {}/{}: {} {}", record.role, record.place, status, reason.trim());
        }

        debug!("Registered {}/{} with {}", record.role, record.place, self.base_url);
        Ok(())
    }

    async fn snapshot(&self) -> Result<MeshSnapshot> {
        let url = format!("{}/full-router", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetching {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("fetching {}: status {}", url, status);
        }

        response
            .json::<MeshSnapshot>()
            .await
            .with_context(|| format!("decoding snapshot from {}", url))
    }
}

/// Source of the score documents published by agents
#[async_trait]
pub trait ScoreSource: Send + Sync {
    /// Fetch the score document served at `address` (`host:port`)
    async fn fetch_scores(&self, address: &str) -> Result<Scores>;
}

/// Fetches `GET http://{address}/route-scores`
pub struct ScoreClient {
    client: reqwest::Client,
}

impl ScoreClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building score HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ScoreSource for ScoreClient {
    async fn fetch_scores(&self, address: &str) -> Result<Scores> {
        let url = format!("http://{}/route-scores", address);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetching {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("fetching {}: status {}", url, status);
        }

        response
            .json::<Scores>()
            .await
            .with_context(|| format!("decoding scores from {}", url))
    }
}
