//! Registry store for every server known to the meta router

use crate::{CoreError, Result};
use router_api::{resolve_address, MeshSnapshot, Role, RoleCatalog, Scores, ServerRecord};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// RegistryStore maintains the role-partitioned map of registered servers
#[derive(Clone)]
pub struct RegistryStore {
    // One lock over the whole map: registrations and merges are infrequent
    tables: Arc<RwLock<MeshSnapshot>>,
    catalog: RoleCatalog,
}

/// A registered server together with the address its endpoints answer on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredServer {
    pub record: ServerRecord,
    pub address: String,
}

impl RegistryStore {
    /// Create an empty store with one table per catalog role
    pub fn new(catalog: RoleCatalog) -> Self {
        Self {
            tables: Arc::new(RwLock::new(MeshSnapshot::from_catalog(&catalog))),
            catalog,
        }
    }

    pub fn catalog(&self) -> &RoleCatalog {
        &self.catalog
    }

    /// Register or replace a server. The whole record is replaced, no field merge.
    pub async fn register(&self, record: ServerRecord) -> Result<()> {
        if record.place.trim().is_empty() {
            return Err(CoreError::InvalidRecord("empty place".to_string()));
        }
        if record.ip.trim().is_empty() {
            return Err(CoreError::InvalidRecord("empty ip".to_string()));
        }

        let mut tables = self.tables.write().await;
        let table = tables
            .roles
            .get_mut(&record.role)
            .ok_or(CoreError::UnknownRole(record.role))?;

        debug!("Registered server: {}/{} at {}", record.role, record.place, record.ip);
        table.servers.insert(record.place.clone(), record);
        Ok(())
    }

    /// Decode a JSON server record and register it
    pub async fn register_json(&self, body: &[u8]) -> Result<ServerRecord> {
        let record: ServerRecord = serde_json::from_slice(body)?;
        self.register(record.clone()).await?;
        Ok(record)
    }

    /// Copy of the full registry
    pub async fn snapshot(&self) -> MeshSnapshot {
        self.tables.read().await.clone()
    }

    /// Overwrite the rankings of one server, leaving role, place and ip untouched.
    ///
    /// `ip` is the address the scores were fetched from; a record re-registered
    /// elsewhere since then is left alone.
    pub async fn merge_scores(
        &self,
        role: Role,
        place: &str,
        ip: &str,
        scores: Scores,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .roles
            .get_mut(&role)
            .and_then(|table| table.servers.get_mut(place))
            .ok_or_else(|| CoreError::ServerNotFound {
                role,
                place: place.to_string(),
            })?;

        if record.ip != ip {
            return Err(CoreError::StaleRecord {
                role,
                place: place.to_string(),
                fetched: ip.to_string(),
                current: record.ip.clone(),
            });
        }

        record.apply_scores(scores);
        debug!("Merged scores for server: {}/{}", role, place);
        Ok(())
    }

    /// Get a single server record
    pub async fn get_server(&self, role: Role, place: &str) -> Result<ServerRecord> {
        let tables = self.tables.read().await;
        tables.get(role, place).cloned().ok_or_else(|| CoreError::ServerNotFound {
            role,
            place: place.to_string(),
        })
    }

    /// List all servers with their resolved addresses
    pub async fn servers(&self) -> Vec<RegisteredServer> {
        let tables = self.tables.read().await;
        tables
            .roles
            .values()
            .flat_map(|table| {
                table.servers.values().map(move |record| RegisteredServer {
                    record: record.clone(),
                    address: resolve_address(&record.ip, table.port),
                })
            })
            .collect()
    }

    /// Get count of registered servers
    pub async fn server_count(&self) -> usize {
        self.tables.read().await.server_count()
    }
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new(RoleCatalog::default())
    }
}
