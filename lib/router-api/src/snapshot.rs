//! Full registry snapshot as distributed to agents by `/full-router`

use crate::{Role, RoleCatalog, ServerId, ServerRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

/// All servers of one role and the port they listen on
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTable {
    pub port: u16,
    #[serde(default)]
    pub servers: BTreeMap<ServerId, ServerRecord>,
}

impl RoleTable {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            servers: BTreeMap::new(),
        }
    }

    /// Probe address of a registered server, `ip:port`
    pub fn host_and_port(&self, place: &str) -> Option<String> {
        self.servers
            .get(place)
            .map(|record| resolve_address(&record.ip, self.port))
    }

    /// Every server of this role except `exclude`, with its probe address
    pub fn peers(&self, exclude: Option<&str>) -> Vec<Peer> {
        self.servers
            .values()
            .filter(|record| Some(record.place.as_str()) != exclude)
            .map(|record| Peer {
                id: record.place.clone(),
                address: resolve_address(&record.ip, self.port),
            })
            .collect()
    }
}

/// A peer to be probed: its id and the `host:port` it answers on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub id: ServerId,
    pub address: String,
}

impl Peer {
    pub fn new(id: impl Into<ServerId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// The whole registry, partitioned by role
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeshSnapshot {
    pub roles: BTreeMap<Role, RoleTable>,
}

impl MeshSnapshot {
    /// An empty table for every role in the catalog
    pub fn from_catalog(catalog: &RoleCatalog) -> Self {
        let roles = catalog
            .roles()
            .filter_map(|role| catalog.port(role).map(|port| (role, RoleTable::new(port))))
            .collect();
        Self { roles }
    }

    pub fn table(&self, role: Role) -> Option<&RoleTable> {
        self.roles.get(&role)
    }

    pub fn get(&self, role: Role, place: &str) -> Option<&ServerRecord> {
        self.roles.get(&role).and_then(|table| table.servers.get(place))
    }

    pub fn contains(&self, role: Role, place: &str) -> bool {
        self.get(role, place).is_some()
    }

    /// Peers of `role`, excluding `exclude`; empty when the role is unknown
    pub fn peers(&self, role: Role, exclude: Option<&str>) -> Vec<Peer> {
        self.table(role)
            .map(|table| table.peers(exclude))
            .unwrap_or_default()
    }

    pub fn server_count(&self) -> usize {
        self.roles.values().map(|table| table.servers.len()).sum()
    }
}

/// `ip` already carrying a port is used as is, otherwise the role port is appended
pub fn resolve_address(ip: &str, port: u16) -> String {
    if ip.parse::<SocketAddr>().is_ok() {
        return ip.to_string();
    }
    match ip.parse::<IpAddr>() {
        Ok(addr) => SocketAddr::new(addr, port).to_string(),
        Err(_) => format!("{}:{}", ip, port),
    }
}
