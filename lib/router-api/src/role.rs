//! Role catalog: the fixed set of server roles known at startup

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A category of server participating in the mesh
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "Node_Router")]
    Node,
    #[serde(rename = "Chat_Router")]
    Chat,
    #[serde(rename = "Media_Router")]
    Media,
}

impl Role {
    /// Every role, in catalog order
    pub const ALL: [Role; 3] = [Role::Node, Role::Chat, Role::Media];

    /// Wire name of the role, as used in `serverType` and snapshot keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Node => "Node_Router",
            Role::Chat => "Chat_Router",
            Role::Media => "Media_Router",
        }
    }

    /// Port every server of this role listens on unless overridden
    pub fn default_port(&self) -> u16 {
        match self {
            Role::Node => 8083,
            Role::Chat => 8082,
            Role::Media => 8081,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown role: {0}")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    /// Accepts the wire name (`Chat_Router`) or the short name (`chat`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "node" | "node_router" => Ok(Role::Node),
            "chat" | "chat_router" => Ok(Role::Chat),
            "media" | "media_router" => Ok(Role::Media),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}

/// The roles served by a registry and the port each role listens on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleCatalog {
    ports: Vec<(Role, u16)>,
}

impl RoleCatalog {
    pub fn new(ports: Vec<(Role, u16)>) -> Self {
        Self { ports }
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.ports.iter().map(|(role, _)| *role)
    }

    pub fn port(&self, role: Role) -> Option<u16> {
        self.ports
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, port)| *port)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.port(role).is_some()
    }
}

impl Default for RoleCatalog {
    fn default() -> Self {
        Self::new(Role::ALL.iter().map(|r| (*r, r.default_port())).collect())
    }
}
