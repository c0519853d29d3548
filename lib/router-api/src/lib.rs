//! Meta router wire types
//!
//! This library defines the types exchanged between the meta router and the
//! route agents:
//! - Role: the fixed catalog of server roles and their ports
//! - ServerRecord: one server and its latency rankings per role
//! - Scores: the score document an agent publishes
//! - MeshSnapshot: the full registry, role-partitioned

pub mod role;
pub mod server;
pub mod snapshot;

pub use role::{ParseRoleError, Role, RoleCatalog};
pub use server::{Ranking, Scores, ServerId, ServerRecord};
pub use snapshot::{resolve_address, MeshSnapshot, Peer, RoleTable};
