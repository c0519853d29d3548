//! Core registry functionality for the meta router
//!
//! This library provides:
//! - Registry store holding every registered server, role-partitioned
//! - Score merging for rankings fetched back from agents

pub mod registry;
pub mod error;

pub use registry::{RegisteredServer, RegistryStore};
pub use error::{CoreError, Result};
