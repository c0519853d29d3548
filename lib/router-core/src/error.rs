use router_api::Role;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown role: {0}")]
    UnknownRole(Role),

    #[error("Server not found: {role}/{place}")]
    ServerNotFound { role: Role, place: String },

    #[error("Server {role}/{place} re-registered at {current}, dropping scores from {fetched}")]
    StaleRecord {
        role: Role,
        place: String,
        fetched: String,
        current: String,
    },

    #[error("Invalid server record: {0}")]
    InvalidRecord(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
