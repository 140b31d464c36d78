//! Setup-time error types. These are fatal and surface immediately.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity}: expected {expected} pins, got {got}")]
    PinCountMismatch {
        entity: String,
        expected: usize,
        got: usize,
    },

    #[error("{entity}: required parameter `{name}` not given")]
    MissingParameter { entity: String, name: String },

    #[error("model parameter `{name}` out of range: {value}")]
    ModelParameterOutOfRange { name: String, value: f64 },

    #[error("circuit topology error: {0}")]
    CircuitTopology(String),

    #[error("{entity}: unknown parameter `{name}`")]
    UnknownParameter { entity: String, name: String },

    #[error("unknown setting: {0}")]
    UnknownSetting(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("{entity}: no such model `{model}`")]
    NoSuchModel { entity: String, model: String },

    #[error("no behavior registered for {0}")]
    NoBehavior(String),
}

pub type Result<T> = std::result::Result<T, Error>;
