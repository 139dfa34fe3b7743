//! Runtime-level errors shared by the configuration and logging layers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required bridge was not injected and no platform default exists.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// The caller is not inside a Tokio runtime.
    #[error("No async runtime available: {0}")]
    RuntimeUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
