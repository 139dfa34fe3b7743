use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the failure came from the transport rather than the local host.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            BridgeError::HttpStatus { .. } | BridgeError::Timeout(_) | BridgeError::OperationFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
