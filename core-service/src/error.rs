use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Preload error: {0}")]
    Preload(#[from] core_preload::PreloadError),
}

impl CoreError {
    /// Listener-facing code for preload failures, if this is one.
    pub fn preload_code(&self) -> Option<core_preload::PreloadErrorCode> {
        match self {
            CoreError::Preload(e) => Some(e.code()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
