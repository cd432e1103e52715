use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to open process: {0}")]
    ProcessOpenFailed(String),

    #[error("Failed to read process memory at address {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("Failed to write process memory at address {address:#x}: {message}")]
    MemoryWriteFailed { address: u64, message: String },

    #[error("Malformed signature '{pattern}': {reason}")]
    MalformedSignature { pattern: String, reason: String },

    #[error("Unsupported IL2CPP metadata version: expected {expected}, got {actual}")]
    UnsupportedMetadataVersion { expected: String, actual: String },

    #[error("Invalid IL2CPP metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid IL2CPP binary: {0}")]
    InvalidBinary(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Stale reference at address {0:#x}")]
    StaleReference(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_read_fault(&self) -> bool {
        matches!(self, Error::MemoryReadFailed { .. })
    }

    pub(crate) fn read_failed(address: u64, message: impl Into<String>) -> Self {
        Error::MemoryReadFailed {
            address,
            message: message.into(),
        }
    }
}
