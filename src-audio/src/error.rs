// ============================================================================
// Error Types
// ============================================================================
//
// One taxonomy for the whole relay. Hardware and effect failures are caught
// where they happen and surface to callers as values, never as panics.

use thiserror::Error;

/// Errors raised by the relay engine
#[derive(Error, Debug)]
pub enum RelayError {
    /// A source or sink could not be opened (device busy, permission revoked, ...)
    #[error("Failed to open audio hardware: {0}")]
    HardwareOpen(String),

    /// A DSP effect is not supported by the current backend
    #[error("Effect unavailable: {0}")]
    EffectUnavailable(String),

    /// A single read or write failed or returned short
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// No output device satisfies the routing policy
    #[error("No compatible output device connected")]
    NoCompatibleDevice,

    /// Required runtime permissions are not granted
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device enumeration or control error
    #[error("Device error: {0}")]
    Device(String),

    /// The stream worker thread could not be spawned
    #[error("Failed to spawn worker: {0}")]
    WorkerSpawn(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Result alias used throughout the crate
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// True for errors the stream loop may skip over
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::TransientIo(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RelayError::HardwareOpen("sink busy".to_string());
        assert_eq!(err.to_string(), "Failed to open audio hardware: sink busy");
        assert!(!err.is_transient());
        assert!(RelayError::TransientIo("short read".into()).is_transient());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RelayError = io.into();
        assert!(matches!(err, RelayError::Io(_)));
    }
}
