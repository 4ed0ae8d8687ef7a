use thiserror::Error;

/// Error type shared across the fabric.
///
/// The allocation controller absorbs `Transport`, `Protocol`, and `Timeout`
/// while iterating over candidates; its surface error is always `NotFound`
/// or, for the better-than variant, `NoImprovement`. `Unreachable` only
/// occurs inside the sweeper, where it results in immediate eviction.
#[derive(Error, Debug)]
pub enum FabricError {
    #[error("no usable provider: {0}")]
    NotFound(String),

    #[error("no allocator with better performance is available")]
    NoImprovement,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("peer unreachable")]
    Unreachable,

    #[error("remote service is dead")]
    ServiceDead,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<quinn::ConnectError> for FabricError {
    fn from(err: quinn::ConnectError) -> Self {
        FabricError::Transport(err.to_string())
    }
}

impl From<quinn::ConnectionError> for FabricError {
    fn from(err: quinn::ConnectionError) -> Self {
        FabricError::Transport(err.to_string())
    }
}

impl From<quinn::WriteError> for FabricError {
    fn from(err: quinn::WriteError) -> Self {
        FabricError::Transport(err.to_string())
    }
}

impl From<quinn::ClosedStream> for FabricError {
    fn from(err: quinn::ClosedStream) -> Self {
        FabricError::Transport(err.to_string())
    }
}

impl From<rustls::Error> for FabricError {
    fn from(err: rustls::Error) -> Self {
        FabricError::Transport(err.to_string())
    }
}

impl From<std::net::AddrParseError> for FabricError {
    fn from(err: std::net::AddrParseError) -> Self {
        FabricError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FabricError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_the_subject() {
        let err = FabricError::NotFound("deadbeef".to_string());
        assert!(err.to_string().contains("deadbeef"));
    }

    #[test]
    fn test_timeout_message_includes_millis() {
        let err = FabricError::Timeout(250);
        assert!(err.to_string().contains("250"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: FabricError = io.into();
        assert!(matches!(err, FabricError::Io(_)));
    }
}
