//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] changehub_proto::Error),

    /// Upstream change feed error.
    #[error("change feed error: {0}")]
    Feed(String),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Text sent to a client in an `{error}` frame.
    ///
    /// Protocol errors carry their own wire text; everything else uses the
    /// full message.
    pub fn client_message(&self) -> String {
        match self {
            Error::Protocol(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}
