//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
///
/// Validation variants render to the exact text carried in an `{error}`
/// frame, so the `Display` output is part of the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Malformed frame header or oversized frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A required field is absent, null or empty.
    #[error("Missing params: {0}")]
    MissingParam(String),

    /// A field is present with the wrong type.
    #[error("Params type must be {expected}: {key}")]
    InvalidParamType {
        key: String,
        expected: &'static str,
    },

    /// The `action` tag is missing or not recognized.
    #[error("Unknown action")]
    UnknownAction,

    /// A server message carried neither a change nor an error.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages() {
        assert_eq!(
            Error::MissingParam("watcher".into()).to_string(),
            "Missing params: watcher"
        );
        assert_eq!(
            Error::InvalidParamType {
                key: "collection".into(),
                expected: "string"
            }
            .to_string(),
            "Params type must be string: collection"
        );
        assert_eq!(Error::UnknownAction.to_string(), "Unknown action");
    }
}
