//! Change hub protocol types and serialization.
//!
//! This crate defines the wire protocol shared by the change hub server and
//! client: BSON documents inside length-prefixed frames.
//!
//! # Modules
//!
//! - [`value`] - Dynamic value model and the structural equality used for
//!   subscription deduplication
//! - [`framing`] - Frame encoding and incremental frame decoding
//! - [`codec`] - BSON document encoding on top of framing
//! - [`message`] - Control and event messages with validation
//! - [`error`] - Protocol error types
//!
//! # Example
//!
//! ```ignore
//! use changehub_proto::{codec, Action, WatchRequest};
//!
//! let action = Action::watch(WatchRequest::new("w1", "orders", Default::default()));
//! let frame = codec::encode_document_frame(&action.to_document())?;
//! let doc = codec::decode_document_frame(&frame)?;
//! assert_eq!(Action::from_document(&doc)?, action);
//! ```

pub mod codec;
pub mod error;
pub mod framing;
pub mod message;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use framing::FrameDecoder;
pub use message::{Action, CancelRequest, ServerMessage, WatchRequest};
pub use value::{equal, Map, Value};

/// Re-export of the document codec crate.
pub use bson;

/// Default TCP port shared by server and client.
pub const DEFAULT_PORT: u16 = 37017;

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_default_port() {
        assert_eq!(DEFAULT_PORT, 37017);
    }

    #[test]
    fn test_action_frame_roundtrip() {
        let action = Action::watch(WatchRequest::new("w1", "orders", doc! { "status": "open" }));

        let frame = codec::encode_document_frame(&action.to_document()).unwrap();
        let doc = codec::decode_document_frame(&frame).unwrap();
        assert_eq!(Action::from_document(&doc).unwrap(), action);
    }
}
