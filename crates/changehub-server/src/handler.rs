//! Per-connection control message handling.

use changehub_proto::codec::decode_document;
use changehub_proto::Action;

use crate::error::Error;
use crate::pubsub::SubscriptionRegistry;

/// Dispatches one connection's control messages to the shared registry.
///
/// Holds nothing but the connection id; all subscription state lives in the
/// registry.
pub struct ConnectionHandler {
    id: String,
    registry: SubscriptionRegistry,
}

impl ConnectionHandler {
    /// Create a handler for connection `id`.
    pub fn new(id: impl Into<String>, registry: SubscriptionRegistry) -> Self {
        Self {
            id: id.into(),
            registry,
        }
    }

    /// The connection id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Decode one frame payload and apply it.
    ///
    /// Any error means the connection must be closed with an error frame.
    pub fn handle_payload(&self, payload: &[u8]) -> Result<(), Error> {
        let doc = decode_document(payload)?;
        let action = Action::from_document(&doc)?;
        self.handle_action(action)
    }

    /// Apply a decoded control message.
    pub fn handle_action(&self, action: Action) -> Result<(), Error> {
        match action {
            Action::Watch(request) => {
                self.registry.watch(&self.id, request)?;
            }
            Action::Cancel(request) => {
                self.registry.cancel(&self.id, &request.watcher);
            }
        }
        Ok(())
    }

    /// Cancel everything this connection owned.
    pub fn close(&self) {
        let cancelled = self.registry.remove_connection(&self.id);
        tracing::debug!(connection_id = %self.id, cancelled, "handler closed");
    }
}
