//! Connection table entries.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Work queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One encoded frame.
    Frame(Bytes),
    /// Flush what was queued before and shut the socket down.
    Close,
}

/// Sending half of a connection's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// A registered client connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Unique connection id.
    pub id: String,
    /// Peer address, when known.
    pub remote: Option<SocketAddr>,
    tx: OutboundSender,
}

impl ConnectionHandle {
    /// Create a handle that writes into `tx`.
    pub fn new(id: impl Into<String>, remote: Option<SocketAddr>, tx: OutboundSender) -> Self {
        Self {
            id: id.into(),
            remote,
            tx,
        }
    }

    /// Queue a frame. Returns false once the writer has gone away.
    pub fn send(&self, frame: Bytes) -> bool {
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    /// Ask the writer to shut the socket down after pending frames.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// Whether the writer is still accepting frames.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Generate a fresh connection id.
pub fn next_connection_id() -> String {
    bson::oid::ObjectId::new().to_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new("c1", None, tx);

        assert!(handle.send(Bytes::from_static(b"frame")));
        handle.close();

        assert_eq!(rx.try_recv().unwrap(), Outbound::Frame(Bytes::from_static(b"frame")));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn test_send_after_writer_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new("c1", None, tx);
        drop(rx);

        assert!(!handle.is_open());
        assert!(!handle.send(Bytes::new()));
    }

    #[test]
    fn test_connection_ids_unique() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert_eq!(a.len(), 24);
        assert_ne!(a, b);
    }
}
