//! Per-subscription records.

use std::time::{Duration, Instant};

/// Binds one client subscription to its connection and stream.
#[derive(Debug, Clone)]
pub struct Watcher {
    /// Client-assigned subscription id.
    pub id: String,
    /// Owning connection id.
    pub connection: String,
    /// Stream the watcher is attached to.
    pub stream: String,
    /// When the watcher was created.
    pub created_at: Instant,
    /// Number of change frames queued for this watcher.
    pub events_sent: u64,
}

impl Watcher {
    /// Create a new watcher.
    pub fn new(
        id: impl Into<String>,
        connection: impl Into<String>,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            connection: connection.into(),
            stream: stream.into(),
            created_at: Instant::now(),
            events_sent: 0,
        }
    }

    /// Get the age of this watcher.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Increment the events sent counter.
    pub fn record_event(&mut self) {
        self.events_sent += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watcher_entry() {
        let mut watcher = Watcher::new("w1", "conn-1", "stream-1");
        assert_eq!(watcher.id, "w1");
        assert_eq!(watcher.connection, "conn-1");
        assert_eq!(watcher.stream, "stream-1");
        assert_eq!(watcher.events_sent, 0);

        watcher.record_event();
        watcher.record_event();
        assert_eq!(watcher.events_sent, 2);
    }
}
