//! Deduplicated upstream feeds.

use std::collections::BTreeSet;

use bson::Document;
use tokio::task::JoinHandle;

use changehub_proto::value::{document_to_map, equal_maps};
use changehub_proto::Map;

/// One upstream feed shared by every watcher with an equal
/// (db, collection, filters) triple.
#[derive(Debug)]
pub struct Stream {
    /// Unique stream id.
    pub id: String,
    /// Database name.
    pub db: String,
    /// Collection name.
    pub collection: String,
    /// Filter specification the feed was opened with, as first requested.
    pub filters: Document,
    /// `filters` lifted for deduplication.
    key: Map,
    /// Ids of the attached watchers.
    pub watchers: BTreeSet<String>,
    /// Task pumping the upstream feed, if started.
    pub(crate) feed: Option<JoinHandle<()>>,
}

impl Stream {
    /// Create a stream with no watchers and no feed.
    pub fn new(db: impl Into<String>, collection: impl Into<String>, filters: Document) -> Self {
        Self {
            id: bson::oid::ObjectId::new().to_hex(),
            db: db.into(),
            collection: collection.into(),
            key: document_to_map(&filters),
            filters,
            watchers: BTreeSet::new(),
            feed: None,
        }
    }

    /// Whether a request for `db.collection` whose filters lift to `key` can
    /// share this stream.
    pub fn matches(&self, db: &str, collection: &str, key: &Map) -> bool {
        self.db == db && self.collection == collection && equal_maps(&self.key, key)
    }

    /// Whether the feed task is alive.
    pub fn is_running(&self) -> bool {
        self.feed.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the feed task. Dropping the feed closes the upstream cursor.
    pub fn stop(&mut self) {
        if let Some(task) = self.feed.take() {
            task.abort();
        }
    }

    /// Snapshot for introspection.
    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            id: self.id.clone(),
            db: self.db.clone(),
            collection: self.collection.clone(),
            watchers: self.watchers.len(),
            running: self.is_running(),
        }
    }
}

/// Point-in-time view of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream id.
    pub id: String,
    /// Database name.
    pub db: String,
    /// Collection name.
    pub collection: String,
    /// Number of attached watchers.
    pub watchers: usize,
    /// Whether the feed task is alive.
    pub running: bool,
}
