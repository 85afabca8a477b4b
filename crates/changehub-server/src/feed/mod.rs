//! Upstream change feeds.
//!
//! The registry never talks to the database driver directly. It asks a
//! [`FeedSource`] to open a filtered feed for one collection and consumes
//! the resulting stream of change documents until it is dropped.

mod channel;
#[cfg(feature = "mongodb")]
mod mongo;

use std::time::Duration;

use bson::Document;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_REOPEN_DELAY};
use crate::error::Error;

pub use channel::ChannelFeedSource;
#[cfg(feature = "mongodb")]
pub use mongo::MongoFeedSource;

/// A live feed of change documents. Dropping it closes the upstream cursor.
pub type ChangeFeed = BoxStream<'static, Result<Document, Error>>;

/// Options applied to every opened feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedOptions {
    /// Include the full post-change document in update events.
    pub full_document_lookup: bool,
    /// Cursor batch size.
    pub batch_size: u32,
    /// Wait before reopening a feed that failed or ended while watched.
    pub reopen_delay: Duration,
}

impl FeedOptions {
    /// Set the cursor batch size.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the reopen delay.
    pub fn with_reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            full_document_lookup: true,
            batch_size: DEFAULT_BATCH_SIZE,
            reopen_delay: DEFAULT_REOPEN_DELAY,
        }
    }
}

/// Everything needed to open one upstream feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    /// Database name.
    pub db: String,
    /// Collection name.
    pub collection: String,
    /// Aggregation pipeline, empty for an unfiltered feed.
    pub pipeline: Vec<Document>,
    /// Cursor options.
    pub options: FeedOptions,
}

/// Opens change feeds on the upstream database.
pub trait FeedSource: Send + Sync + 'static {
    /// Open a feed. The returned stream yields change documents in upstream
    /// order and ends when the upstream closes it.
    fn open(&self, request: FeedRequest) -> BoxFuture<'static, Result<ChangeFeed, Error>>;
}
