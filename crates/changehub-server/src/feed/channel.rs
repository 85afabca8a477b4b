//! In-process feed source driven by explicit publishes.

use std::sync::Arc;

use bson::Document;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ChangeFeed, FeedRequest, FeedSource};
use crate::error::Error;

type FeedSender = mpsc::UnboundedSender<Result<Document, Error>>;

struct OpenFeed {
    request: FeedRequest,
    tx: FeedSender,
}

#[derive(Default)]
struct ChannelState {
    feeds: Vec<OpenFeed>,
    requests: Vec<FeedRequest>,
}

/// A feed source whose feeds are fed by [`ChannelFeedSource::publish`].
///
/// Match stages are recorded but not evaluated: a published document reaches
/// every live feed of its collection. A feed counts as live until the
/// registry drops it.
#[derive(Clone, Default)]
pub struct ChannelFeedSource {
    inner: Arc<Mutex<ChannelState>>,
}

impl ChannelFeedSource {
    /// Create a new channel feed source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a change document to every live feed on `db.collection`.
    ///
    /// Returns the number of feeds that received it.
    pub fn publish(&self, db: &str, collection: &str, change: Document) -> usize {
        let mut state = self.inner.lock();
        state.feeds.retain(|feed| !feed.tx.is_closed());

        let mut delivered = 0;
        for feed in &state.feeds {
            if feed.request.db == db
                && feed.request.collection == collection
                && feed.tx.send(Ok(change.clone())).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Fail every live feed on `db.collection`.
    pub fn fail(&self, db: &str, collection: &str, message: &str) {
        let state = self.inner.lock();
        for feed in &state.feeds {
            if feed.request.db == db && feed.request.collection == collection {
                let _ = feed.tx.send(Err(Error::Feed(message.to_string())));
            }
        }
    }

    /// Number of feeds currently held open by a consumer.
    pub fn open_feeds(&self) -> usize {
        let state = self.inner.lock();
        state.feeds.iter().filter(|feed| !feed.tx.is_closed()).count()
    }

    /// Live feeds on one collection.
    pub fn open_feeds_for(&self, db: &str, collection: &str) -> usize {
        let state = self.inner.lock();
        state
            .feeds
            .iter()
            .filter(|feed| {
                !feed.tx.is_closed()
                    && feed.request.db == db
                    && feed.request.collection == collection
            })
            .count()
    }

    /// Every open request received so far, oldest first.
    pub fn requests(&self) -> Vec<FeedRequest> {
        self.inner.lock().requests.clone()
    }
}

impl FeedSource for ChannelFeedSource {
    fn open(
        &self,
        request: FeedRequest,
    ) -> futures::future::BoxFuture<'static, Result<ChangeFeed, Error>> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.inner.lock();
            state.requests.push(request.clone());
            state.feeds.push(OpenFeed { request, tx });
        }

        let feed = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        async move { Ok::<_, Error>(feed) }.boxed()
    }
}
