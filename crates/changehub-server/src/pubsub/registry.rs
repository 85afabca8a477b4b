//! Stream, watcher and connection tables.

use std::collections::HashMap;
use std::sync::Arc;

use bson::Document;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;

use changehub_proto::codec::encode_document_frame;
use changehub_proto::value::document_to_map;
use changehub_proto::{ServerMessage, WatchRequest};

use super::stream::{Stream, StreamInfo};
use super::watcher::Watcher;
use crate::connection::ConnectionHandle;
use crate::error::Error;
use crate::feed::{FeedOptions, FeedRequest, FeedSource};
use crate::filter::build_pipeline;

#[derive(Default)]
struct State {
    streams: HashMap<String, Stream>,
    watchers: HashMap<String, Watcher>,
    connections: HashMap<String, ConnectionHandle>,
}

struct Shared {
    state: Mutex<State>,
    source: Arc<dyn FeedSource>,
    options: FeedOptions,
    default_db: String,
}

/// Registry of live streams, their watchers and the connections that own them.
///
/// All table mutation happens under one lock, so a stream holds a running
/// feed exactly while it has at least one watcher. Cloning is cheap and every
/// clone shares the same tables.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    shared: Arc<Shared>,
}

impl SubscriptionRegistry {
    /// Create an empty registry opening feeds through `source`.
    ///
    /// `default_db` applies to watch requests that do not name a database.
    pub fn new(
        source: Arc<dyn FeedSource>,
        options: FeedOptions,
        default_db: impl Into<String>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                source,
                options,
                default_db: default_db.into(),
            }),
        }
    }

    /// Database used when a request does not name one.
    pub fn default_db(&self) -> &str {
        &self.shared.default_db
    }

    /// Add a connection to the connection table.
    pub fn register_connection(&self, connection: ConnectionHandle) {
        tracing::debug!(connection_id = %connection.id, remote = ?connection.remote, "connection registered");
        self.shared
            .state
            .lock()
            .connections
            .insert(connection.id.clone(), connection);
    }

    /// Drop a connection and cancel every watcher it owned.
    ///
    /// Returns the number of watchers cancelled.
    pub fn remove_connection(&self, connection_id: &str) -> usize {
        let mut state = self.shared.state.lock();
        state.connections.remove(connection_id);

        let owned: Vec<String> = state
            .watchers
            .values()
            .filter(|watcher| watcher.connection == connection_id)
            .map(|watcher| watcher.id.clone())
            .collect();

        for watcher_id in &owned {
            cancel_locked(&mut state, watcher_id);
        }

        tracing::debug!(connection_id, cancelled = owned.len(), "connection removed");
        owned.len()
    }

    /// Attach a watcher for `connection_id`, reusing an equal stream or
    /// starting a new one.
    ///
    /// Returns the id of the stream the watcher joined.
    pub fn watch(&self, connection_id: &str, request: WatchRequest) -> Result<String, Error> {
        let WatchRequest {
            watcher: watcher_id,
            db,
            collection,
            filters,
        } = request;
        let db = db.unwrap_or_else(|| self.shared.default_db.clone());
        let key = document_to_map(&filters);

        let mut state = self.shared.state.lock();
        if !state.connections.contains_key(connection_id) {
            return Err(Error::Transport(format!(
                "unknown connection {}",
                connection_id
            )));
        }

        if state.watchers.contains_key(&watcher_id) {
            tracing::debug!(watcher_id = %watcher_id, "replacing existing watcher");
            cancel_locked(&mut state, &watcher_id);
        }

        let existing = state
            .streams
            .values()
            .find(|stream| stream.matches(&db, &collection, &key))
            .map(|stream| stream.id.clone());

        let stream_id = match existing {
            Some(id) => id,
            None => {
                let stream = Stream::new(db.clone(), collection.clone(), filters);
                let id = stream.id.clone();
                state.streams.insert(id.clone(), stream);
                id
            }
        };

        state.watchers.insert(
            watcher_id.clone(),
            Watcher::new(watcher_id.clone(), connection_id, stream_id.clone()),
        );

        tracing::info!(
            connection_id,
            watcher_id = %watcher_id,
            stream_id = %stream_id,
            db = %db,
            collection = %collection,
            "watch"
        );

        if let Some(stream) = state.streams.get_mut(&stream_id) {
            stream.watchers.insert(watcher_id);
            if !stream.is_running() {
                let request = FeedRequest {
                    db: stream.db.clone(),
                    collection: stream.collection.clone(),
                    pipeline: build_pipeline(&stream.filters),
                    options: self.shared.options.clone(),
                };
                stream.feed = Some(tokio::spawn(run_feed(
                    self.shared.clone(),
                    stream_id.clone(),
                    request,
                )));
                tracing::info!(stream_id = %stream_id, db = %stream.db, collection = %stream.collection, "start");
            }
        }

        Ok(stream_id)
    }

    /// Cancel a watcher owned by `connection_id`.
    ///
    /// Unknown ids and watchers owned by other connections are ignored and
    /// return false.
    pub fn cancel(&self, connection_id: &str, watcher_id: &str) -> bool {
        let mut state = self.shared.state.lock();
        match state.watchers.get(watcher_id) {
            None => {
                tracing::debug!(connection_id, watcher_id, "cancel for unknown watcher");
                false
            }
            Some(watcher) if watcher.connection != connection_id => {
                tracing::warn!(
                    connection_id,
                    watcher_id,
                    owner = %watcher.connection,
                    "cancel for watcher owned by another connection"
                );
                false
            }
            Some(_) => {
                tracing::info!(connection_id, watcher_id, "cancel");
                cancel_locked(&mut state, watcher_id);
                true
            }
        }
    }

    /// Number of live streams.
    pub fn stream_count(&self) -> usize {
        self.shared.state.lock().streams.len()
    }

    /// Number of live watchers.
    pub fn watcher_count(&self) -> usize {
        self.shared.state.lock().watchers.len()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.shared.state.lock().connections.len()
    }

    /// Find the stream serving `db.collection` with filters equal to `filters`.
    pub fn find_stream(&self, db: &str, collection: &str, filters: &Document) -> Option<StreamInfo> {
        let key = document_to_map(filters);
        self.shared
            .state
            .lock()
            .streams
            .values()
            .find(|stream| stream.matches(db, collection, &key))
            .map(Stream::info)
    }

    /// Snapshot of every live stream.
    pub fn streams(&self) -> Vec<StreamInfo> {
        self.shared
            .state
            .lock()
            .streams
            .values()
            .map(Stream::info)
            .collect()
    }

    /// Stop every stream, drop every watcher and close every connection.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        for (_, mut stream) in state.streams.drain() {
            stream.stop();
            tracing::info!(stream_id = %stream.id, collection = %stream.collection, "stop");
        }
        state.watchers.clear();
        for (_, connection) in state.connections.drain() {
            connection.close();
        }
    }
}

/// Remove a watcher and tear its stream down when it was the last one.
fn cancel_locked(state: &mut State, watcher_id: &str) {
    let Some(watcher) = state.watchers.remove(watcher_id) else {
        return;
    };
    tracing::debug!(
        watcher_id,
        stream_id = %watcher.stream,
        events_sent = watcher.events_sent,
        age_ms = watcher.age().as_millis() as u64,
        "watcher removed"
    );

    let now_empty = match state.streams.get_mut(&watcher.stream) {
        Some(stream) => {
            stream.watchers.remove(watcher_id);
            stream.watchers.is_empty()
        }
        None => false,
    };

    if now_empty {
        if let Some(mut stream) = state.streams.remove(&watcher.stream) {
            stream.stop();
            tracing::info!(
                stream_id = %stream.id,
                db = %stream.db,
                collection = %stream.collection,
                "stop"
            );
        }
    }
}

/// Pump one upstream feed for as long as its stream exists.
///
/// A feed that fails to open, errors or ends is reopened after the
/// configured delay. Removing the stream aborts this task, which drops the
/// feed and closes the upstream cursor.
async fn run_feed(shared: Arc<Shared>, stream_id: String, request: FeedRequest) {
    let collection = request.collection.clone();
    let reopen_delay = request.options.reopen_delay;

    loop {
        match shared.source.open(request.clone()).await {
            Ok(mut feed) => {
                while let Some(item) = feed.next().await {
                    match item {
                        Ok(change) => {
                            if !broadcast(&shared, &stream_id, change) {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::error!(stream_id = %stream_id, collection = %collection, error = %e, "feed error");
                            break;
                        }
                    }
                }
                tracing::warn!(stream_id = %stream_id, collection = %collection, "feed ended");
            }
            Err(e) => {
                tracing::error!(stream_id = %stream_id, collection = %collection, error = %e, "failed to open feed");
            }
        }

        if !stream_exists(&shared, &stream_id) {
            return;
        }
        tracing::info!(
            stream_id = %stream_id,
            delay_ms = reopen_delay.as_millis() as u64,
            "reopening feed"
        );
        tokio::time::sleep(reopen_delay).await;
        if !stream_exists(&shared, &stream_id) {
            return;
        }
    }
}

/// Streams live only while they have watchers.
fn stream_exists(shared: &Shared, stream_id: &str) -> bool {
    shared.state.lock().streams.contains_key(stream_id)
}

/// Queue one change frame per attached watcher, in watcher order.
///
/// Returns false when the stream no longer exists.
fn broadcast(shared: &Shared, stream_id: &str, change: Document) -> bool {
    let mut state = shared.state.lock();
    let State {
        streams,
        watchers,
        connections,
    } = &mut *state;

    let Some(stream) = streams.get(stream_id) else {
        return false;
    };

    for watcher_id in &stream.watchers {
        let Some(watcher) = watchers.get_mut(watcher_id) else {
            continue;
        };
        let Some(connection) = connections.get(&watcher.connection) else {
            continue;
        };

        let message = ServerMessage::change(watcher_id.as_str(), change.clone());
        match encode_document_frame(&message.to_document()) {
            Ok(frame) => {
                if connection.send(Bytes::from(frame)) {
                    watcher.record_event();
                }
            }
            Err(e) => {
                tracing::warn!(watcher_id = %watcher_id, error = %e, "failed to encode change");
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::feed::ChannelFeedSource;
    use bson::doc;
    use changehub_proto::codec::decode_document_frame;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn registry(source: &ChannelFeedSource) -> SubscriptionRegistry {
        let options = FeedOptions::default().with_reopen_delay(Duration::from_millis(50));
        SubscriptionRegistry::new(Arc::new(source.clone()), options, "shop")
    }

    fn connect(
        registry: &SubscriptionRegistry,
        id: &str,
    ) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register_connection(ConnectionHandle::new(id, None, tx));
        rx
    }

    fn watch(watcher: &str, collection: &str, filters: Document) -> WatchRequest {
        WatchRequest::new(watcher, collection, filters)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn next_change(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> ServerMessage {
        let outbound = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match outbound {
            Outbound::Frame(frame) => {
                ServerMessage::from_document(decode_document_frame(&frame).unwrap()).unwrap()
            }
            Outbound::Close => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn test_equal_requests_share_stream() {
        let source = ChannelFeedSource::new();
        let registry = registry(&source);
        let _rx = connect(&registry, "c1");

        let s1 = registry
            .watch("c1", watch("w1", "orders", doc! { "status": "open", "n": 1 }))
            .unwrap();
        let s2 = registry
            .watch("c1", watch("w2", "orders", doc! { "n": 1, "status": "open" }))
            .unwrap();
        let s3 = registry
            .watch("c1", watch("w3", "orders", doc! { "status": "held" }))
            .unwrap();

        assert_eq!(s1, s2);
        assert_ne!(s1, s3);
        assert_eq!(registry.stream_count(), 2);
        assert_eq!(registry.watcher_count(), 3);

        wait_until(|| source.open_feeds() == 2).await;
        let requests = source.requests();
        assert!(requests
            .iter()
            .any(|r| r.pipeline == vec![doc! { "$match": { "fullDocument.status": "held" } }]));
        assert!(requests.iter().all(|r| r.db == "shop" && r.options.full_document_lookup));
    }

    #[tokio::test]
    async fn test_last_cancel_stops_stream() {
        let source = ChannelFeedSource::new();
        let registry = registry(&source);
        let _rx = connect(&registry, "c1");

        registry.watch("c1", watch("w1", "orders", doc! {})).unwrap();
        registry.watch("c1", watch("w2", "orders", doc! {})).unwrap();
        wait_until(|| source.open_feeds() == 1).await;

        assert!(registry.cancel("c1", "w1"));
        assert_eq!(registry.stream_count(), 1);
        assert!(registry.find_stream("shop", "orders", &doc! {}).is_some());

        assert!(registry.cancel("c1", "w2"));
        assert_eq!(registry.stream_count(), 0);
        assert_eq!(registry.watcher_count(), 0);
        wait_until(|| source.open_feeds() == 0).await;
    }

    #[tokio::test]
    async fn test_cancel_ignores_unknown_and_foreign() {
        let source = ChannelFeedSource::new();
        let registry = registry(&source);
        let _rx1 = connect(&registry, "c1");
        let _rx2 = connect(&registry, "c2");

        registry.watch("c1", watch("w1", "orders", doc! {})).unwrap();

        assert!(!registry.cancel("c1", "missing"));
        assert!(!registry.cancel("c2", "w1"));
        assert_eq!(registry.watcher_count(), 1);
    }

    #[tokio::test]
    async fn test_changes_routed_to_each_watcher() {
        let source = ChannelFeedSource::new();
        let registry = registry(&source);
        let mut rx1 = connect(&registry, "c1");
        let mut rx2 = connect(&registry, "c2");

        registry.watch("c1", watch("w1", "orders", doc! {})).unwrap();
        registry.watch("c2", watch("w2", "orders", doc! {})).unwrap();
        wait_until(|| source.open_feeds() == 1).await;

        source.publish("shop", "orders", doc! { "operationType": "insert" });

        assert_eq!(
            next_change(&mut rx1).await,
            ServerMessage::change("w1", doc! { "operationType": "insert" })
        );
        assert_eq!(
            next_change(&mut rx2).await,
            ServerMessage::change("w2", doc! { "operationType": "insert" })
        );
    }

    #[tokio::test]
    async fn test_remove_connection_cascades() {
        let source = ChannelFeedSource::new();
        let registry = registry(&source);
        let _rx1 = connect(&registry, "c1");
        let _rx2 = connect(&registry, "c2");

        registry.watch("c1", watch("w1", "orders", doc! {})).unwrap();
        registry.watch("c1", watch("w2", "users", doc! {})).unwrap();
        registry.watch("c2", watch("w3", "orders", doc! {})).unwrap();

        assert_eq!(registry.remove_connection("c1"), 2);
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.watcher_count(), 1);
        assert_eq!(registry.stream_count(), 1);
        assert!(registry.find_stream("shop", "users", &doc! {}).is_none());

        wait_until(|| source.open_feeds_for("shop", "users") == 0).await;
        assert_eq!(source.open_feeds_for("shop", "orders"), 1);
    }

    #[tokio::test]
    async fn test_duplicate_watcher_id_replaces_previous() {
        let source = ChannelFeedSource::new();
        let registry = registry(&source);
        let _rx = connect(&registry, "c1");

        registry.watch("c1", watch("w1", "orders", doc! {})).unwrap();
        registry.watch("c1", watch("w1", "users", doc! {})).unwrap();

        assert_eq!(registry.watcher_count(), 1);
        assert_eq!(registry.stream_count(), 1);
        assert!(registry.find_stream("shop", "users", &doc! {}).is_some());
    }

    #[tokio::test]
    async fn test_explicit_db_keeps_streams_apart() {
        let source = ChannelFeedSource::new();
        let registry = registry(&source);
        let _rx = connect(&registry, "c1");

        registry.watch("c1", watch("w1", "orders", doc! {})).unwrap();
        registry
            .watch("c1", watch("w2", "orders", doc! {}).with_db("archive"))
            .unwrap();

        assert_eq!(registry.stream_count(), 2);
        assert!(registry.find_stream("archive", "orders", &doc! {}).is_some());
    }

    #[tokio::test]
    async fn test_watch_requires_registered_connection() {
        let source = ChannelFeedSource::new();
        let registry = registry(&source);

        assert!(registry.watch("ghost", watch("w1", "orders", doc! {})).is_err());
        assert_eq!(registry.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_feed_reopens_while_watched() {
        let source = ChannelFeedSource::new();
        let registry = registry(&source);
        let mut rx = connect(&registry, "c1");

        registry.watch("c1", watch("w1", "orders", doc! {})).unwrap();
        wait_until(|| source.open_feeds() == 1).await;

        source.fail("shop", "orders", "cursor killed");
        wait_until(|| source.requests().len() == 2 && source.open_feeds() == 1).await;

        let info = registry.find_stream("shop", "orders", &doc! {}).unwrap();
        assert!(info.running);
        assert_eq!(info.watchers, 1);

        source.publish("shop", "orders", doc! { "operationType": "insert" });
        assert_eq!(
            next_change(&mut rx).await,
            ServerMessage::change("w1", doc! { "operationType": "insert" })
        );
    }

    #[tokio::test]
    async fn test_cancel_during_reopen_delay_stops_feed() {
        let source = ChannelFeedSource::new();
        let registry = registry(&source);
        let _rx = connect(&registry, "c1");

        registry.watch("c1", watch("w1", "orders", doc! {})).unwrap();
        wait_until(|| source.open_feeds() == 1).await;

        source.fail("shop", "orders", "cursor killed");
        wait_until(|| source.open_feeds() == 0).await;
        assert!(registry.cancel("c1", "w1"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(source.requests().len(), 1);
        assert_eq!(source.open_feeds(), 0);
        assert_eq!(registry.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_clears_everything() {
        let source = ChannelFeedSource::new();
        let registry = registry(&source);
        let mut rx = connect(&registry, "c1");

        registry.watch("c1", watch("w1", "orders", doc! {})).unwrap();
        registry.shutdown();

        assert_eq!(registry.stream_count(), 0);
        assert_eq!(registry.watcher_count(), 0);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }
}
