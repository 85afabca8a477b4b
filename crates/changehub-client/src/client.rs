//! Change hub client API.
//!
//! This module provides the main `Client` struct. One client owns one TCP
//! connection, opened lazily on the first `watch`, and a table of live
//! subscriptions that is replayed after every reconnect.

use std::sync::Arc;

use bson::Document;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use changehub_proto::codec::encode_document_frame;
use changehub_proto::value::document_to_map;
use changehub_proto::Action;

use crate::config::ClientConfig;
use crate::connection::run_connection;
use crate::subscription::{Subscription, SubscriptionInner};

/// Sending half of the current socket's write queue.
pub(crate) type FrameSender = mpsc::UnboundedSender<Bytes>;

#[derive(Default)]
struct ClientState {
    subscriptions: Vec<Arc<SubscriptionInner>>,
    writer: Option<FrameSender>,
    connected: bool,
    task: Option<JoinHandle<()>>,
    shut_down: bool,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    state: Mutex<ClientState>,
}

impl ClientInner {
    /// Adopt a fresh socket: mark connected and replay every live subscription.
    pub(crate) fn on_connected(&self, writer: FrameSender) {
        let mut state = self.state.lock();
        let mut replayed = 0;
        for handle in &state.subscriptions {
            if send_action(&writer, &Action::watch(handle.watch_request())) {
                replayed += 1;
            }
        }
        state.writer = Some(writer);
        state.connected = true;
        tracing::info!(address = %self.config.address(), replayed, "connected");
    }

    /// Forget the socket that just closed.
    pub(crate) fn on_disconnected(&self) {
        let mut state = self.state.lock();
        state.writer = None;
        state.connected = false;
    }

    /// Route one change to its subscription.
    pub(crate) fn dispatch(&self, watcher: &str, change: &Document) {
        let handle = {
            let state = self.state.lock();
            state
                .subscriptions
                .iter()
                .find(|handle| handle.id() == watcher)
                .cloned()
        };
        match handle {
            Some(handle) => handle.emit_change(change),
            None => tracing::debug!(watcher, "change for unknown subscription"),
        }
    }

    /// Remove a fully released subscription and cancel it on the server.
    pub(crate) fn release(&self, id: &str) {
        let mut state = self.state.lock();
        if let Some(writer) = &state.writer {
            send_action(writer, &Action::cancel(id));
        }
        state.subscriptions.retain(|handle| handle.id() != id);
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = self.state.get_mut().task.take() {
            task.abort();
        }
    }
}

/// Encode and queue a control message. Returns false if the socket is gone.
fn send_action(writer: &FrameSender, action: &Action) -> bool {
    match encode_document_frame(&action.to_document()) {
        Ok(frame) => writer.send(Bytes::from(frame)).is_ok(),
        Err(e) => {
            tracing::error!(watcher = action.watcher(), error = %e, "failed to encode control message");
            false
        }
    }
}

/// A change hub client.
///
/// Cloning is cheap; clones share the connection and subscription table.
/// `watch` must be called from within a Tokio runtime.
///
/// # Example
///
/// ```ignore
/// use changehub_client::{Client, ClientConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let client = Client::new(ClientConfig::new("localhost"));
///     let orders = client.watch("orders", None);
///     orders.on_change(|change| println!("{}", change));
///     tokio::signal::ctrl_c().await.ok();
///     orders.close();
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client. No connection is made until the first `watch`.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                state: Mutex::new(ClientState::default()),
            }),
        }
    }

    /// Create a client for localhost on the default port.
    pub fn localhost() -> Self {
        Self::new(ClientConfig::localhost())
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Subscribe to changes in `collection` of the server's default database.
    pub fn watch(&self, collection: impl Into<String>, filters: Option<Document>) -> Subscription {
        self.subscribe(None, collection.into(), filters)
    }

    /// Subscribe to changes in `db.collection`.
    pub fn watch_in(
        &self,
        db: impl Into<String>,
        collection: impl Into<String>,
        filters: Option<Document>,
    ) -> Subscription {
        self.subscribe(Some(db.into()), collection.into(), filters)
    }

    fn subscribe(&self, db: Option<String>, collection: String, filters: Option<Document>) -> Subscription {
        let filters = filters.unwrap_or_default();
        let key = document_to_map(&filters);

        let mut state = self.inner.state.lock();
        self.ensure_connection(&mut state);

        if let Some(handle) = state
            .subscriptions
            .iter()
            .find(|handle| handle.matches(&db, &collection, &key) && handle.retain())
        {
            return Subscription {
                inner: handle.clone(),
            };
        }

        let handle = Arc::new(SubscriptionInner::new(
            db,
            collection,
            filters,
            key,
            Arc::downgrade(&self.inner),
        ));
        state.subscriptions.push(handle.clone());

        // While disconnected the watch goes out with the post-connect replay
        if let Some(writer) = &state.writer {
            send_action(writer, &Action::watch(handle.watch_request()));
        }

        Subscription { inner: handle }
    }

    fn ensure_connection(&self, state: &mut ClientState) {
        if state.shut_down || state.task.is_some() {
            return;
        }
        state.task = Some(tokio::spawn(run_connection(
            Arc::downgrade(&self.inner),
            self.inner.config.clone(),
        )));
    }

    /// Whether a socket is currently established.
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().subscriptions.len()
    }

    /// Stop the connection task and the reconnect timer.
    ///
    /// Live subscriptions stay in the table but receive nothing further.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shut_down = true;
        state.writer = None;
        state.connected = false;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        tracing::debug!("client shut down");
    }
}
