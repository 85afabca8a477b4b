//! Reference-counted subscription handles.

use std::sync::{Arc, Weak};

use bson::Document;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use changehub_proto::value::equal_maps;
use changehub_proto::{Map, WatchRequest};

use crate::client::ClientInner;

/// Identifies a registered listener.
pub type ListenerId = u64;

type ChangeListener = Arc<dyn Fn(&Document) + Send + Sync>;
type CloseListener = Arc<dyn Fn() + Send + Sync>;

struct HandleState {
    ref_count: usize,
    closed: bool,
    next_listener: ListenerId,
    change_listeners: Vec<(ListenerId, ChangeListener)>,
    close_listeners: Vec<(ListenerId, CloseListener)>,
    client: Option<Weak<ClientInner>>,
}

pub(crate) struct SubscriptionInner {
    id: String,
    db: Option<String>,
    collection: String,
    filters: Document,
    key: Map,
    state: Mutex<HandleState>,
}

impl SubscriptionInner {
    pub(crate) fn new(
        db: Option<String>,
        collection: String,
        filters: Document,
        key: Map,
        client: Weak<ClientInner>,
    ) -> Self {
        Self {
            id: bson::oid::ObjectId::new().to_hex(),
            db,
            collection,
            filters,
            key,
            state: Mutex::new(HandleState {
                ref_count: 1,
                closed: false,
                next_listener: 1,
                change_listeners: Vec::new(),
                close_listeners: Vec::new(),
                client: Some(client),
            }),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn matches(&self, db: &Option<String>, collection: &str, key: &Map) -> bool {
        self.db == *db && self.collection == collection && equal_maps(&self.key, key)
    }

    /// Take one more reference unless the handle already closed.
    pub(crate) fn retain(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.ref_count += 1;
        true
    }

    pub(crate) fn watch_request(&self) -> WatchRequest {
        let request = WatchRequest::new(
            self.id.clone(),
            self.collection.clone(),
            self.filters.clone(),
        );
        match &self.db {
            Some(db) => request.with_db(db.clone()),
            None => request,
        }
    }

    /// Deliver a change to every listener, outside the lock.
    pub(crate) fn emit_change(&self, change: &Document) {
        let listeners: Vec<ChangeListener> = {
            let state = self.state.lock();
            if state.closed {
                return;
            }
            state
                .change_listeners
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect()
        };
        for listener in listeners {
            listener(change);
        }
    }
}

/// A live subscription to one (db, collection, filters) triple.
///
/// Every `watch` call with equal arguments returns a clone of the same handle
/// and adds one reference. The subscription ends once [`close`] has been
/// called as many times as it was returned.
///
/// [`close`]: Subscription::close
#[derive(Clone)]
pub struct Subscription {
    pub(crate) inner: Arc<SubscriptionInner>,
}

impl Subscription {
    /// Subscription id, as sent to the server.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Target database, if one was named.
    pub fn db(&self) -> Option<&str> {
        self.inner.db.as_deref()
    }

    /// Target collection.
    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    /// Filter specification, as passed to the first `watch`.
    pub fn filters(&self) -> &Document {
        &self.inner.filters
    }

    /// Number of outstanding references.
    pub fn ref_count(&self) -> usize {
        self.inner.state.lock().ref_count
    }

    /// Whether the subscription has ended.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Register a callback for each change document.
    ///
    /// Callbacks run on the connection task and must not block.
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Document) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let id = state.next_listener;
        state.next_listener += 1;
        if !state.closed {
            state.change_listeners.push((id, Arc::new(listener)));
        }
        id
    }

    /// Register a callback for the end of the subscription.
    pub fn on_close<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let id = state.next_listener;
        state.next_listener += 1;
        if !state.closed {
            state.close_listeners.push((id, Arc::new(listener)));
        }
        id
    }

    /// Unregister a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.change_listeners.len() + state.close_listeners.len();
        state.change_listeners.retain(|(listener, _)| *listener != id);
        state.close_listeners.retain(|(listener, _)| *listener != id);
        before != state.change_listeners.len() + state.close_listeners.len()
    }

    /// Receive change documents on a channel.
    ///
    /// The channel ends when the subscription closes.
    pub fn changes(&self) -> mpsc::UnboundedReceiver<Document> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_change(move |change| {
            let _ = tx.send(change.clone());
        });
        rx
    }

    /// Drop one reference.
    ///
    /// The last reference cancels the subscription on the server, removes it
    /// from the client and fires the close listeners. Extra calls after that
    /// do nothing.
    pub fn close(&self) {
        let (client, close_listeners) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.ref_count = state.ref_count.saturating_sub(1);
            if state.ref_count > 0 {
                return;
            }
            state.closed = true;
            state.change_listeners.clear();
            (state.client.take(), std::mem::take(&mut state.close_listeners))
        };

        if let Some(client) = client.and_then(|client| client.upgrade()) {
            client.release(&self.inner.id);
        }

        for (_, listener) in close_listeners {
            listener();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("db", &self.inner.db)
            .field("collection", &self.inner.collection)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
