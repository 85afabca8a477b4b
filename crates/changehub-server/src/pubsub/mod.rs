//! Subscription multiplexing.
//!
//! Watch requests with equal (db, collection, filters) share one [`Stream`]
//! and therefore one upstream feed. Each request is tracked as a [`Watcher`]
//! owned by the connection that sent it.

mod registry;
mod stream;
mod watcher;

pub use registry::SubscriptionRegistry;
pub use stream::{Stream, StreamInfo};
pub use watcher::Watcher;
