//! Change hub server library.
//!
//! This crate multiplexes upstream database change feeds across many TCP
//! subscribers. Equal subscriptions share one feed; feeds are opened on the
//! first subscriber and closed after the last one leaves.

pub mod config;
pub mod connection;
pub mod error;
pub mod feed;
pub mod filter;
pub mod handler;
pub mod pubsub;
pub mod transport;

pub use config::{Args, ServerConfig};
pub use error::Error;
pub use feed::{ChangeFeed, ChannelFeedSource, FeedOptions, FeedRequest, FeedSource};
#[cfg(feature = "mongodb")]
pub use feed::MongoFeedSource;
pub use handler::ConnectionHandler;
pub use pubsub::{StreamInfo, SubscriptionRegistry};
pub use transport::{Transport, TransportMetrics};
