//! Change hub client - subscribe to database changes through a change hub server.
//!
//! A [`Client`] keeps one TCP connection to the server, opened on the first
//! `watch` and re-opened after a fixed delay whenever it drops. Equal
//! subscriptions are collapsed into one reference-counted [`Subscription`],
//! and every live subscription is sent again after a reconnect.
//!
//! # Quick Start
//!
//! ```ignore
//! use changehub_client::{bson::doc, Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::new(ClientConfig::new("localhost"));
//!
//!     let open_orders = client.watch("orders", Some(doc! { "status": "open" }));
//!     let mut changes = open_orders.changes();
//!     while let Some(change) = changes.recv().await {
//!         println!("{}", change);
//!     }
//! }
//! ```

pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod subscription;

pub use client::Client;
pub use config::ClientConfig;
pub use error::Error;
pub use subscription::{ListenerId, Subscription};

/// Re-export protocol types.
pub use changehub_proto as proto;

/// Re-export of the document crate used for filters and changes.
pub use changehub_proto::bson;
