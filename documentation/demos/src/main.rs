//! Watch demo: print every change in `test.test` until Ctrl-C.
//!
//! Run a server first (`URI=mongodb://localhost:27017 DB=test changehub-server`),
//! then `cargo run` here and write to the `test` collection.

use changehub_client::{Client, ClientConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "changehub_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "localhost".to_string());
    let client = Client::new(ClientConfig::new(host));

    let stream = client.watch_in("test", "test", None);
    stream.on_change(|change| println!("change data {}", change));
    stream.on_close(|| println!("watch closed"));

    let _ = tokio::signal::ctrl_c().await;
    stream.close();
    client.shutdown();
}
