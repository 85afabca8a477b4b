//! Change hub server - standalone change stream multiplexer.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use changehub_server::{Args, FeedOptions, FeedSource, ServerConfig, SubscriptionRegistry, Transport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "changehub_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting change hub server");

    // Parse command-line arguments
    let args = Args::parse();
    let config = args.into_config();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        return Err(e.into());
    }

    tracing::info!(
        database = %config.database,
        listen_address = %config.listen_address,
        batch_size = config.batch_size,
        "configuration loaded"
    );

    // Connect upstream before accepting anyone
    let source = match connect_upstream(&config).await {
        Ok(source) => source,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect upstream");
            return Err(e.into());
        }
    };

    let options = FeedOptions::default()
        .with_batch_size(config.batch_size)
        .with_reopen_delay(config.reopen_delay);
    let registry = SubscriptionRegistry::new(source, options, config.database.clone());

    // Create transport
    let transport = Transport::bind(&config, registry).await?;

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    // Spawn shutdown signal handler
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(());
    });

    // Run the transport
    tracing::info!("server ready, accepting connections");
    match transport.run_until_shutdown(shutdown_rx).await {
        Ok(()) => {
            tracing::info!("server shutdown complete");
        }
        Err(e) => {
            tracing::error!(error = %e, "server error");
            return Err(e.into());
        }
    }

    Ok(())
}

#[cfg(feature = "mongodb")]
async fn connect_upstream(config: &ServerConfig) -> Result<Arc<dyn FeedSource>, changehub_server::Error> {
    let source =
        changehub_server::MongoFeedSource::connect(&config.upstream_uri, &config.database).await?;
    Ok(Arc::new(source))
}

#[cfg(not(feature = "mongodb"))]
async fn connect_upstream(_config: &ServerConfig) -> Result<Arc<dyn FeedSource>, changehub_server::Error> {
    Err(changehub_server::Error::Config(
        "built without an upstream driver; enable the `mongodb` feature".to_string(),
    ))
}
