//! Server configuration.

use std::time::Duration;

use clap::Parser;

use changehub_proto::framing::MAX_FRAME_SIZE;

/// Default listen address for the server.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:37017";

/// Default upstream cursor batch size.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Default wait before reopening a failed upstream feed.
pub const DEFAULT_REOPEN_DELAY: Duration = Duration::from_secs(2);

/// Change hub server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upstream database connection URI.
    pub upstream_uri: String,

    /// Database used when a `watch` request does not name one.
    pub database: String,

    /// TCP address to listen on (e.g., "0.0.0.0:37017").
    pub listen_address: String,

    /// Batch size requested from upstream change cursors.
    pub batch_size: u32,

    /// Wait before reopening an upstream feed that failed or ended.
    pub reopen_delay: Duration,

    /// Maximum accepted frame size in bytes.
    pub max_frame_size: usize,
}

impl ServerConfig {
    /// Create a new server configuration for the given upstream.
    pub fn new(upstream_uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            upstream_uri: upstream_uri.into(),
            database: database.into(),
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            reopen_delay: DEFAULT_REOPEN_DELAY,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Set the listen address.
    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = address.into();
        self
    }

    /// Set the upstream batch size.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the feed reopen delay.
    pub fn with_reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    /// Set the maximum frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Check that required values are present.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.upstream_uri.trim().is_empty() {
            return Err(crate::Error::Config("env URI is required".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(crate::Error::Config("env DB is required".to_string()));
        }
        Ok(())
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "changehub-server")]
#[command(version, about = "Change hub server", long_about = None)]
pub struct Args {
    /// Upstream database connection URI.
    #[arg(long, env = "URI")]
    pub uri: String,

    /// Default database to watch.
    #[arg(long, env = "DB")]
    pub db: String,

    /// TCP address to listen on.
    #[arg(long, default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen: String,

    /// Upstream change cursor batch size.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: u32,

    /// Milliseconds to wait before reopening a failed upstream feed.
    #[arg(long, default_value_t = DEFAULT_REOPEN_DELAY.as_millis() as u64)]
    pub reopen_delay_ms: u64,

    /// Maximum frame size in megabytes.
    #[arg(long, default_value_t = 16)]
    pub max_frame_mb: usize,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        ServerConfig::new(self.uri, self.db)
            .with_listen_address(self.listen)
            .with_batch_size(self.batch_size)
            .with_reopen_delay(Duration::from_millis(self.reopen_delay_ms))
            .with_max_frame_size(
                self.max_frame_mb * 1024 * 1024 + changehub_proto::framing::FRAME_OVERHEAD,
            )
    }
}
