//! Server transport layer over plain TCP.
//!
//! Each accepted socket gets a reader loop that feeds a [`FrameDecoder`] and
//! dispatches control messages, plus a writer task draining the connection's
//! outbound queue. Change frames from any stream reach a socket only through
//! that queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use changehub_proto::codec::encode_document_frame;
use changehub_proto::{FrameDecoder, ServerMessage};

use crate::config::ServerConfig;
use crate::connection::{next_connection_id, ConnectionHandle, Outbound};
use crate::error::Error;
use crate::handler::ConnectionHandler;
use crate::pubsub::SubscriptionRegistry;

/// Read buffer growth step.
const READ_CHUNK: usize = 8 * 1024;

/// Transport metrics for monitoring.
#[derive(Debug)]
pub struct TransportMetrics {
    /// Total number of accepted connections.
    pub connections_total: AtomicU64,
    /// Number of currently open connections.
    pub connections_active: AtomicU64,
    /// Number of frames received.
    pub frames_received: AtomicU64,
    /// Number of frames sent.
    pub frames_sent: AtomicU64,
    /// Number of bytes received.
    pub bytes_received: AtomicU64,
    /// Number of bytes sent.
    pub bytes_sent: AtomicU64,
    /// Number of connections closed for a protocol error.
    pub protocol_errors: AtomicU64,
    /// Server start time.
    pub started_at: Instant,
}

impl TransportMetrics {
    /// Create new metrics.
    fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    fn record_connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    fn record_connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_bytes_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    fn record_frame_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the uptime duration.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get total accepted connections.
    pub fn total_connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Get currently open connections.
    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }

    /// Get total frames received.
    pub fn total_frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Get total frames sent.
    pub fn total_frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Get total bytes received.
    pub fn total_bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Get total bytes sent.
    pub fn total_bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get the number of protocol rejections.
    pub fn total_protocol_errors(&self) -> u64 {
        self.protocol_errors.load(Ordering::Relaxed)
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Server transport that accepts client connections.
pub struct Transport {
    listener: TcpListener,
    registry: SubscriptionRegistry,
    max_frame_size: usize,
    metrics: Arc<TransportMetrics>,
}

impl Transport {
    /// Bind the configured listen address.
    pub async fn bind(config: &ServerConfig, registry: SubscriptionRegistry) -> Result<Self, Error> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| {
                Error::Transport(format!(
                    "failed to listen on {}: {}",
                    config.listen_address, e
                ))
            })?;

        tracing::info!(address = %config.listen_address, "listening on TCP");

        Ok(Self {
            listener,
            registry,
            max_frame_size: config.max_frame_size,
            metrics: Arc::new(TransportMetrics::new()),
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Get a reference to the transport metrics.
    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    /// Shared handle to the transport metrics.
    pub fn metrics_handle(&self) -> Arc<TransportMetrics> {
        self.metrics.clone()
    }

    /// Accept connections forever.
    pub async fn run(&self) -> Result<(), Error> {
        tracing::info!("transport ready, accepting connections");
        loop {
            self.accept_one().await;
        }
    }

    /// Accept connections until `shutdown` fires, then stop every stream.
    pub async fn run_until_shutdown(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        tracing::info!("transport ready, accepting connections");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.accept_one() => {}
            }
        }

        tracing::info!(
            total_connections = self.metrics.total_connections(),
            active_connections = self.metrics.active_connections(),
            frames_received = self.metrics.total_frames_received(),
            frames_sent = self.metrics.total_frames_sent(),
            bytes_received = self.metrics.total_bytes_received(),
            bytes_sent = self.metrics.total_bytes_sent(),
            protocol_errors = self.metrics.total_protocol_errors(),
            uptime_secs = self.metrics.uptime().as_secs(),
            "shutdown signal received, stopping transport"
        );

        self.registry.shutdown();
        Ok(())
    }

    async fn accept_one(&self) {
        match self.listener.accept().await {
            Ok((socket, remote)) => {
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::debug!(error = %e, "failed to set TCP_NODELAY");
                }
                tokio::spawn(serve_connection(
                    socket,
                    remote,
                    self.registry.clone(),
                    self.metrics.clone(),
                    self.max_frame_size,
                ));
            }
            Err(e) => {
                tracing::error!(error = %e, "accept error");
            }
        }
    }
}

/// Serve one client until it disconnects or breaks protocol.
async fn serve_connection(
    socket: TcpStream,
    remote: SocketAddr,
    registry: SubscriptionRegistry,
    metrics: Arc<TransportMetrics>,
    max_frame_size: usize,
) {
    let connection_id = next_connection_id();
    let (reader, writer) = socket.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    registry.register_connection(ConnectionHandle::new(
        connection_id.clone(),
        Some(remote),
        tx.clone(),
    ));
    metrics.record_connection_opened();
    tracing::info!(connection_id = %connection_id, remote = %remote, "client connected");

    let writer_task = tokio::spawn(write_loop(writer, rx, metrics.clone()));

    let handler = ConnectionHandler::new(connection_id.clone(), registry);
    let result = read_loop(reader, &handler, &metrics, max_frame_size).await;
    handler.close();

    match result {
        Ok(()) => {}
        Err(Error::Io(e)) => {
            tracing::debug!(connection_id = %connection_id, error = %e, "socket error");
        }
        Err(e) => {
            metrics.record_protocol_error();
            let message = e.client_message();
            tracing::warn!(connection_id = %connection_id, remote = %remote, error = %message, "protocol rejection");
            match encode_document_frame(&ServerMessage::error(message).to_document()) {
                Ok(frame) => {
                    let _ = tx.send(Outbound::Frame(Bytes::from(frame)));
                }
                Err(e) => {
                    tracing::error!(connection_id = %connection_id, error = %e, "failed to encode error frame");
                }
            }
        }
    }

    let _ = tx.send(Outbound::Close);
    drop(tx);
    let _ = writer_task.await;

    metrics.record_connection_closed();
    tracing::info!(connection_id = %connection_id, remote = %remote, "client closed");
}

/// Read frames and dispatch them until EOF or the first error.
async fn read_loop(
    mut reader: OwnedReadHalf,
    handler: &ConnectionHandler,
    metrics: &TransportMetrics,
    max_frame_size: usize,
) -> Result<(), Error> {
    let mut decoder = FrameDecoder::with_max_frame_size(max_frame_size);

    loop {
        while let Some(payload) = decoder.next_payload()? {
            metrics.record_frame_received();
            handler.handle_payload(&payload)?;
        }

        let buffer = decoder.buffer_mut();
        buffer.reserve(READ_CHUNK);
        let n = reader.read_buf(buffer).await?;
        if n == 0 {
            return Ok(());
        }
        metrics.record_bytes_received(n);
    }
}

/// Drain the outbound queue into the socket, then shut the write side down.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    metrics: Arc<TransportMetrics>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                if let Err(e) = writer.write_all(&frame).await {
                    tracing::debug!(error = %e, "write failed");
                    break;
                }
                metrics.record_frame_sent(frame.len());
            }
            Outbound::Close => break,
        }
    }

    let _ = writer.flush().await;
    let _ = writer.shutdown().await;
}
