//! Connection task: connect, replay, read, and reconnect after a fixed delay.

use std::sync::Weak;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use changehub_proto::codec::decode_document;
use changehub_proto::{FrameDecoder, ServerMessage};

use crate::client::ClientInner;
use crate::config::ClientConfig;
use crate::error::Error;

/// Read buffer growth step.
const READ_CHUNK: usize = 8 * 1024;

/// Keep one socket open to the server for as long as the client lives.
///
/// Only a closed socket schedules a reconnect; read errors are logged and
/// end the current socket like a close does.
pub(crate) async fn run_connection(client: Weak<ClientInner>, config: ClientConfig) {
    let address = config.address();

    loop {
        match TcpStream::connect(&address).await {
            Ok(socket) => {
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::debug!(error = %e, "failed to set TCP_NODELAY");
                }
                match session(&client, socket, &config).await {
                    Ok(()) => tracing::info!(address = %address, "connection closed"),
                    Err(e) => tracing::warn!(address = %address, error = %e, "connection error"),
                }
            }
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "connect failed");
            }
        }

        match client.upgrade() {
            Some(inner) if !inner.is_shut_down() => inner.on_disconnected(),
            _ => return,
        }

        tracing::info!(
            address = %address,
            delay_ms = config.reconnect_delay.as_millis() as u64,
            "reconnecting"
        );
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// Drive one socket until it closes.
async fn session(client: &Weak<ClientInner>, socket: TcpStream, config: &ClientConfig) -> Result<(), Error> {
    let (reader, writer) = socket.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    match client.upgrade() {
        Some(inner) => inner.on_connected(tx),
        None => return Err(Error::Closed),
    }

    tokio::select! {
        result = read_frames(client, reader, config.max_frame_size) => result,
        result = write_frames(writer, rx) => result,
    }
}

async fn write_frames(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Bytes>) -> Result<(), Error> {
    while let Some(frame) = rx.recv().await {
        writer.write_all(&frame).await?;
    }
    Ok(())
}

async fn read_frames(
    client: &Weak<ClientInner>,
    mut reader: OwnedReadHalf,
    max_frame_size: usize,
) -> Result<(), Error> {
    let mut decoder = FrameDecoder::with_max_frame_size(max_frame_size);

    loop {
        while let Some(payload) = decoder.next_payload()? {
            let message = decode_document(&payload).and_then(ServerMessage::from_document);
            match message {
                Ok(ServerMessage::Change { watcher, data }) => match client.upgrade() {
                    Some(inner) => inner.dispatch(&watcher, &data),
                    None => return Err(Error::Closed),
                },
                Ok(ServerMessage::Error { error }) => {
                    tracing::error!(error = %error, "change hub error");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable server message");
                }
            }
        }

        let buffer = decoder.buffer_mut();
        buffer.reserve(READ_CHUNK);
        if reader.read_buf(buffer).await? == 0 {
            return Ok(());
        }
    }
}
