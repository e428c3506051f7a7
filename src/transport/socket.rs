//! WebSocket adapter.
//!
//! Serves both socket-backed transports: WiFi connects straight to the
//! device's server, Remote connects to a relay's pairing endpoint. The
//! socket primitive is abstracted behind [`SocketConnector`];
//! [`TungsteniteConnector`] is the production implementation.
//!
//! # Connect Guard
//!
//! The open is bounded by `connect_timeout`. On expiry the half-open socket
//! is dropped, not left to linger, and the open fails with
//! [`Error::ConnectionTimeout`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::decode;

use super::{Adapter, AdapterEvent, EventSink, LinkCommand, LinkHandle, Target};

// ============================================================================
// Types
// ============================================================================

/// An open socket: a command channel in, a frame channel out.
///
/// The frame channel ends when the socket closes.
#[derive(Debug)]
pub struct SocketLink {
    /// Commands for the socket pump.
    pub commands: mpsc::UnboundedSender<LinkCommand>,
    /// Payloads received from the peer.
    pub frames: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// WebSocket link primitive.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Opens a socket to `url`.
    async fn connect(&self, url: &str) -> Result<SocketLink>;
}

// ============================================================================
// TungsteniteConnector
// ============================================================================

/// Connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<SocketLink> {
        let url = normalize_url(url)?;

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .inspect_err(|e| debug!(%url, error = %e, "WebSocket connect failed"))?;

        debug!(%url, "WebSocket connected");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket_pump(ws_stream, command_rx, frame_tx));

        Ok(SocketLink {
            commands: command_tx,
            frames: frame_rx,
        })
    }
}

/// Parses a socket address, mapping `http`/`https` onto `ws`/`wss`.
///
/// # Errors
///
/// Returns [`Error::Config`] for unparsable URLs and other schemes.
pub fn normalize_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| Error::config(format!("invalid WebSocket URL {raw}: {e}")))?;

    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::config(format!("unsupported URL scheme: {other}")));
        }
    };

    url.set_scheme(scheme)
        .map_err(|()| Error::config(format!("cannot map {raw} to {scheme}")))?;
    Ok(url)
}

/// Moves frames between a WebSocket and its channels.
async fn run_socket_pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut command_rx: mpsc::UnboundedReceiver<LinkCommand>,
    frame_tx: mpsc::UnboundedSender<Vec<u8>>,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            message = ws_read.next() => {
                let frame = match message {
                    Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                    Some(Ok(Message::Binary(data))) => data.to_vec(),

                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }

                    // Ping, Pong
                    _ => continue,
                };

                if frame_tx.send(frame).is_err() {
                    break;
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(LinkCommand::Send { payload, ack }) => {
                        let message = match String::from_utf8(payload) {
                            Ok(text) => Message::Text(text.into()),
                            Err(e) => Message::Binary(e.into_bytes().into()),
                        };
                        let result = ws_write
                            .send(message)
                            .await
                            .map_err(|e| Error::send(e.to_string()));
                        let _ = ack.send(result);
                    }

                    Some(LinkCommand::Close) | None => {
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        }
    }

    debug!("Socket pump terminated");
}

// ============================================================================
// SocketAdapter
// ============================================================================

/// Opens WiFi and Remote links.
pub struct SocketAdapter {
    connector: Arc<dyn SocketConnector>,
    port: u16,
    connect_timeout: Duration,
}

impl SocketAdapter {
    /// Creates an adapter.
    ///
    /// `port` is appended to bare WiFi hosts.
    #[must_use]
    pub fn new(connector: Arc<dyn SocketConnector>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            connector,
            port,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Adapter for SocketAdapter {
    async fn open(&self, target: &Target, events: EventSink) -> Result<LinkHandle> {
        let url = target
            .socket_url(self.port)
            .ok_or_else(|| Error::config(format!("socket adapter cannot open {target}")))?;

        debug!(%url, link = %events.link(), "Opening socket link");

        let timeout_ms = u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX);
        let link = match timeout(self.connect_timeout, self.connector.connect(&url)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(%url, timeout_ms, "Socket open timed out, dropping half-open socket");
                return Err(Error::connection_timeout(timeout_ms));
            }
        };

        info!(%url, kind = %target.kind(), "Socket link established");

        let handle = LinkHandle::new(events.link(), target.kind(), link.commands);
        tokio::spawn(forward_frames(link.frames, events));

        Ok(handle)
    }
}

/// Decodes frames into link events until the socket closes.
async fn forward_frames(mut frames: mpsc::UnboundedReceiver<Vec<u8>>, events: EventSink) {
    while let Some(raw) = frames.recv().await {
        let parsed = match decode(&raw) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(link = %events.link(), error = %e, "Undecodable frame");
                None
            }
        };

        if !events.emit(AdapterEvent::Data { raw, parsed }) {
            return;
        }
    }

    events.emit(AdapterEvent::Disconnected {
        reconnecting: false,
    });
}

// ============================================================================
// Tests
// ============================================================================
