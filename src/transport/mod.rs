//! Transport adapters.
//!
//! An adapter wraps one link primitive (BLE radio or WebSocket) behind a
//! single contract, so the manager never branches on the transport kind
//! except to pick which adapter to open.
//!
//! # Adapter Contract
//!
//! ```text
//! ┌──────────────────┐   open(target, sink)   ┌────────────────┐
//! │ TransportManager │───────────────────────►│    Adapter     │
//! │                  │◄─── LinkHandle ────────│ (BLE / Socket) │
//! │                  │                        └───────┬────────┘
//! │                  │◄── LinkEvent (sink) ───────────┘
//! │                  │─── send / close ──────► LinkHandle
//! └──────────────────┘
//! ```
//!
//! 1. `Adapter::open` establishes the link and returns a [`LinkHandle`]
//! 2. The adapter reports [`AdapterEvent`]s through the [`EventSink`]
//! 3. `LinkHandle::send` writes bytes, failing with [`Error::Send`] when the
//!    link is down
//! 4. `LinkHandle::close` tears the link down and cancels any pending
//!    reconnect
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `ble` | BLE GATT adapter with auto-reconnect |
//! | `reconnect` | Exponential backoff policy |
//! | `socket` | WebSocket adapter with connect timeout |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::{DeviceId, LinkId};
use crate::protocol::Inbound;

// ============================================================================
// Submodules
// ============================================================================

/// BLE GATT adapter.
pub mod ble;

/// Exponential backoff for BLE reconnects.
pub mod reconnect;

/// WebSocket adapter.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use ble::{BleAdapter, BleRadio, RadioEvent};
pub use reconnect::{ReconnectOptions, ReconnectPolicy};
pub use socket::{SocketAdapter, SocketConnector, SocketLink, TungsteniteConnector};

// ============================================================================
// TransportKind
// ============================================================================

/// The transport a session runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportKind {
    /// BLE GATT.
    Ble,
    /// WebSocket on the local network.
    Wifi,
    /// WebSocket relayed through a server.
    Remote,
}

impl TransportKind {
    /// Returns `true` for the WebSocket-backed kinds.
    #[inline]
    #[must_use]
    pub const fn is_socket(&self) -> bool {
        matches!(self, Self::Wifi | Self::Remote)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ble => "BLE",
            Self::Wifi => "WIFI",
            Self::Remote => "REMOTE",
        })
    }
}

// ============================================================================
// Target
// ============================================================================

/// Where an adapter should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A BLE device by radio id.
    Ble {
        /// Radio-level device id.
        device_id: DeviceId,
    },

    /// The device's own WebSocket server.
    Wifi {
        /// Host, or a full `ws://` / `wss://` URL.
        host: String,
    },

    /// The device through a relay.
    Remote {
        /// Relay base address.
        server_address: String,
        /// Id the relay pairs on.
        device_id: DeviceId,
    },
}

impl Target {
    /// Creates a BLE target.
    #[inline]
    #[must_use]
    pub fn ble(device_id: impl Into<DeviceId>) -> Self {
        Self::Ble {
            device_id: device_id.into(),
        }
    }

    /// Creates a WiFi target.
    #[inline]
    #[must_use]
    pub fn wifi(host: impl Into<String>) -> Self {
        Self::Wifi { host: host.into() }
    }

    /// Creates a remote relay target.
    #[inline]
    #[must_use]
    pub fn remote(server_address: impl Into<String>, device_id: impl Into<DeviceId>) -> Self {
        Self::Remote {
            server_address: server_address.into(),
            device_id: device_id.into(),
        }
    }

    /// Returns the transport kind this target needs.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Ble { .. } => TransportKind::Ble,
            Self::Wifi { .. } => TransportKind::Wifi,
            Self::Remote { .. } => TransportKind::Remote,
        }
    }

    /// Returns the WebSocket URL for socket targets.
    ///
    /// `port` is appended to bare WiFi hosts.
    #[must_use]
    pub fn socket_url(&self, port: u16) -> Option<String> {
        match self {
            Self::Ble { .. } => None,
            Self::Wifi { host } => Some(wifi_url(host, port)),
            Self::Remote {
                server_address,
                device_id,
            } => Some(pair_url(server_address, device_id)),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ble { device_id } => write!(f, "ble://{device_id}"),
            Self::Wifi { host } => write!(f, "wifi://{host}"),
            Self::Remote {
                server_address,
                device_id,
            } => write!(f, "remote://{device_id}@{server_address}"),
        }
    }
}

/// Builds the URL of the device's WebSocket server.
///
/// Targets that already carry a scheme are used as-is.
#[must_use]
pub fn wifi_url(host: &str, port: u16) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("ws://{host}:{port}")
    }
}

/// Builds the relay pairing URL: `<server>/pair?id=<device>`.
#[must_use]
pub fn pair_url(server_address: &str, device_id: &DeviceId) -> String {
    format!(
        "{}/pair?id={}",
        server_address.trim_end_matches('/'),
        urlencoding::encode(device_id.as_str())
    )
}

// ============================================================================
// Events
// ============================================================================

/// Event raised by an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// The link re-established itself after a disconnect.
    Connected,

    /// The link dropped.
    Disconnected {
        /// The adapter is retrying on its own.
        reconnecting: bool,
    },

    /// Payload received. `parsed` is `None` when it was not JSON.
    Data {
        /// Raw payload bytes.
        raw: Vec<u8>,
        /// Decoded message.
        parsed: Option<Inbound>,
    },

    /// Non-fatal link fault.
    Error(String),
}

/// An [`AdapterEvent`] tagged with the link that raised it.
#[derive(Debug, Clone)]
pub struct LinkEvent {
    /// Source link.
    pub link: LinkId,
    /// The event.
    pub event: AdapterEvent,
}

/// Delivers one link's events to its owner.
#[derive(Debug, Clone)]
pub struct EventSink {
    link: LinkId,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl EventSink {
    /// Creates a sink that tags events with `link`.
    #[inline]
    #[must_use]
    pub fn new(link: LinkId, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { link, tx }
    }

    /// Creates a sink for a fresh link together with its receiver.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(LinkId::generate(), tx), rx)
    }

    /// Returns the link id events are tagged with.
    #[inline]
    #[must_use]
    pub const fn link(&self) -> LinkId {
        self.link
    }

    /// Emits an event. Returns `false` once the receiver is gone.
    pub fn emit(&self, event: AdapterEvent) -> bool {
        trace!(link = %self.link, ?event, "Link event");
        self.tx
            .send(LinkEvent {
                link: self.link,
                event,
            })
            .is_ok()
    }
}

// ============================================================================
// LinkHandle
// ============================================================================

/// Command served by a link's pump task.
#[derive(Debug)]
pub enum LinkCommand {
    /// Write a payload and report the outcome.
    Send {
        /// Bytes to write.
        payload: Vec<u8>,
        /// Write outcome.
        ack: oneshot::Sender<Result<()>>,
    },
    /// Tear the link down.
    Close,
}

/// Handle to one open link.
///
/// Cheap to clone; all clones address the same link.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    id: LinkId,
    kind: TransportKind,
    command_tx: mpsc::UnboundedSender<LinkCommand>,
}

impl LinkHandle {
    /// Creates a handle over a link pump's command channel.
    #[inline]
    #[must_use]
    pub fn new(id: LinkId, kind: TransportKind, command_tx: mpsc::UnboundedSender<LinkCommand>) -> Self {
        Self {
            id,
            kind,
            command_tx,
        }
    }

    /// Returns the link id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> LinkId {
        self.id
    }

    /// Returns the transport kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Writes a payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Send`] if the link is closed or the write fails.
    pub async fn send(&self, payload: Vec<u8>) -> Result<()> {
        let (ack, ack_rx) = oneshot::channel();

        self.command_tx
            .send(LinkCommand::Send { payload, ack })
            .map_err(|_| Error::send(format!("{} link is closed", self.kind)))?;

        ack_rx
            .await
            .map_err(|_| Error::send(format!("{} link closed during write", self.kind)))?
    }

    /// Closes the link. Idempotent.
    pub fn close(&self) {
        let _ = self.command_tx.send(LinkCommand::Close);
    }

    /// Returns `true` once the link's pump has exited.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Opens links of one transport family.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Establishes a link to `target`.
    ///
    /// Events are reported through `events` until the link is closed.
    async fn open(&self, target: &Target, events: EventSink) -> Result<LinkHandle>;
}

// ============================================================================
// Tests
// ============================================================================
