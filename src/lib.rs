//! OpenVibe Link - single-device control session over interchangeable
//! transports.
//!
//! A controller application talks to one OpenVibe device at a time, over
//! one of three links:
//!
//! - **BLE**: GATT write/notify characteristics, with automatic reconnect
//! - **WIFI**: WebSocket to the device on the local network
//! - **REMOTE**: WebSocket through a relay server the device pairs with
//!
//! # Architecture
//!
//! - The [`TransportManager`] owns the session. A single event loop task
//!   holds the connection state, the active link and any pending switch.
//! - Adapters ([`BleAdapter`], [`SocketAdapter`]) turn a [`Target`] into a
//!   [`LinkHandle`] and report [`AdapterEvent`]s tagged with a [`LinkId`].
//! - A transport switch is a handshake: the device is asked to move, and
//!   the new link only becomes authoritative once the device confirms it
//!   and the new socket is open.
//!
//! # Quick Start
//!
//! ```no_run
//! use openvibe_link::{Result, Target, TransportKind, TransportManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = TransportManager::builder().spawn()?;
//!
//!     manager.connect(Target::wifi("192.168.1.40")).await?;
//!     manager.set_intensity(30).await?;
//!
//!     let status = manager
//!         .switch_transport(TransportKind::Remote, None, None)
//!         .await?;
//!     println!("Now remote, battery at {}%", status.battery_level);
//!
//!     manager.disconnect().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | [`DeviceId`], [`LinkId`] |
//! | [`manager`] | [`TransportManager`] and its builder |
//! | [`options`] | [`LinkOptions`] and protocol constants |
//! | [`protocol`] | Wire messages: [`Request`], [`DeviceStatus`] |
//! | [`settings`] | Persisted [`DeviceSettings`] |
//! | [`transport`] | BLE and WebSocket adapters |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Session ownership, transport switching and status polling.
///
/// Use [`TransportManager::builder()`] to create a manager.
pub mod manager;

/// Link configuration and protocol constants.
pub mod options;

/// Device wire protocol.
///
/// JSON requests out, status snapshots and echoes in.
pub mod protocol;

/// Persisted settings.
pub mod settings;

/// Link adapters.
///
/// One adapter per transport family, behind the [`Adapter`] trait.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{DeviceId, LinkId};

// Manager types
pub use manager::{
    ConnectionState, EventHandler, LogEntry, ManagerEvent, PendingSwitch, TransportManager,
    TransportManagerBuilder,
};

// Option types
pub use options::{
    DEFAULT_SERVER_URL, LinkOptions, REMOTE_PAIR_TIMEOUT, STATUS_REQUEST_INTERVAL,
    SWITCH_CONFIRM_TIMEOUT, WEBSOCKET_CONNECTION_TIMEOUT, WEBSOCKET_PORT,
};

// Protocol types
pub use protocol::{DeviceStatus, Inbound, Request};

// Settings types
pub use settings::{DeviceSettings, MemorySettings};

// Transport types
pub use transport::{
    Adapter, AdapterEvent, BleAdapter, BleRadio, EventSink, LinkEvent, LinkHandle, RadioEvent,
    ReconnectOptions, SocketAdapter, SocketConnector, SocketLink, Target, TransportKind,
    TungsteniteConnector,
};
