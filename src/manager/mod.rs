//! Transport manager.
//!
//! The [`TransportManager`] is the single owner of the device session. It
//! keeps exactly one link authoritative, routes requests over it, runs the
//! transport switch handshake and keeps the status poll alive.
//!
//! # Example
//!
//! ```ignore
//! use openvibe_link::{Target, TransportKind, TransportManager};
//!
//! let manager = TransportManager::builder().ble_radio(radio).spawn()?;
//! manager.connect(Target::ble("AA:BB:CC:DD:EE:FF")).await?;
//! manager.set_intensity(40).await?;
//!
//! // Hand the session over to WiFi once the device has joined a network.
//! let status = manager.switch_transport(TransportKind::Wifi, None, None).await?;
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`TransportManagerBuilder`] |
//! | `event_loop` | Actor owning all mutable session state |
//! | `journal` | [`DebugLog`] of recent lifecycle events |
//! | `poller` | [`StatusPoller`] singleton interval |
//! | `state` | [`ConnectionState`], [`PendingSwitch`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug};

use crate::error::{Error, Result};
use crate::identifiers::DeviceId;
use crate::options::LinkOptions;
use crate::protocol::{DeviceStatus, Request, encode};
use crate::transport::{Adapter, Target, TransportKind};

use event_loop::{Command, EventLoop, Shared};

// ============================================================================
// Submodules
// ============================================================================

mod builder;
mod event_loop;
mod journal;
mod poller;
mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::TransportManagerBuilder;
pub use journal::{DebugLog, LogEntry, MAX_LOG_ENTRIES};
pub use poller::StatusPoller;
pub use state::{ConnectionState, PendingSwitch};

// ============================================================================
// Events
// ============================================================================

/// Notification delivered to the event handler.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A new status snapshot was applied.
    StatusUpdated(DeviceStatus),
    /// The device sent JSON outside the protocol.
    Message(Value),
    /// The device sent a payload that is not JSON.
    Undecodable(Vec<u8>),
}

/// Event handler callback.
///
/// Runs on the manager's event loop; it must not block.
pub type EventHandler = Box<dyn Fn(ManagerEvent) + Send + Sync>;

// ============================================================================
// TransportManager
// ============================================================================

struct ManagerInner {
    command_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Mutex<Shared>>,
    event_handler: Arc<Mutex<Option<EventHandler>>>,
    options: LinkOptions,
}

/// Handle to the device session.
///
/// Cheap to clone; every clone drives the same session. The event loop
/// stops on [`shutdown`](Self::shutdown) or when the last handle is dropped.
#[derive(Clone)]
pub struct TransportManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportManager")
            .field("state", &self.state())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl TransportManager {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> TransportManagerBuilder {
        TransportManagerBuilder::new()
    }

    pub(crate) fn start(
        runtime: &Handle,
        options: LinkOptions,
        ble: Option<Arc<dyn Adapter>>,
        socket: Arc<dyn Adapter>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let event_handler: Arc<Mutex<Option<EventHandler>>> = Arc::new(Mutex::new(None));

        let event_loop = EventLoop::new(
            options.clone(),
            ble,
            socket,
            Arc::clone(&shared),
            Arc::clone(&event_handler),
            command_rx,
        );
        runtime.spawn(event_loop.run());

        Self {
            inner: Arc::new(ManagerInner {
                command_tx,
                shared,
                event_handler,
                options,
            }),
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Opens a session to `target`, closing any current one first.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for a BLE target without a radio
    /// - [`Error::Subscription`] if BLE notifications cannot be enabled
    /// - [`Error::ConnectionTimeout`] if a socket does not open in time
    /// - [`Error::Superseded`] if another connect replaced this one
    pub async fn connect(&self, target: Target) -> Result<()> {
        self.call(|reply| Command::Connect { target, reply }).await?
    }

    /// Tears the session down.
    ///
    /// Cancels a pending BLE reconnect, stops the poller and rejects a
    /// pending switch with [`Error::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the manager was shut down.
    pub async fn disconnect(&self) -> Result<()> {
        self.call(|reply| Command::Disconnect { reply }).await
    }

    /// Moves the session to another transport.
    ///
    /// With a live link, sends `SWITCH_TRANSPORT` and resolves once the
    /// device reports `kind` and, for socket kinds, the new socket is open.
    /// With no link, `Remote` plus a server address pairs directly through
    /// the relay and resolves on the first status.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] without a live link (outside direct pairing)
    /// - [`Error::Timeout`] if the device does not confirm in time
    /// - [`Error::Superseded`] if a newer switch replaced this one
    /// - [`Error::ConnectionClosed`] if the link dropped while waiting
    /// - [`Error::Send`] if the switch request could not be written
    pub async fn switch_transport(
        &self,
        kind: TransportKind,
        server_address: Option<String>,
        device_id: Option<DeviceId>,
    ) -> Result<DeviceStatus> {
        self.call(|reply| Command::Switch {
            kind,
            server_address,
            device_id,
            reply,
        })
        .await?
    }

    /// Shuts the event loop down and closes the link.
    pub fn shutdown(&self) {
        let _ = self.inner.command_tx.send(Command::Shutdown);
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Sends a request over the live link.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] without a live link
    /// - [`Error::Send`] if the write fails
    pub async fn send(&self, request: &Request) -> Result<()> {
        let link = self.call(|reply| Command::ActiveLink { reply }).await??;
        let payload = encode(request)?;

        debug!(request = ?request, kind = %link.kind(), "Sending request");
        self.inner.shared.lock().log.record(
            Level::DEBUG,
            format!("{} sent over {}", request.request_type(), link.kind()),
        );

        link.send(payload).await
    }

    /// Asks the device for a status snapshot.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn request_status(&self) -> Result<()> {
        self.send(&Request::Status).await
    }

    /// Sets the output intensity.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn set_intensity(&self, intensity: u8) -> Result<()> {
        self.send(&Request::Intensity { intensity }).await
    }

    /// Provisions WiFi credentials on the device.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_wifi_credentials(
        &self,
        ssid: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<()> {
        self.send(&Request::WifiCredentials {
            ssid: ssid.into(),
            password: password.into(),
        })
        .await
    }

    /// Enables or disables the device's transports.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn configure_transports(&self, bluetooth: bool, wifi: bool, remote: bool) -> Result<()> {
        self.send(&Request::TransportConfig {
            bluetooth_enabled: bluetooth,
            wifi_enabled: wifi,
            remote_enabled: remote,
        })
        .await
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Returns the last status snapshot.
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<DeviceStatus> {
        self.inner.shared.lock().status.clone()
    }

    /// Returns the switch waiting on the device, if any.
    #[inline]
    #[must_use]
    pub fn pending_switch(&self) -> Option<PendingSwitch> {
        self.inner.shared.lock().pending.clone()
    }

    /// Returns the debug journal, oldest first.
    #[must_use]
    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.shared.lock().log.entries()
    }

    /// Clears the debug journal.
    pub fn clear_logs(&self) {
        self.inner.shared.lock().log.clear();
    }

    /// Returns the options the manager runs with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &LinkOptions {
        &self.inner.options
    }

    // ========================================================================
    // Event Handler
    // ========================================================================

    /// Sets the event handler, replacing any previous one.
    pub fn set_event_handler(&self, handler: EventHandler) {
        *self.inner.event_handler.lock() = Some(handler);
    }

    /// Removes the event handler.
    pub fn clear_event_handler(&self) {
        *self.inner.event_handler.lock() = None;
    }

    // ========================================================================
    // Internal
    // ========================================================================

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, reply_rx) = oneshot::channel();

        self.inner
            .command_tx
            .send(command(reply))
            .map_err(|_| Error::ConnectionClosed)?;

        reply_rx.await.map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================
