//! Builder for [`TransportManager`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use openvibe_link::{LinkOptions, TransportManager};
//!
//! let manager = TransportManager::builder()
//!     .options(LinkOptions::new().with_websocket_port(6969))
//!     .ble_radio(Arc::new(PlatformRadio::new()))
//!     .spawn()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::error::{Error, Result};
use crate::options::LinkOptions;
use crate::settings::{DeviceSettings, MemorySettings};
use crate::transport::{
    Adapter, BleAdapter, BleRadio, SocketAdapter, SocketConnector, TungsteniteConnector,
};

use super::TransportManager;

// ============================================================================
// TransportManagerBuilder
// ============================================================================

/// Builder for configuring a [`TransportManager`].
///
/// Use [`TransportManager::builder()`] to create one.
#[derive(Default)]
pub struct TransportManagerBuilder {
    options: LinkOptions,
    ble_radio: Option<Arc<dyn BleRadio>>,
    socket_connector: Option<Arc<dyn SocketConnector>>,
    settings: Option<Arc<dyn DeviceSettings>>,
}

impl fmt::Debug for TransportManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportManagerBuilder")
            .field("options", &self.options)
            .field("ble_radio", &self.ble_radio.is_some())
            .field("socket_connector", &self.socket_connector.is_some())
            .field("settings", &self.settings.is_some())
            .finish()
    }
}

impl TransportManagerBuilder {
    /// Creates a builder with default options and no BLE radio.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the link options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: LinkOptions) -> Self {
        self.options = options;
        self
    }

    /// Provides the BLE radio. Without one, BLE targets fail with
    /// [`Error::Config`].
    #[inline]
    #[must_use]
    pub fn ble_radio(mut self, radio: Arc<dyn BleRadio>) -> Self {
        self.ble_radio = Some(radio);
        self
    }

    /// Replaces the WebSocket primitive. Defaults to [`TungsteniteConnector`].
    #[inline]
    #[must_use]
    pub fn socket_connector(mut self, connector: Arc<dyn SocketConnector>) -> Self {
        self.socket_connector = Some(connector);
        self
    }

    /// Provides persisted settings. Defaults to [`MemorySettings`].
    #[inline]
    #[must_use]
    pub fn settings(mut self, settings: Arc<dyn DeviceSettings>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Validates the options and starts the manager's event loop on the
    /// current tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::Config`] if called outside a tokio runtime
    pub fn spawn(self) -> Result<TransportManager> {
        self.options.validate()?;

        let runtime = Handle::try_current()
            .map_err(|_| Error::config("TransportManager must be spawned inside a tokio runtime"))?;

        let settings: Arc<dyn DeviceSettings> = match self.settings {
            Some(settings) => settings,
            None => Arc::new(MemorySettings::new()),
        };
        let connector: Arc<dyn SocketConnector> = match self.socket_connector {
            Some(connector) => connector,
            None => Arc::new(TungsteniteConnector),
        };

        let ble = self.ble_radio.map(|radio| {
            Arc::new(BleAdapter::new(radio, settings, self.options.reconnect)) as Arc<dyn Adapter>
        });
        let socket: Arc<dyn Adapter> = Arc::new(SocketAdapter::new(
            connector,
            self.options.websocket_port,
            self.options.connect_timeout,
        ));

        Ok(TransportManager::start(&runtime, self.options, ble, socket))
    }
}

// ============================================================================
// Tests
// ============================================================================
