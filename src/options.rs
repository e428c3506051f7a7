//! Link configuration.
//!
//! Provides a type-safe interface for the timing and addressing constants the
//! transport manager and its adapters use.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use openvibe_link::LinkOptions;
//!
//! let options = LinkOptions::new()
//!     .with_websocket_port(8080)
//!     .with_status_interval(Duration::from_secs(10))
//!     .without_switch_timeout();
//!
//! options.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::ReconnectOptions;

// ============================================================================
// Constants
// ============================================================================

/// Port the device's WebSocket server listens on.
pub const WEBSOCKET_PORT: u16 = 6969;

/// Bound on a socket open acknowledgement.
pub const WEBSOCKET_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the direct remote connect handshake.
pub const REMOTE_PAIR_TIMEOUT: Duration = Duration::from_secs(8);

/// Interval between status requests.
pub const STATUS_REQUEST_INTERVAL: Duration = Duration::from_secs(30);

/// Bound on waiting for the device to confirm a transport switch.
pub const SWITCH_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// Relay server used when no other is configured.
pub const DEFAULT_SERVER_URL: &str = "ws://openvibe-server.duckdns.org:6969";

// ============================================================================
// LinkOptions
// ============================================================================

/// Configuration for a [`TransportManager`](crate::TransportManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Port appended to bare WiFi hosts.
    pub websocket_port: u16,

    /// Socket open timeout.
    pub connect_timeout: Duration,

    /// Direct remote connect handshake timeout.
    pub pair_timeout: Duration,

    /// Status poll interval.
    pub status_interval: Duration,

    /// Switch confirmation timeout; `None` waits indefinitely.
    pub switch_timeout: Option<Duration>,

    /// BLE reconnect backoff.
    pub reconnect: ReconnectOptions,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl LinkOptions {
    /// Creates options with the default constants.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            websocket_port: WEBSOCKET_PORT,
            connect_timeout: WEBSOCKET_CONNECTION_TIMEOUT,
            pair_timeout: REMOTE_PAIR_TIMEOUT,
            status_interval: STATUS_REQUEST_INTERVAL,
            switch_timeout: Some(SWITCH_CONFIRM_TIMEOUT),
            reconnect: ReconnectOptions::new(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl LinkOptions {
    /// Sets the WebSocket port for bare hosts.
    #[inline]
    #[must_use]
    pub fn with_websocket_port(mut self, port: u16) -> Self {
        self.websocket_port = port;
        self
    }

    /// Sets the socket open timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the remote pair handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_pair_timeout(mut self, timeout: Duration) -> Self {
        self.pair_timeout = timeout;
        self
    }

    /// Sets the status poll interval.
    #[inline]
    #[must_use]
    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Sets the switch confirmation timeout.
    #[inline]
    #[must_use]
    pub fn with_switch_timeout(mut self, timeout: Duration) -> Self {
        self.switch_timeout = Some(timeout);
        self
    }

    /// Waits indefinitely for switch confirmations.
    #[inline]
    #[must_use]
    pub fn without_switch_timeout(mut self) -> Self {
        self.switch_timeout = None;
        self
    }

    /// Sets the BLE reconnect backoff.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.reconnect = reconnect;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl LinkOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a port or duration is zero, or the
    /// reconnect backoff is inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.websocket_port == 0 {
            return Err(Error::config("websocket_port must be non-zero"));
        }

        let durations = [
            ("connect_timeout", Some(self.connect_timeout)),
            ("pair_timeout", Some(self.pair_timeout)),
            ("status_interval", Some(self.status_interval)),
            ("switch_timeout", self.switch_timeout),
        ];
        for (name, value) in durations {
            if value.is_some_and(|d| d.is_zero()) {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }

        self.reconnect.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LinkOptions::default();
        assert_eq!(options.websocket_port, 6969);
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.pair_timeout, Duration::from_millis(8000));
        assert_eq!(options.status_interval, Duration::from_secs(30));
        assert!(options.switch_timeout.is_some());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let options = LinkOptions::new()
            .with_websocket_port(80)
            .with_pair_timeout(Duration::from_secs(2))
            .without_switch_timeout();

        assert_eq!(options.websocket_port, 80);
        assert_eq!(options.pair_timeout, Duration::from_secs(2));
        assert_eq!(options.switch_timeout, None);
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let err = LinkOptions::new().with_websocket_port(0).validate();
        assert!(matches!(err, Err(Error::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let err = LinkOptions::new()
            .with_status_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("status_interval"));
    }
}
