//! Outbound request messages.
//!
//! Every request is a JSON object discriminated by `requestType`.
//!
//! | `requestType` | Fields | Reply |
//! |---------------|--------|-------|
//! | `STATUS` | none | full status |
//! | `INTENSITY` | `intensity` | full status or partial intensity echo |
//! | `SWITCH_TRANSPORT` | `transport`, `serverAddress?` | status reporting the new transport |
//! | `WIFI_CREDENTIALS` | `ssid`, `password` | eventual status updates |
//! | `TRANSPORT_CONFIG` | `bluetoothEnabled`, `wifiEnabled`, `remoteEnabled` | eventual status updates |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::transport::TransportKind;

// ============================================================================
// Request
// ============================================================================

/// A request from the client to the device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "requestType",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    /// Ask for a full status snapshot.
    Status,

    /// Apply an output intensity.
    Intensity {
        /// Target intensity.
        intensity: u8,
    },

    /// Move the session to another transport.
    SwitchTransport {
        /// Transport the device should activate.
        transport: TransportKind,
        /// Relay address, for remote sessions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_address: Option<String>,
    },

    /// Provision WiFi credentials.
    WifiCredentials {
        /// Network name.
        ssid: String,
        /// Network password.
        password: String,
    },

    /// Enable or disable the device's transports.
    TransportConfig {
        /// Keep the BLE transport enabled.
        bluetooth_enabled: bool,
        /// Keep the local WiFi transport enabled.
        wifi_enabled: bool,
        /// Keep the remote relay transport enabled.
        remote_enabled: bool,
    },
}

impl Request {
    /// Returns the wire discriminant.
    #[must_use]
    pub const fn request_type(&self) -> &'static str {
        match self {
            Self::Status => "STATUS",
            Self::Intensity { .. } => "INTENSITY",
            Self::SwitchTransport { .. } => "SWITCH_TRANSPORT",
            Self::WifiCredentials { .. } => "WIFI_CREDENTIALS",
            Self::TransportConfig { .. } => "TRANSPORT_CONFIG",
        }
    }
}

// Credentials must never reach the logs.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => f.write_str("Status"),
            Self::Intensity { intensity } => f
                .debug_struct("Intensity")
                .field("intensity", intensity)
                .finish(),
            Self::SwitchTransport {
                transport,
                server_address,
            } => f
                .debug_struct("SwitchTransport")
                .field("transport", transport)
                .field("server_address", server_address)
                .finish(),
            Self::WifiCredentials { ssid, .. } => f
                .debug_struct("WifiCredentials")
                .field("ssid", ssid)
                .finish_non_exhaustive(),
            Self::TransportConfig {
                bluetooth_enabled,
                wifi_enabled,
                remote_enabled,
            } => f
                .debug_struct("TransportConfig")
                .field("bluetooth_enabled", bluetooth_enabled)
                .field("wifi_enabled", wifi_enabled)
                .field("remote_enabled", remote_enabled)
                .finish(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
