//! Device status snapshot.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::identifiers::DeviceId;
use crate::transport::TransportKind;

// ============================================================================
// DeviceStatus
// ============================================================================

/// Immutable snapshot of the device state.
///
/// A full status message replaces the previous snapshot; a partial intensity
/// message is merged into it with [`DeviceStatus::with_intensity`].
///
/// # Format
///
/// ```json
/// {
///   "intensity": 40,
///   "batteryLevel": 87,
///   "isCharging": false,
///   "isBluetoothConnected": true,
///   "isWifiConnected": true,
///   "ipAddress": "10.0.0.5",
///   "macAddress": "AA:BB:CC:DD:EE:FF",
///   "firmwareVersion": "1.4.0",
///   "deviceId": "abc",
///   "serverAddress": null,
///   "transport": "WIFI"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// Current output intensity.
    pub intensity: u8,

    /// Battery charge in percent.
    #[serde(alias = "battery")]
    pub battery_level: u8,

    /// Device is on external power.
    pub is_charging: bool,

    /// BLE link is up on the device side.
    pub is_bluetooth_connected: bool,

    /// Device has joined a WiFi network.
    pub is_wifi_connected: bool,

    /// WiFi address, when joined.
    #[serde(default)]
    pub ip_address: Option<String>,

    /// Hardware address.
    #[serde(default)]
    pub mac_address: String,

    /// Firmware version string.
    #[serde(default, alias = "version")]
    pub firmware_version: String,

    /// Id the device pairs on through a relay.
    #[serde(default)]
    pub device_id: Option<DeviceId>,

    /// Relay the device is attached to.
    #[serde(default)]
    pub server_address: Option<String>,

    /// Transport the device considers active.
    #[serde(rename = "transport", alias = "reportedTransport", default)]
    pub reported_transport: Option<TransportKind>,
}

impl DeviceStatus {
    /// Returns a copy with only the intensity replaced.
    #[inline]
    #[must_use]
    pub fn with_intensity(&self, intensity: u8) -> Self {
        Self {
            intensity,
            ..self.clone()
        }
    }

    /// Returns `true` if the device reports `kind` as its active transport.
    #[inline]
    #[must_use]
    pub fn reports(&self, kind: TransportKind) -> bool {
        self.reported_transport == Some(kind)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn sample() -> DeviceStatus {
        serde_json::from_value(json!({
            "intensity": 10,
            "batteryLevel": 80,
            "isCharging": true,
            "isBluetoothConnected": true,
            "isWifiConnected": false,
            "macAddress": "AA:BB",
            "firmwareVersion": "1.0.0",
            "deviceId": "abc",
            "transport": "BLE"
        }))
        .expect("parse")
    }

    #[test]
    fn test_parse_full_status() {
        let status = sample();
        assert_eq!(status.battery_level, 80);
        assert_eq!(status.device_id, Some(DeviceId::new("abc")));
        assert_eq!(status.ip_address, None);
        assert!(status.reports(TransportKind::Ble));
    }

    #[test]
    fn test_parse_legacy_field_names() {
        let status: DeviceStatus = serde_json::from_value(json!({
            "intensity": 0,
            "battery": 55,
            "isCharging": false,
            "isBluetoothConnected": false,
            "isWifiConnected": true,
            "ipAddress": "10.0.0.5",
            "macAddress": "AA:BB",
            "version": "0.9.1",
            "reportedTransport": "WIFI"
        }))
        .expect("parse");

        assert_eq!(status.battery_level, 55);
        assert_eq!(status.firmware_version, "0.9.1");
        assert_eq!(status.reported_transport, Some(TransportKind::Wifi));
    }

    #[test]
    fn test_with_intensity_preserves_other_fields() {
        let status = sample();
        let merged = status.with_intensity(42);

        assert_eq!(merged.intensity, 42);
        assert_eq!(merged, DeviceStatus { intensity: 42, ..status });
    }
}
