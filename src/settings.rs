//! Persisted user settings the link depends on.
//!
//! Persistence itself belongs to the host application; the link only needs
//! the last connected device id, which seeds BLE auto-reconnect.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;

use crate::identifiers::DeviceId;

// ============================================================================
// DeviceSettings
// ============================================================================

/// Access to the last connected device id.
pub trait DeviceSettings: Send + Sync {
    /// Returns the last device a BLE link was established with.
    fn last_device_id(&self) -> Option<DeviceId>;

    /// Records the device a BLE link was just established with.
    fn set_last_device_id(&self, device_id: Option<DeviceId>);
}

// ============================================================================
// MemorySettings
// ============================================================================

/// In-memory settings, lost on process exit.
#[derive(Debug, Default)]
pub struct MemorySettings {
    last_device_id: Mutex<Option<DeviceId>>,
}

impl MemorySettings {
    /// Creates empty settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates settings that already remember a device.
    #[inline]
    #[must_use]
    pub fn with_last_device(device_id: impl Into<DeviceId>) -> Self {
        Self {
            last_device_id: Mutex::new(Some(device_id.into())),
        }
    }
}

impl DeviceSettings for MemorySettings {
    fn last_device_id(&self) -> Option<DeviceId> {
        self.last_device_id.lock().clone()
    }

    fn set_last_device_id(&self, device_id: Option<DeviceId>) {
        *self.last_device_id.lock() = device_id;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_settings_round_trip() {
        let settings = MemorySettings::new();
        assert_eq!(settings.last_device_id(), None);

        settings.set_last_device_id(Some(DeviceId::new("dev-1")));
        assert_eq!(settings.last_device_id(), Some(DeviceId::new("dev-1")));

        settings.set_last_device_id(None);
        assert_eq!(settings.last_device_id(), None);
    }

    #[test]
    fn test_with_last_device() {
        let settings = MemorySettings::with_last_device("dev-2");
        assert_eq!(settings.last_device_id().unwrap().as_str(), "dev-2");
    }
}
