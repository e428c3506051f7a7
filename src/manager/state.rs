//! Connection state and pending-switch snapshot.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::identifiers::DeviceId;
use crate::transport::TransportKind;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle of the single control session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link.
    #[default]
    Idle,
    /// A link is being opened or re-established.
    Connecting,
    /// A link of the given kind is live.
    Connected(TransportKind),
    /// A user-initiated teardown is in progress.
    Disconnecting,
}

impl ConnectionState {
    /// Returns the live transport, if connected.
    #[inline]
    #[must_use]
    pub const fn transport(&self) -> Option<TransportKind> {
        match self {
            Self::Connected(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if a link is live.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// Returns `true` if there is no link.
    #[inline]
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected(kind) => write!(f, "connected({kind})"),
            Self::Disconnecting => f.write_str("disconnecting"),
        }
    }
}

// ============================================================================
// PendingSwitch
// ============================================================================

/// A transport switch waiting on the device.
///
/// Exists from the moment the switch is requested until it resolves, fails,
/// times out or is superseded by a newer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSwitch {
    /// Requested transport.
    pub target: TransportKind,
    /// Relay address for remote sessions.
    pub server_address: Option<String>,
    /// Device id the relay pairs on.
    pub device_id: Option<DeviceId>,
    /// Still waiting for a status reporting `target`.
    pub awaiting_confirmation: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_helpers() {
        assert!(ConnectionState::default().is_idle());
        assert_eq!(
            ConnectionState::Connected(TransportKind::Wifi).transport(),
            Some(TransportKind::Wifi)
        );
        assert_eq!(ConnectionState::Connecting.transport(), None);
        assert!(!ConnectionState::Disconnecting.is_connected());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            ConnectionState::Connected(TransportKind::Remote).to_string(),
            "connected(REMOTE)"
        );
        assert_eq!(ConnectionState::Idle.to_string(), "idle");
    }
}
