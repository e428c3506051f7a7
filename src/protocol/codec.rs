//! Wire codec.
//!
//! Requests are UTF-8 JSON, carried as WebSocket text frames or as the value
//! of a BLE write. Inbound payloads are classified into [`Inbound`].

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

use super::{DeviceStatus, Request};

// ============================================================================
// Inbound
// ============================================================================

/// A decoded message from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Full status snapshot.
    Status(DeviceStatus),

    /// Partial intensity echo, merged into the last snapshot.
    Intensity {
        /// Intensity the device applied.
        intensity: u8,
    },

    /// Valid JSON the protocol does not define.
    Other(Value),
}

impl Inbound {
    /// Classifies a JSON value.
    ///
    /// Objects carrying the full status field set are statuses whatever their
    /// `requestType`; an `INTENSITY` object without them is a partial echo.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        let request_type = value.get("requestType").and_then(Value::as_str);

        if matches!(request_type, None | Some("STATUS") | Some("INTENSITY"))
            && let Ok(status) = DeviceStatus::deserialize(&value)
        {
            return Self::Status(status);
        }

        if request_type == Some("INTENSITY")
            && let Some(intensity) = value
                .get("intensity")
                .and_then(Value::as_u64)
                .and_then(|n| u8::try_from(n).ok())
        {
            return Self::Intensity { intensity };
        }

        Self::Other(value)
    }

    /// Returns the status if this is a full snapshot.
    #[inline]
    #[must_use]
    pub fn as_status(&self) -> Option<&DeviceStatus> {
        match self {
            Self::Status(status) => Some(status),
            _ => None,
        }
    }
}

// ============================================================================
// Encode / Decode
// ============================================================================

/// Encodes a request as UTF-8 JSON bytes.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode(request: &Request) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(request)?)
}

/// Decodes a payload received from the device.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the payload is not JSON.
pub fn decode(payload: &[u8]) -> Result<Inbound> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| Error::decode(e.to_string()))?;
    Ok(Inbound::classify(value))
}

// ============================================================================
// Tests
// ============================================================================
