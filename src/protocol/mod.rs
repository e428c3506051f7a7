//! Device protocol message types.
//!
//! The device speaks a small request/response protocol of JSON objects,
//! identical on every transport.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | [`Request`] | Client → Device | Command, discriminated by `requestType` |
//! | [`DeviceStatus`] | Device → Client | Full state snapshot |
//! | [`Inbound::Intensity`] | Device → Client | Partial intensity echo |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Byte encoding and inbound classification |
//! | `request` | Outbound requests |
//! | `status` | Status snapshot |

// ============================================================================
// Submodules
// ============================================================================

/// Byte encoding and inbound classification.
pub mod codec;

/// Outbound request messages.
pub mod request;

/// Device status snapshot.
pub mod status;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{Inbound, decode, encode};
pub use request::Request;
pub use status::DeviceStatus;
