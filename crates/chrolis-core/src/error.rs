//! Error types for the CHROLIS hub driver.
//!
//! `ChrolisError` is the single error type shared by the facade, the hub and
//! its peripherals. Using `thiserror`, each variant carries the message shown
//! to the host when a property access is rejected.
//!
//! ## Error Categories
//!
//! - **Availability**: `HubUnavailable`, `DeviceUnavailable`, `NoAvailableDevices`.
//!   The owning hub or the hardware link cannot be reached.
//! - **Validation**: `ParamNotValid`, raised before any hardware write is attempted.
//! - **Hardware**: `Transport`, any instrument read/write failure other than
//!   unavailability. Carries an [`InstrumentErrorKind`].
//! - **Informational**: `UnknownHardwareState`, logged by the status monitor when a
//!   non-zero status code has no recognised condition bit.
//! - **Configuration**: `Config`, `Configuration`.

use thiserror::Error;

/// Result type alias for CHROLIS operations.
pub type Result<T> = std::result::Result<T, ChrolisError>;

// =============================================================================
// Instrument Error Classes
// =============================================================================

/// Error classes reported by the instrument for failed commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentErrorKind {
    Runtime,
    Internal,
    Authentication,
    Parameter,
    Transmit,
    Receive,
    InvalidMode,
    Service,
    Overflow,
}

impl std::fmt::Display for InstrumentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            InstrumentErrorKind::Runtime => "runtime",
            InstrumentErrorKind::Internal => "internal",
            InstrumentErrorKind::Authentication => "authentication",
            InstrumentErrorKind::Parameter => "parameter",
            InstrumentErrorKind::Transmit => "transmit",
            InstrumentErrorKind::Receive => "receive",
            InstrumentErrorKind::InvalidMode => "invalid_mode",
            InstrumentErrorKind::Service => "service",
            InstrumentErrorKind::Overflow => "overflow",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// ChrolisError
// =============================================================================

/// Primary error type for the CHROLIS driver.
#[derive(Error, Debug)]
pub enum ChrolisError {
    /// The hub a peripheral was constructed against no longer exists.
    ///
    /// **Recovery Strategy**: Recreate the peripheral against a live hub.
    #[error("Hub is not available")]
    HubUnavailable,

    /// The hardware link is down.
    ///
    /// Write paths reject immediately with this error. Read paths log it and fall
    /// back to the last-known value.
    #[error("CHROLIS device is not available")]
    DeviceUnavailable,

    /// A value passed to a property was outside its declared domain.
    ///
    /// **Error Type**: Permanent - the input is never applied.
    #[error("Value {value} passed to '{property}' is out of bounds [{min}, {max}]")]
    ParamNotValid {
        property: String,
        value: i64,
        min: i64,
        max: i64,
    },

    /// Device enumeration returned no instruments.
    #[error("No available devices were found on the system")]
    NoAvailableDevices,

    /// The status code contains no recognised condition bit.
    ///
    /// Informational: the monitor logs it and still publishes a status message.
    #[error("Unknown hardware state (status code {0:#x})")]
    UnknownHardwareState(u32),

    /// Instrument read or write failed for a reason other than unavailability.
    ///
    /// **Error Type**: Usually transient (command collision, bus glitch).
    ///
    /// **Recovery Strategy**: The synchronization protocol re-reads the affected
    /// value and republishes it, so the host sees the confirmed hardware state.
    #[error("CHROLIS {kind} error: {message}")]
    Transport {
        kind: InstrumentErrorKind,
        message: String,
    },

    /// Configuration sources failed to parse or merge.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl ChrolisError {
    /// Build a transport error of the given instrument class.
    pub fn transport(kind: InstrumentErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Check if the hardware link was reported down.
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, Self::DeviceUnavailable)
    }

    /// Check if the owning hub could not be resolved.
    pub fn is_hub_unavailable(&self) -> bool {
        matches!(self, Self::HubUnavailable)
    }

    /// Check if a value was rejected by domain validation.
    pub fn is_param_not_valid(&self) -> bool {
        matches!(self, Self::ParamNotValid { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChrolisError::ParamNotValid {
            property: "State".into(),
            value: 64,
            min: 0,
            max: 63,
        };
        assert_eq!(
            err.to_string(),
            "Value 64 passed to 'State' is out of bounds [0, 63]"
        );
    }

    #[test]
    fn test_transport_error_display() {
        let err = ChrolisError::transport(InstrumentErrorKind::Receive, "no response");
        assert_eq!(err.to_string(), "CHROLIS receive error: no response");
    }

    #[test]
    fn test_unknown_state_formats_hex() {
        let err = ChrolisError::UnknownHardwareState(0x80);
        assert!(err.to_string().contains("0x80"));
    }

    #[test]
    fn test_classification_helpers() {
        assert!(ChrolisError::DeviceUnavailable.is_device_unavailable());
        assert!(!ChrolisError::HubUnavailable.is_device_unavailable());
        assert!(ChrolisError::HubUnavailable.is_hub_unavailable());
        assert!(!ChrolisError::transport(InstrumentErrorKind::Runtime, "x").is_param_not_valid());
    }
}
