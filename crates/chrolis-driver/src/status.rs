//! CHROLIS device status decoding.
//!
//! The instrument reports its operating conditions as a bitfield. Zero means
//! nominal; each of the seven low bits names one condition.

use bitflags::bitflags;

/// Message published when the status code is zero.
pub const NOMINAL_MESSAGE: &str = "No Error";

/// Message published when a non-zero status code has no recognised bit.
pub const UNKNOWN_MESSAGE: &str = "Unknown Status";

bitflags! {
    /// Condition bits of the CHROLIS status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u32 {
        const BOX_OPEN = 1 << 0;
        const LLG_NOT_CONNECTED = 1 << 1;
        const INTERLOCK_OPEN = 1 << 2;
        const DEFAULT_ADJUSTMENT = 1 << 3;
        const BOX_OVERHEATED = 1 << 4;
        const LED_OVERHEATED = 1 << 5;
        const INVALID_BOX_SETUP = 1 << 6;
    }
}

impl StatusFlags {
    /// Human-readable label of a single condition bit.
    pub fn label(self) -> &'static str {
        match self {
            f if f == Self::BOX_OPEN => "Box is Open",
            f if f == Self::LLG_NOT_CONNECTED => "LLG not Connected",
            f if f == Self::INTERLOCK_OPEN => "Interlock is Open",
            f if f == Self::DEFAULT_ADJUSTMENT => "Using Default Adjustment",
            f if f == Self::BOX_OVERHEATED => "Box Overheated",
            f if f == Self::LED_OVERHEATED => "LED Overheated",
            f if f == Self::INVALID_BOX_SETUP => "Invalid Box Setup",
            _ => UNKNOWN_MESSAGE,
        }
    }
}

/// A raw status code as read from the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// The all-clear code.
    pub const NOMINAL: StatusCode = StatusCode(0);

    pub fn is_nominal(self) -> bool {
        self.0 == 0
    }

    /// Recognised conditions; unknown bits are dropped.
    pub fn flags(self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.0)
    }

    /// Whether the code is non-zero but carries no recognised condition.
    pub fn is_unrecognised(self) -> bool {
        !self.is_nominal() && self.flags().is_empty()
    }

    /// Summary message for the "Device Status" property.
    ///
    /// Conditions are listed in bit order, separated by `", "`.
    pub fn message(self) -> String {
        if self.is_nominal() {
            return NOMINAL_MESSAGE.to_string();
        }
        if self.is_unrecognised() {
            return UNKNOWN_MESSAGE.to_string();
        }
        self.flags()
            .iter()
            .map(StatusFlags::label)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl From<u32> for StatusCode {
    fn from(code: u32) -> Self {
        StatusCode(code)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}
