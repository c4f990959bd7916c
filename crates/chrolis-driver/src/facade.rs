//! Device Facade: the synchronous call surface of a CHROLIS instrument.
//!
//! The hub owns exactly one facade and shares it with its peripherals. Implementations
//! must be callable from the monitor thread and host threads at the same time and
//! serialize instrument access internally.
//!
//! Any method may fail with [`ChrolisError::DeviceUnavailable`] when the link is down
//! or with [`ChrolisError::Transport`] for every other instrument failure.
//!
//! [`ChrolisError::DeviceUnavailable`]: chrolis_core::ChrolisError::DeviceUnavailable
//! [`ChrolisError::Transport`]: chrolis_core::ChrolisError::Transport

use crate::codec::{LedStates, NUM_LEDS};
use chrolis_core::Result;

/// Identification data read from a connected instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial_number: String,
    pub manufacturer: String,
    /// Peak wavelength of each LED in nm, index 0 first.
    pub wavelengths: [u16; NUM_LEDS],
}

impl DeviceInfo {
    /// Wavelengths as a comma separated list, e.g. `"365, 405, 470, 530, 590, 625"`.
    pub fn wavelength_list(&self) -> String {
        self.wavelengths
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Hardware access used by the hub, the shutter and the LED state device.
///
/// # Thread Safety
///
/// Requires `Send + Sync`; the facade is shared as `Arc<dyn ChrolisFacade>`.
pub trait ChrolisFacade: Send + Sync {
    /// Serial numbers of every instrument visible on the system.
    fn available_serial_numbers(&self) -> Result<Vec<String>>;

    /// Open the instrument with the given serial number.
    fn connect(&self, serial_number: &str) -> Result<()>;

    fn disconnect(&self) -> Result<()>;

    /// Current link state. Never cached by callers.
    fn is_connected(&self) -> bool;

    fn device_info(&self) -> Result<DeviceInfo>;

    /// Raw status register; see [`crate::status::StatusCode`].
    fn read_status_code(&self) -> Result<u32>;

    fn read_all_channel_enables(&self) -> Result<LedStates>;

    fn write_all_channel_enables(&self, states: LedStates) -> Result<()>;

    fn read_channel_enable(&self, led: usize) -> Result<bool>;

    fn write_channel_enable(&self, led: usize, enabled: bool) -> Result<()>;

    fn read_all_channel_brightness(&self) -> Result<[u16; NUM_LEDS]>;

    fn read_channel_brightness(&self, led: usize) -> Result<u16>;

    fn write_channel_brightness(&self, led: usize, brightness: u16) -> Result<()>;

    fn read_shutter_open(&self) -> Result<bool>;

    fn write_shutter_open(&self, open: bool) -> Result<()>;
}
