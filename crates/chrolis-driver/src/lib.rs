//! Thorlabs CHROLIS six-channel LED hub driver.
//!
//! A [`ChrolisHub`] owns the instrument connection (any [`ChrolisFacade`]) and a
//! background status monitor. Two peripherals are built against it:
//!
//! - [`Shutter`] - shutter open/closed
//! - [`LedStateDevice`] - aggregate "State" mask, per-LED enable flags and brightness
//!
//! Every hardware-backed property goes through the synchronization protocol in
//! [`sync`]: reads fall back to last-known values, failed writes revert the property
//! to a confirmed hardware value.
//!
//! # Example
//!
//! ```rust,ignore
//! use chrolis_core::HubConfig;
//! use chrolis_driver::{ChrolisHub, LedStateDevice, SimulatedChrolis};
//! use std::sync::Arc;
//!
//! let hub = ChrolisHub::new(Arc::new(SimulatedChrolis::new()), HubConfig::default())?;
//! hub.initialize()?;
//!
//! let leds = LedStateDevice::new(&hub);
//! leds.initialize()?;
//! leds.set_state(0b000101)?;
//! leds.set_power(0, 500)?;
//! ```

pub mod bus;
pub mod codec;
pub mod facade;
pub mod hub;
pub mod monitor;
pub mod shutter;
pub mod simulated;
pub mod state_device;
pub mod status;
pub mod sync;

pub use bus::{CallbackSlot, ChangeBus};
pub use codec::{LedStates, MAX_MASK, NUM_LEDS};
pub use facade::{ChrolisFacade, DeviceInfo};
pub use hub::ChrolisHub;
pub use monitor::StatusMonitor;
pub use shutter::Shutter;
pub use simulated::{Fault, Operation, SimulatedChrolis};
pub use state_device::LedStateDevice;
pub use status::{StatusCode, StatusFlags};
