//! In-memory CHROLIS for tests and the CLI.
//!
//! `SimulatedChrolis` implements [`ChrolisFacade`] over a mutex-guarded state block.
//! Test code drives out-of-band changes (interlock, manual LED toggles, link loss) with
//! the `set_*` helpers and injects failures per operation with a [`FaultPlan`].
//!
//! # Example
//!
//! ```rust,ignore
//! let sim = SimulatedChrolis::new();
//! sim.fail_next(Operation::WriteChannelBrightness, Fault::transport(InstrumentErrorKind::Transmit));
//! assert!(sim.write_channel_brightness(0, 10).is_err());
//! assert!(sim.write_channel_brightness(0, 10).is_ok());
//! ```

use crate::codec::{LedStates, NUM_LEDS};
use crate::facade::{ChrolisFacade, DeviceInfo};
use chrolis_core::{ChrolisError, InstrumentErrorKind, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Serial number reported by a default simulated instrument.
pub const SIMULATED_SERIAL: &str = "M00612345";

/// Largest brightness the simulated hardware accepts.
pub const HARDWARE_MAX_BRIGHTNESS: u16 = 1000;

const SIMULATED_WAVELENGTHS: [u16; NUM_LEDS] = [365, 405, 470, 530, 590, 625];

/// Facade operations that accept an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    AvailableSerialNumbers,
    Connect,
    Disconnect,
    DeviceInfo,
    ReadStatusCode,
    ReadAllChannelEnables,
    WriteAllChannelEnables,
    ReadChannelEnable,
    WriteChannelEnable,
    ReadAllChannelBrightness,
    ReadChannelBrightness,
    WriteChannelBrightness,
    ReadShutterOpen,
    WriteShutterOpen,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::AvailableSerialNumbers => "available_serial_numbers",
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
            Operation::DeviceInfo => "device_info",
            Operation::ReadStatusCode => "read_status_code",
            Operation::ReadAllChannelEnables => "read_all_channel_enables",
            Operation::WriteAllChannelEnables => "write_all_channel_enables",
            Operation::ReadChannelEnable => "read_channel_enable",
            Operation::WriteChannelEnable => "write_channel_enable",
            Operation::ReadAllChannelBrightness => "read_all_channel_brightness",
            Operation::ReadChannelBrightness => "read_channel_brightness",
            Operation::WriteChannelBrightness => "write_channel_brightness",
            Operation::ReadShutterOpen => "read_shutter_open",
            Operation::WriteShutterOpen => "write_shutter_open",
        }
    }
}

/// Failure returned by an operation with an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fails with [`ChrolisError::DeviceUnavailable`].
    Unavailable,
    /// Fails with [`ChrolisError::Transport`] of the given class.
    Transport(InstrumentErrorKind),
}

impl Fault {
    pub fn transport(kind: InstrumentErrorKind) -> Self {
        Fault::Transport(kind)
    }

    fn into_error(self, operation: Operation) -> ChrolisError {
        match self {
            Fault::Unavailable => ChrolisError::DeviceUnavailable,
            Fault::Transport(kind) => {
                ChrolisError::transport(kind, format!("injected failure on '{}'", operation.as_str()))
            }
        }
    }
}

/// Per-operation fault schedule.
#[derive(Debug, Default)]
pub struct FaultPlan {
    one_shot: HashMap<Operation, VecDeque<Fault>>,
    persistent: HashMap<Operation, Fault>,
}

impl FaultPlan {
    /// Fault to apply to this call, consuming a one-shot entry first.
    fn take(&mut self, operation: Operation) -> Option<Fault> {
        if let Some(queue) = self.one_shot.get_mut(&operation) {
            if let Some(fault) = queue.pop_front() {
                return Some(fault);
            }
        }
        self.persistent.get(&operation).copied()
    }

    fn clear(&mut self) {
        self.one_shot.clear();
        self.persistent.clear();
    }
}

#[derive(Debug)]
struct SimState {
    serials: Vec<String>,
    connected_serial: Option<String>,
    status_code: u32,
    enables: LedStates,
    brightness: [u16; NUM_LEDS],
    shutter_open: bool,
    faults: FaultPlan,
    calls: HashMap<Operation, usize>,
}

/// Simulated CHROLIS instrument.
#[derive(Debug)]
pub struct SimulatedChrolis {
    state: Mutex<SimState>,
}

impl Default for SimulatedChrolis {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChrolis {
    /// One instrument with serial [`SIMULATED_SERIAL`], all LEDs off, shutter open.
    pub fn new() -> Self {
        Self::with_serials(vec![SIMULATED_SERIAL.to_string()])
    }

    /// Instruments with the given serial numbers. An empty list simulates a bare system.
    pub fn with_serials(serials: Vec<String>) -> Self {
        Self {
            state: Mutex::new(SimState {
                serials,
                connected_serial: None,
                status_code: 0,
                enables: [false; NUM_LEDS],
                brightness: [0; NUM_LEDS],
                shutter_open: true,
                faults: FaultPlan::default(),
                calls: HashMap::new(),
            }),
        }
    }

    /// Fail the next call of `operation` with `fault`. Queued faults apply in order.
    pub fn fail_next(&self, operation: Operation, fault: Fault) {
        self.state
            .lock()
            .faults
            .one_shot
            .entry(operation)
            .or_default()
            .push_back(fault);
    }

    /// Fail every call of `operation` until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&self, operation: Operation, fault: Fault) {
        self.state.lock().faults.persistent.insert(operation, fault);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Number of calls made to `operation`, failed ones included.
    pub fn call_count(&self, operation: Operation) -> usize {
        self.state.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Change the status register as the instrument would on its own.
    pub fn set_status_code(&self, code: u32) {
        self.state.lock().status_code = code;
    }

    /// Change enable states behind the driver's back.
    pub fn set_hardware_enables(&self, enables: LedStates) {
        self.state.lock().enables = enables;
    }

    pub fn set_hardware_brightness(&self, led: usize, brightness: u16) {
        if let Some(slot) = self.state.lock().brightness.get_mut(led) {
            *slot = brightness;
        }
    }

    pub fn set_hardware_shutter(&self, open: bool) {
        self.state.lock().shutter_open = open;
    }

    /// Force the link state. `false` simulates a pulled cable.
    pub fn set_connected(&self, connected: bool) {
        let mut state = self.state.lock();
        let serial = if connected {
            state
                .serials
                .first()
                .cloned()
                .or_else(|| Some(SIMULATED_SERIAL.to_string()))
        } else {
            None
        };
        state.connected_serial = serial;
    }

    pub fn hardware_enables(&self) -> LedStates {
        self.state.lock().enables
    }

    pub fn hardware_brightness(&self) -> [u16; NUM_LEDS] {
        self.state.lock().brightness
    }

    pub fn hardware_shutter(&self) -> bool {
        self.state.lock().shutter_open
    }

    /// Run `f` against the state after call bookkeeping and fault injection.
    fn call<T>(&self, operation: Operation, f: impl FnOnce(&mut SimState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        *state.calls.entry(operation).or_insert(0) += 1;
        if let Some(fault) = state.faults.take(operation) {
            return Err(fault.into_error(operation));
        }
        f(&mut *state)
    }

    /// Like [`call`](Self::call) but requires an open link.
    fn call_connected<T>(
        &self,
        operation: Operation,
        f: impl FnOnce(&mut SimState) -> Result<T>,
    ) -> Result<T> {
        self.call(operation, |state| {
            if state.connected_serial.is_none() {
                return Err(ChrolisError::DeviceUnavailable);
            }
            f(state)
        })
    }
}

fn check_led(led: usize) -> Result<()> {
    if led < NUM_LEDS {
        Ok(())
    } else {
        Err(ChrolisError::transport(
            InstrumentErrorKind::Parameter,
            format!("LED index {} out of range", led),
        ))
    }
}

impl ChrolisFacade for SimulatedChrolis {
    fn available_serial_numbers(&self) -> Result<Vec<String>> {
        self.call(Operation::AvailableSerialNumbers, |state| Ok(state.serials.clone()))
    }

    fn connect(&self, serial_number: &str) -> Result<()> {
        self.call(Operation::Connect, |state| {
            if !state.serials.iter().any(|s| s == serial_number) {
                return Err(ChrolisError::transport(
                    InstrumentErrorKind::Runtime,
                    format!("no instrument with serial number '{}'", serial_number),
                ));
            }
            state.connected_serial = Some(serial_number.to_string());
            Ok(())
        })
    }

    fn disconnect(&self) -> Result<()> {
        self.call(Operation::Disconnect, |state| {
            state.connected_serial = None;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected_serial.is_some()
    }

    fn device_info(&self) -> Result<DeviceInfo> {
        self.call_connected(Operation::DeviceInfo, |state| {
            Ok(DeviceInfo {
                serial_number: state.connected_serial.clone().unwrap_or_default(),
                manufacturer: "Thorlabs".to_string(),
                wavelengths: SIMULATED_WAVELENGTHS,
            })
        })
    }

    fn read_status_code(&self) -> Result<u32> {
        self.call_connected(Operation::ReadStatusCode, |state| Ok(state.status_code))
    }

    fn read_all_channel_enables(&self) -> Result<LedStates> {
        self.call_connected(Operation::ReadAllChannelEnables, |state| Ok(state.enables))
    }

    fn write_all_channel_enables(&self, states: LedStates) -> Result<()> {
        self.call_connected(Operation::WriteAllChannelEnables, |state| {
            state.enables = states;
            Ok(())
        })
    }

    fn read_channel_enable(&self, led: usize) -> Result<bool> {
        check_led(led)?;
        self.call_connected(Operation::ReadChannelEnable, |state| Ok(state.enables[led]))
    }

    fn write_channel_enable(&self, led: usize, enabled: bool) -> Result<()> {
        check_led(led)?;
        self.call_connected(Operation::WriteChannelEnable, |state| {
            state.enables[led] = enabled;
            Ok(())
        })
    }

    fn read_all_channel_brightness(&self) -> Result<[u16; NUM_LEDS]> {
        self.call_connected(Operation::ReadAllChannelBrightness, |state| {
            Ok(state.brightness)
        })
    }

    fn read_channel_brightness(&self, led: usize) -> Result<u16> {
        check_led(led)?;
        self.call_connected(Operation::ReadChannelBrightness, |state| {
            Ok(state.brightness[led])
        })
    }

    fn write_channel_brightness(&self, led: usize, brightness: u16) -> Result<()> {
        check_led(led)?;
        self.call_connected(Operation::WriteChannelBrightness, |state| {
            if brightness > HARDWARE_MAX_BRIGHTNESS {
                return Err(ChrolisError::transport(
                    InstrumentErrorKind::Parameter,
                    format!(
                        "brightness {} exceeds hardware maximum {}",
                        brightness, HARDWARE_MAX_BRIGHTNESS
                    ),
                ));
            }
            state.brightness[led] = brightness;
            Ok(())
        })
    }

    fn read_shutter_open(&self) -> Result<bool> {
        self.call_connected(Operation::ReadShutterOpen, |state| Ok(state.shutter_open))
    }

    fn write_shutter_open(&self, open: bool) -> Result<()> {
        self.call_connected(Operation::WriteShutterOpen, |state| {
            state.shutter_open = open;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> SimulatedChrolis {
        let sim = SimulatedChrolis::new();
        sim.connect(SIMULATED_SERIAL).unwrap();
        sim
    }

    #[test]
    fn test_connect_unknown_serial_fails() {
        let sim = SimulatedChrolis::new();
        let err = sim.connect("M00000000").unwrap_err();
        assert!(matches!(err, ChrolisError::Transport { .. }));
        assert!(!sim.is_connected());
    }

    #[test]
    fn test_reads_require_connection() {
        let sim = SimulatedChrolis::new();
        assert!(sim.read_status_code().unwrap_err().is_device_unavailable());
    }

    #[test]
    fn test_one_shot_fault() {
        let sim = connected();
        sim.fail_next(
            Operation::ReadShutterOpen,
            Fault::transport(InstrumentErrorKind::Receive),
        );
        assert!(sim.read_shutter_open().is_err());
        assert!(sim.read_shutter_open().is_ok());
        assert_eq!(sim.call_count(Operation::ReadShutterOpen), 2);
    }

    #[test]
    fn test_persistent_fault_until_cleared() {
        let sim = connected();
        sim.fail_always(Operation::ReadStatusCode, Fault::Unavailable);
        assert!(sim.read_status_code().unwrap_err().is_device_unavailable());
        assert!(sim.read_status_code().is_err());
        sim.clear_faults();
        assert_eq!(sim.read_status_code().unwrap(), 0);
    }

    #[test]
    fn test_brightness_above_hardware_max_rejected() {
        let sim = connected();
        let err = sim
            .write_channel_brightness(2, HARDWARE_MAX_BRIGHTNESS + 1)
            .unwrap_err();
        assert!(matches!(
            err,
            ChrolisError::Transport {
                kind: InstrumentErrorKind::Parameter,
                ..
            }
        ));
        assert_eq!(sim.hardware_brightness()[2], 0);
    }

    #[test]
    fn test_led_index_checked() {
        let sim = connected();
        assert!(sim.read_channel_enable(NUM_LEDS).is_err());
    }

    #[test]
    fn test_device_info() {
        let sim = connected();
        let info = sim.device_info().unwrap();
        assert_eq!(info.serial_number, SIMULATED_SERIAL);
        assert_eq!(info.manufacturer, "Thorlabs");
    }
}
