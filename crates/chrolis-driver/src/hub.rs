//! CHROLIS hub: owns the instrument connection and the status monitor.
//!
//! Peripherals ([`Shutter`](crate::Shutter), [`LedStateDevice`](crate::LedStateDevice))
//! are constructed against an `Arc<ChrolisHub>` and keep a `Weak` handle to it. The hub
//! drives their callbacks through its [`ChangeBus`].
//!
//! # Lifecycle
//!
//! 1. [`ChrolisHub::new`] enumerates instruments for the "Serial Number" property.
//! 2. [`ChrolisHub::initialize`] connects, publishes device info and starts the monitor.
//! 3. [`ChrolisHub::shutdown`] (or drop) stops the monitor; shutdown also disconnects.

use crate::bus::ChangeBus;
use crate::facade::ChrolisFacade;
use crate::monitor::StatusMonitor;
use crate::status::{StatusCode, NOMINAL_MESSAGE};
use chrolis_core::config::DEFAULT_SERIAL;
use chrolis_core::{ChrolisError, HubConfig, InstrumentErrorKind, Observable, PropertySet, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

pub const PROP_SERIAL_NUMBER: &str = "Serial Number";
pub const PROP_DEVICE_SERIAL: &str = "Device Serial Number";
pub const PROP_MANUFACTURER: &str = "Manufacturer Name";
pub const PROP_WAVELENGTHS: &str = "Available Wavelengths";
pub const PROP_DEVICE_STATUS: &str = "Device Status";

/// Hub-level properties.
#[derive(Debug, Clone)]
struct HubProperties {
    serial_number: Observable<String>,
    device_serial: Observable<String>,
    manufacturer: Observable<String>,
    wavelengths: Observable<String>,
    status: Observable<String>,
}

/// The CHROLIS hub device.
pub struct ChrolisHub {
    facade: Arc<dyn ChrolisFacade>,
    config: HubConfig,
    bus: Arc<ChangeBus>,
    properties: HubProperties,
    status_code: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ChrolisHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChrolisHub")
            .field("config", &self.config)
            .field("connected", &self.facade.is_connected())
            .field("monitor_running", &self.is_monitor_running())
            .finish_non_exhaustive()
    }
}

impl ChrolisHub {
    /// Create a hub over `facade`.
    ///
    /// Fails with [`ChrolisError::Configuration`] when `config` does not validate.
    /// Enumeration failures are logged; the "Serial Number" property then only offers
    /// `"DEFAULT"` and the configured serial.
    pub fn new(facade: Arc<dyn ChrolisFacade>, config: HubConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let mut allowed = vec![DEFAULT_SERIAL.to_string()];
        match facade.available_serial_numbers() {
            Ok(serials) => {
                debug!(count = serials.len(), "Enumerated CHROLIS instruments");
                allowed.extend(serials);
            }
            Err(e) => warn!(error = %e, "Failed to enumerate CHROLIS instruments"),
        }

        let initial_serial = config
            .requested_serial()
            .unwrap_or(DEFAULT_SERIAL)
            .to_string();
        if !allowed.contains(&initial_serial) {
            allowed.push(initial_serial.clone());
        }

        let properties = HubProperties {
            serial_number: Observable::new(PROP_SERIAL_NUMBER, initial_serial)
                .with_description("Serial number of the instrument to open")
                .with_allowed_values(allowed),
            device_serial: Observable::new(PROP_DEVICE_SERIAL, String::new())
                .with_dtype("string")
                .read_only(),
            manufacturer: Observable::new(PROP_MANUFACTURER, String::new())
                .with_dtype("string")
                .read_only(),
            wavelengths: Observable::new(PROP_WAVELENGTHS, String::new())
                .with_units("nm")
                .with_dtype("string")
                .read_only(),
            status: Observable::new(PROP_DEVICE_STATUS, NOMINAL_MESSAGE.to_string())
                .with_dtype("string")
                .read_only(),
        };

        Ok(Arc::new(Self {
            facade,
            config,
            bus: Arc::new(ChangeBus::new()),
            properties,
            status_code: Arc::new(AtomicU32::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            monitor: Mutex::new(None),
        }))
    }

    /// Connect, publish device info and start the status monitor.
    pub fn initialize(&self) -> Result<()> {
        let serial = self.resolve_serial()?;
        info!(serial = %serial, "Connecting to CHROLIS");
        self.facade.connect(&serial)?;

        let info = self.facade.device_info()?;
        self.properties.device_serial.publish(info.serial_number.clone());
        self.properties.manufacturer.publish(info.manufacturer.clone());
        self.properties.wavelengths.publish(info.wavelength_list());
        self.properties
            .status
            .publish(self.current_status_code().message());

        self.start_monitor()?;
        info!(
            serial = %info.serial_number,
            wavelengths = %info.wavelength_list(),
            "CHROLIS hub initialized"
        );
        Ok(())
    }

    /// Stop the monitor and disconnect.
    pub fn shutdown(&self) -> Result<()> {
        self.stop_monitor();
        if self.facade.is_connected() {
            self.facade.disconnect()?;
        }
        info!("CHROLIS hub shut down");
        Ok(())
    }

    /// Serial to connect to: the "Serial Number" property, or the first enumerated
    /// instrument when it is `"DEFAULT"`.
    fn resolve_serial(&self) -> Result<String> {
        let requested = self.properties.serial_number.get();
        if !requested.is_empty() && requested != DEFAULT_SERIAL {
            return Ok(requested);
        }
        self.facade
            .available_serial_numbers()?
            .into_iter()
            .next()
            .ok_or(ChrolisError::NoAvailableDevices)
    }

    fn start_monitor(&self) -> Result<()> {
        let mut slot = self.monitor.lock();
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Reap a loop that stopped on its own after a read failure.
        if let Some(handle) = slot.take() {
            let _ = handle.join();
        }

        self.running.store(true, Ordering::SeqCst);
        let monitor = StatusMonitor::new(
            self.facade.clone(),
            self.bus.clone(),
            self.properties.status.clone(),
            self.status_code.clone(),
        );
        let running = self.running.clone();
        let interval = self.config.poll_interval();

        let handle = thread::Builder::new()
            .name("chrolis-monitor".into())
            .spawn(move || monitor.run(&running, interval))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                ChrolisError::transport(
                    InstrumentErrorKind::Internal,
                    format!("failed to spawn status monitor: {}", e),
                )
            })?;
        *slot = Some(handle);
        Ok(())
    }

    /// Clear the running flag and join the polling thread.
    fn stop_monitor(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.monitor.lock().take() {
            if let Err(e) = handle.join() {
                error!("Status monitor thread panicked: {:?}", e);
            }
        }
    }

    pub fn is_monitor_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Status code last observed by the monitor.
    pub fn current_status_code(&self) -> StatusCode {
        StatusCode(self.status_code.load(Ordering::SeqCst))
    }

    pub fn facade(&self) -> &Arc<dyn ChrolisFacade> {
        &self.facade
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The "Device Status" property.
    pub fn status(&self) -> &Observable<String> {
        &self.properties.status
    }

    /// The "Serial Number" property. Set it before [`initialize`](Self::initialize)
    /// to choose an instrument.
    pub fn serial_number(&self) -> &Observable<String> {
        &self.properties.serial_number
    }

    pub fn properties(&self) -> PropertySet {
        let mut set = PropertySet::new();
        set.register(self.properties.serial_number.clone());
        set.register(self.properties.device_serial.clone());
        set.register(self.properties.manufacturer.clone());
        set.register(self.properties.wavelengths.clone());
        set.register(self.properties.status.clone());
        set
    }
}

impl Drop for ChrolisHub {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            debug!("Stopping status monitor on drop");
        }
        self.stop_monitor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Fault, Operation, SimulatedChrolis, SIMULATED_SERIAL};
    use std::time::{Duration, Instant};

    fn fast_config() -> HubConfig {
        HubConfig {
            poll_interval_ms: 5,
            ..HubConfig::default()
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_serial_property_lists_enumerated_devices() {
        let sim = Arc::new(SimulatedChrolis::with_serials(vec!["M1".into(), "M2".into()]));
        let hub = ChrolisHub::new(sim, HubConfig::default()).unwrap();
        let allowed = hub.serial_number().metadata().allowed_values;
        assert_eq!(allowed, vec!["DEFAULT", "M1", "M2"]);
        assert_eq!(hub.serial_number().get(), DEFAULT_SERIAL);
    }

    #[test]
    fn test_initialize_publishes_device_info() {
        let sim = Arc::new(SimulatedChrolis::new());
        let hub = ChrolisHub::new(sim.clone(), fast_config()).unwrap();
        hub.initialize().unwrap();

        let props = hub.properties();
        let serial = props.get(PROP_DEVICE_SERIAL).unwrap().get_json().unwrap();
        assert_eq!(serial, serde_json::json!(SIMULATED_SERIAL));
        let manufacturer = props.get(PROP_MANUFACTURER).unwrap().get_json().unwrap();
        assert_eq!(manufacturer, serde_json::json!("Thorlabs"));
        assert!(hub.is_monitor_running());

        hub.shutdown().unwrap();
        assert!(!hub.is_monitor_running());
        assert!(!sim.is_connected());
    }

    #[test]
    fn test_initialize_without_devices() {
        let sim = Arc::new(SimulatedChrolis::with_serials(Vec::new()));
        let hub = ChrolisHub::new(sim, fast_config()).unwrap();
        let err = hub.initialize().unwrap_err();
        assert!(matches!(err, ChrolisError::NoAvailableDevices));
        assert!(!hub.is_monitor_running());
    }

    #[test]
    fn test_connect_failure_does_not_start_monitor() {
        let sim = Arc::new(SimulatedChrolis::new());
        sim.fail_next(Operation::Connect, Fault::Unavailable);
        let hub = ChrolisHub::new(sim, fast_config()).unwrap();
        assert!(hub.initialize().unwrap_err().is_device_unavailable());
        assert!(!hub.is_monitor_running());
    }

    #[test]
    fn test_explicit_serial_is_used() {
        let sim = Arc::new(SimulatedChrolis::with_serials(vec!["M1".into(), "M2".into()]));
        let hub = ChrolisHub::new(sim.clone(), fast_config()).unwrap();
        hub.serial_number().set("M2".to_string()).unwrap();
        hub.initialize().unwrap();
        assert_eq!(sim.device_info().unwrap().serial_number, "M2");
    }

    #[test]
    fn test_monitor_tracks_status() {
        let sim = Arc::new(SimulatedChrolis::new());
        let hub = ChrolisHub::new(sim.clone(), fast_config()).unwrap();
        hub.initialize().unwrap();

        sim.set_status_code(0x24);
        assert!(wait_for(|| hub.current_status_code() == StatusCode(0x24)));
        assert!(wait_for(|| hub.status().get() == "Interlock is Open, LED Overheated"));
    }

    #[test]
    fn test_monitor_stops_on_read_failure() {
        let sim = Arc::new(SimulatedChrolis::new());
        let hub = ChrolisHub::new(sim.clone(), fast_config()).unwrap();
        hub.initialize().unwrap();

        sim.fail_always(Operation::ReadStatusCode, Fault::Unavailable);
        assert!(wait_for(|| !hub.is_monitor_running()));
        // On-demand access keeps working.
        assert!(sim.read_shutter_open().is_ok());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let sim = Arc::new(SimulatedChrolis::new());
        let inverted = HubConfig {
            brightness_min: 10,
            brightness_max: 5,
            ..HubConfig::default()
        };
        let err = ChrolisHub::new(sim.clone(), inverted).unwrap_err();
        assert!(matches!(err, ChrolisError::Configuration(_)));

        let busy = HubConfig {
            poll_interval_ms: 0,
            ..HubConfig::default()
        };
        assert!(ChrolisHub::new(sim, busy).is_err());
    }

    #[test]
    fn test_drop_joins_monitor() {
        let sim = Arc::new(SimulatedChrolis::new());
        let hub = ChrolisHub::new(sim.clone(), fast_config()).unwrap();
        hub.initialize().unwrap();
        drop(hub);

        let polls = sim.call_count(Operation::ReadStatusCode);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sim.call_count(Operation::ReadStatusCode), polls);
    }
}
