//! CHROLIS shutter.

use crate::facade::ChrolisFacade;
use crate::hub::ChrolisHub;
use crate::sync::{self, SyncBinding};
use chrolis_core::{ChrolisError, Observable, PropertySet, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub const PROP_SHUTTER_OPEN: &str = "Shutter Open";

/// Shutter device backed by the hub's instrument.
pub struct Shutter {
    hub: Weak<ChrolisHub>,
    property: Observable<bool>,
    last_known: Arc<Mutex<bool>>,
}

impl std::fmt::Debug for Shutter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutter")
            .field("open", &*self.last_known.lock())
            .finish_non_exhaustive()
    }
}

impl Shutter {
    pub fn new(hub: &Arc<ChrolisHub>) -> Self {
        Self {
            hub: Arc::downgrade(hub),
            property: Observable::new(PROP_SHUTTER_OPEN, false).with_dtype("bool"),
            last_known: Arc::new(Mutex::new(false)),
        }
    }

    /// Close the shutter (if configured) and install the shutter-slot handler.
    pub fn initialize(&self) -> Result<()> {
        let hub = self.hub.upgrade().ok_or(ChrolisError::HubUnavailable)?;
        let facade = hub.facade();

        if facade.is_connected() {
            if hub.config().close_shutter_on_init {
                match facade.write_shutter_open(false) {
                    Ok(()) => *self.last_known.lock() = false,
                    Err(e) => warn!(error = %e, "Failed to close shutter on initialization"),
                }
            }
            match facade.read_shutter_open() {
                Ok(open) => *self.last_known.lock() = open,
                Err(e) => warn!(error = %e, "Failed to read shutter state"),
            }
        }
        self.property.refresh(*self.last_known.lock());

        let property = self.property.clone();
        let last_known = self.last_known.clone();
        hub.bus().shutter.install(move |index, value| {
            if index != 0 {
                debug!(index, "Ignoring shutter push for unknown index");
                return;
            }
            let open = value != 0;
            *last_known.lock() = open;
            property.publish(open);
        });

        info!(open = *self.last_known.lock(), "Shutter initialized");
        Ok(())
    }

    /// Detach from the hub's shutter slot.
    pub fn shutdown(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.bus().shutter.clear();
        }
    }

    pub fn set_open(&self, open: bool) -> Result<()> {
        self.property.publish(open);
        sync::after_set(&self.hub, &self.binding(), open)
    }

    pub fn get_open(&self) -> Result<bool> {
        sync::before_get(&self.hub, &self.binding())
    }

    pub fn open(&self) -> Result<()> {
        self.set_open(true)
    }

    pub fn close(&self) -> Result<()> {
        self.set_open(false)
    }

    pub fn property(&self) -> &Observable<bool> {
        &self.property
    }

    pub fn properties(&self) -> PropertySet {
        let mut set = PropertySet::new();
        set.register(self.property.clone());
        set
    }

    fn binding(&self) -> ShutterBinding<'_> {
        ShutterBinding {
            property: &self.property,
            last_known: &self.last_known,
        }
    }
}

struct ShutterBinding<'a> {
    property: &'a Observable<bool>,
    last_known: &'a Mutex<bool>,
}

impl SyncBinding for ShutterBinding<'_> {
    type Value = bool;

    fn property(&self) -> &Observable<bool> {
        self.property
    }

    fn last_known(&self) -> bool {
        *self.last_known.lock()
    }

    fn remember(&self, value: bool) {
        *self.last_known.lock() = value;
    }

    fn read(&self, facade: &dyn ChrolisFacade) -> Result<bool> {
        facade.read_shutter_open()
    }

    fn write(&self, facade: &dyn ChrolisFacade, value: bool) -> Result<()> {
        facade.write_shutter_open(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Fault, Operation, SimulatedChrolis};
    use chrolis_core::{HubConfig, InstrumentErrorKind};

    fn setup(config: HubConfig) -> (Arc<SimulatedChrolis>, Arc<ChrolisHub>, Shutter) {
        let sim = Arc::new(SimulatedChrolis::new());
        let hub = ChrolisHub::new(
            sim.clone(),
            HubConfig {
                poll_interval_ms: 5,
                ..config
            },
        )
        .unwrap();
        hub.initialize().unwrap();
        let shutter = Shutter::new(&hub);
        shutter.initialize().unwrap();
        (sim, hub, shutter)
    }

    #[test]
    fn test_initialize_closes_shutter() {
        let (sim, hub, shutter) = setup(HubConfig::default());
        assert!(!sim.hardware_shutter());
        assert!(!shutter.property().get());
        assert!(hub.bus().shutter.is_installed());
    }

    #[test]
    fn test_initialize_can_leave_shutter_open() {
        let config = HubConfig {
            close_shutter_on_init: false,
            ..HubConfig::default()
        };
        let (sim, _hub, shutter) = setup(config);
        assert!(sim.hardware_shutter());
        assert!(shutter.property().get());
    }

    #[test]
    fn test_open_and_close() {
        let (sim, _hub, shutter) = setup(HubConfig::default());
        shutter.open().unwrap();
        assert!(sim.hardware_shutter());
        assert!(shutter.get_open().unwrap());

        shutter.close().unwrap();
        assert!(!sim.hardware_shutter());
    }

    #[test]
    fn test_failed_open_reverts() {
        let (sim, _hub, shutter) = setup(HubConfig::default());
        sim.fail_next(
            Operation::WriteShutterOpen,
            Fault::transport(InstrumentErrorKind::Runtime),
        );
        assert!(shutter.open().is_err());
        assert!(!shutter.property().get());
    }

    #[test]
    fn test_push_updates_property() {
        let (_sim, hub, shutter) = setup(HubConfig::default());
        hub.bus().shutter.notify(0, 1);
        assert!(shutter.property().get());
        assert!(*shutter.last_known.lock());
    }

    #[test]
    fn test_hub_dropped() {
        let (_sim, hub, shutter) = setup(HubConfig::default());
        drop(hub);
        assert!(shutter.open().unwrap_err().is_hub_unavailable());
        assert!(!shutter.property().get());
        assert!(shutter.get_open().unwrap_err().is_hub_unavailable());
    }
}
