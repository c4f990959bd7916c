//! Six-channel LED state device.
//!
//! Exposes the aggregate "State" mask, six "LED Enable State n" flags and six
//! "LED n Power" brightness values. All three families share one last-known cell so
//! the mask and the per-LED flags cannot disagree.

use crate::codec::{self, LedStates, MAX_MASK, NUM_LEDS};
use crate::facade::ChrolisFacade;
use crate::hub::ChrolisHub;
use crate::sync::{self, SyncBinding};
use chrolis_core::{ChrolisError, Observable, PropertySet, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub const PROP_STATE: &str = "State";

pub fn enable_property_name(led: usize) -> String {
    format!("LED Enable State {}", led + 1)
}

pub fn power_property_name(led: usize) -> String {
    format!("LED {} Power", led + 1)
}

/// Confirmed hardware values.
#[derive(Debug, Default, Clone, Copy)]
struct LastKnown {
    enables: LedStates,
    brightness: [u16; NUM_LEDS],
}

#[derive(Debug)]
struct LedProperties {
    state: Observable<i64>,
    enables: [Observable<i64>; NUM_LEDS],
    powers: [Observable<i64>; NUM_LEDS],
}

impl LedProperties {
    /// Bring the per-LED flags in line with `enables`.
    fn sync_channels(&self, enables: &LedStates) {
        for (property, &enabled) in self.enables.iter().zip(enables) {
            property.refresh(i64::from(enabled));
        }
    }

    /// Bring the aggregate mask in line with `enables`.
    fn sync_mask(&self, enables: &LedStates) {
        self.state.refresh(i64::from(codec::encode(enables)));
    }
}

/// The CHROLIS LED state device.
pub struct LedStateDevice {
    hub: Weak<ChrolisHub>,
    properties: Arc<LedProperties>,
    cells: Arc<Mutex<LastKnown>>,
    /// Held across every mask or enable operation and every monitor push.
    enable_ops: Arc<Mutex<()>>,
}

impl std::fmt::Debug for LedStateDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedStateDevice")
            .field("hub_alive", &(self.hub.strong_count() > 0))
            .field("last_known", &*self.cells.lock())
            .finish()
    }
}

impl LedStateDevice {
    /// Create the device against `hub`. Brightness bounds come from the hub config.
    pub fn new(hub: &Arc<ChrolisHub>) -> Self {
        let config = hub.config();
        let (min, max) = (
            i64::from(config.brightness_min),
            i64::from(config.brightness_max),
        );

        let properties = LedProperties {
            state: Observable::new(PROP_STATE, 0i64)
                .with_description("LED enable states packed as bits, LED 1 in bit 0")
                .with_range_introspectable(0, i64::from(MAX_MASK)),
            enables: std::array::from_fn(|led| {
                Observable::new(enable_property_name(led), 0i64).with_range_introspectable(0, 1)
            }),
            powers: std::array::from_fn(|led| {
                Observable::new(power_property_name(led), min)
                    .with_units("‰")
                    .with_range_introspectable(min, max)
            }),
        };

        Self {
            hub: Arc::downgrade(hub),
            properties: Arc::new(properties),
            cells: Arc::new(Mutex::new(LastKnown {
                enables: [false; NUM_LEDS],
                brightness: [config.brightness_min; NUM_LEDS],
            })),
            enable_ops: Arc::new(Mutex::new(())),
        }
    }

    /// Install the state-slot handler and read initial hardware state.
    pub fn initialize(&self) -> Result<()> {
        let hub = self.hub.upgrade().ok_or(ChrolisError::HubUnavailable)?;

        let properties = self.properties.clone();
        let cells = self.cells.clone();
        let enable_ops = self.enable_ops.clone();
        hub.bus().state.install(move |index, value| {
            let _guard = enable_ops.lock();
            apply_push(&properties, &cells, index, value);
        });

        let facade = hub.facade();
        if facade.is_connected() {
            match facade.read_all_channel_enables() {
                Ok(enables) => self.cells.lock().enables = enables,
                Err(e) => warn!(error = %e, "Failed to read initial LED enables"),
            }
            match facade.read_all_channel_brightness() {
                Ok(brightness) => self.cells.lock().brightness = brightness,
                Err(e) => warn!(error = %e, "Failed to read initial LED brightness"),
            }
        }

        let cells = *self.cells.lock();
        self.properties.sync_mask(&cells.enables);
        self.properties.sync_channels(&cells.enables);
        for (property, &brightness) in self.properties.powers.iter().zip(&cells.brightness) {
            property.refresh(i64::from(brightness));
        }

        info!(mask = codec::encode(&cells.enables), "LED state device initialized");
        Ok(())
    }

    /// Detach from the hub's state slot.
    pub fn shutdown(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.bus().state.clear();
        }
    }

    /// Labels of the six positions, `"-0"` to `"-5"`.
    pub fn position_labels(&self) -> Vec<String> {
        (0..NUM_LEDS).map(|i| format!("-{}", i)).collect()
    }

    pub fn get_state(&self) -> Result<i64> {
        self.with_enable_ops(|| {
            let value = sync::before_get(&self.hub, &self.mask_binding())?;
            self.properties.sync_channels(&self.cells.lock().enables);
            Ok(value)
        })
    }

    /// Write the aggregate mask. Values outside `0..=63` are rejected.
    pub fn set_state(&self, mask: i64) -> Result<()> {
        self.with_enable_ops(|| {
            self.properties.state.publish(mask);
            let result = sync::after_set(&self.hub, &self.mask_binding(), mask);
            self.properties.sync_channels(&self.cells.lock().enables);
            result
        })
    }

    pub fn get_enable(&self, led: usize) -> Result<i64> {
        check_led(led)?;
        self.with_enable_ops(|| {
            let value = sync::before_get(&self.hub, &self.enable_binding(led))?;
            self.properties.sync_mask(&self.cells.lock().enables);
            Ok(value)
        })
    }

    /// Write one LED's enable flag. Any non-zero value enables the LED.
    pub fn set_enable(&self, led: usize, value: i64) -> Result<()> {
        check_led(led)?;
        let value = i64::from(value != 0);
        self.with_enable_ops(|| {
            self.properties.enables[led].publish(value);
            let result = sync::after_set(&self.hub, &self.enable_binding(led), value);
            self.properties.sync_mask(&self.cells.lock().enables);
            result
        })
    }

    pub fn get_power(&self, led: usize) -> Result<i64> {
        check_led(led)?;
        sync::before_get(&self.hub, &self.power_binding(led))
    }

    /// Write one LED's brightness. Values outside the configured bounds are rejected.
    pub fn set_power(&self, led: usize, value: i64) -> Result<()> {
        check_led(led)?;
        self.properties.powers[led].publish(value);
        sync::after_set(&self.hub, &self.power_binding(led), value)
    }

    /// The "State" property.
    pub fn state(&self) -> &Observable<i64> {
        &self.properties.state
    }

    pub fn enable(&self, led: usize) -> Option<&Observable<i64>> {
        self.properties.enables.get(led)
    }

    pub fn power(&self, led: usize) -> Option<&Observable<i64>> {
        self.properties.powers.get(led)
    }

    pub fn properties(&self) -> PropertySet {
        let mut set = PropertySet::new();
        set.register(self.properties.state.clone());
        for property in &self.properties.enables {
            set.register(property.clone());
        }
        for property in &self.properties.powers {
            set.register(property.clone());
        }
        set
    }

    /// Run `f` with the enable-family lock held.
    ///
    /// The hub handle outlives the guard, so a final hub drop (which joins the monitor)
    /// never happens while a monitor push may be waiting on the lock.
    fn with_enable_ops<R>(&self, f: impl FnOnce() -> R) -> R {
        let _hub = self.hub.upgrade();
        let _guard = self.enable_ops.lock();
        f()
    }

    fn mask_binding(&self) -> MaskBinding<'_> {
        MaskBinding {
            property: &self.properties.state,
            cells: &self.cells,
        }
    }

    fn enable_binding(&self, led: usize) -> EnableBinding<'_> {
        EnableBinding {
            led,
            property: &self.properties.enables[led],
            cells: &self.cells,
        }
    }

    fn power_binding(&self, led: usize) -> PowerBinding<'_> {
        PowerBinding {
            led,
            property: &self.properties.powers[led],
            cells: &self.cells,
        }
    }
}

/// Handle a push from the status monitor on the state slot.
fn apply_push(properties: &LedProperties, cells: &Mutex<LastKnown>, index: usize, value: i64) {
    match index {
        0 => {
            let Some(mask) = codec::mask_in_range(value) else {
                warn!(value, "Ignoring out-of-range mask push");
                return;
            };
            let enables = codec::decode(mask);
            cells.lock().enables = enables;
            properties.state.publish(i64::from(mask));
            properties.sync_channels(&enables);
        }
        led @ 1..=NUM_LEDS => {
            let enabled = value != 0;
            let enables = {
                let mut cells = cells.lock();
                cells.enables[led - 1] = enabled;
                cells.enables
            };
            properties.enables[led - 1].publish(i64::from(enabled));
            properties.sync_mask(&enables);
        }
        _ => debug!(index, "Ignoring push for unknown index"),
    }
}

fn check_led(led: usize) -> Result<()> {
    if led < NUM_LEDS {
        Ok(())
    } else {
        Err(ChrolisError::ParamNotValid {
            property: "LED index".into(),
            value: led as i64,
            min: 0,
            max: NUM_LEDS as i64 - 1,
        })
    }
}

struct MaskBinding<'a> {
    property: &'a Observable<i64>,
    cells: &'a Mutex<LastKnown>,
}

impl SyncBinding for MaskBinding<'_> {
    type Value = i64;

    fn property(&self) -> &Observable<i64> {
        self.property
    }

    fn last_known(&self) -> i64 {
        i64::from(codec::encode(&self.cells.lock().enables))
    }

    fn remember(&self, value: i64) {
        if let Some(mask) = codec::mask_in_range(value) {
            self.cells.lock().enables = codec::decode(mask);
        }
    }

    fn read(&self, facade: &dyn ChrolisFacade) -> Result<i64> {
        let states = facade.read_all_channel_enables()?;
        Ok(i64::from(codec::encode(&states)))
    }

    fn write(&self, facade: &dyn ChrolisFacade, value: i64) -> Result<()> {
        let mask = codec::mask_in_range(value).ok_or_else(|| self.out_of_range(value))?;
        facade.write_all_channel_enables(codec::decode(mask))
    }

    fn validate(&self, value: i64) -> Result<()> {
        codec::mask_in_range(value)
            .map(|_| ())
            .ok_or_else(|| self.out_of_range(value))
    }
}

impl MaskBinding<'_> {
    fn out_of_range(&self, value: i64) -> ChrolisError {
        ChrolisError::ParamNotValid {
            property: PROP_STATE.into(),
            value,
            min: 0,
            max: i64::from(MAX_MASK),
        }
    }
}

struct EnableBinding<'a> {
    led: usize,
    property: &'a Observable<i64>,
    cells: &'a Mutex<LastKnown>,
}

impl SyncBinding for EnableBinding<'_> {
    type Value = i64;

    fn property(&self) -> &Observable<i64> {
        self.property
    }

    fn last_known(&self) -> i64 {
        i64::from(self.cells.lock().enables[self.led])
    }

    fn remember(&self, value: i64) {
        self.cells.lock().enables[self.led] = value != 0;
    }

    fn read(&self, facade: &dyn ChrolisFacade) -> Result<i64> {
        facade.read_channel_enable(self.led).map(i64::from)
    }

    fn write(&self, facade: &dyn ChrolisFacade, value: i64) -> Result<()> {
        facade.write_channel_enable(self.led, value != 0)
    }
}

struct PowerBinding<'a> {
    led: usize,
    property: &'a Observable<i64>,
    cells: &'a Mutex<LastKnown>,
}

impl SyncBinding for PowerBinding<'_> {
    type Value = i64;

    fn property(&self) -> &Observable<i64> {
        self.property
    }

    fn last_known(&self) -> i64 {
        i64::from(self.cells.lock().brightness[self.led])
    }

    fn remember(&self, value: i64) {
        if let Ok(brightness) = u16::try_from(value) {
            self.cells.lock().brightness[self.led] = brightness;
        }
    }

    fn read(&self, facade: &dyn ChrolisFacade) -> Result<i64> {
        facade.read_channel_brightness(self.led).map(i64::from)
    }

    fn write(&self, facade: &dyn ChrolisFacade, value: i64) -> Result<()> {
        let brightness = u16::try_from(value).map_err(|_| self.out_of_range(value))?;
        facade.write_channel_brightness(self.led, brightness)
    }

    fn validate(&self, value: i64) -> Result<()> {
        sync::check_bounds(self.property, value)?;
        u16::try_from(value)
            .map(|_| ())
            .map_err(|_| self.out_of_range(value))
    }
}

impl PowerBinding<'_> {
    fn out_of_range(&self, value: i64) -> ChrolisError {
        ChrolisError::ParamNotValid {
            property: self.property.name(),
            value,
            min: 0,
            max: i64::from(u16::MAX),
        }
    }
}
