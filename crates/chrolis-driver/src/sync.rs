//! Property synchronization protocol.
//!
//! Every hardware-backed property (aggregate mask, per-LED enable, per-LED power,
//! shutter) is read and written through [`before_get`] and [`after_set`]. A
//! [`SyncBinding`] ties one property to its hardware accessors and to the last-known
//! cell owned by the device exposing it.
//!
//! # Read path
//!
//! Reads favour availability: a failed hardware read is logged and the last-known value
//! is presented instead. Only an unresolvable hub fails the read.
//!
//! # Write path
//!
//! Writes favour correctness. Every rejection republishes a confirmed value so the host
//! never displays an input that did not reach the hardware, with one exception: a write
//! that fails with [`ChrolisError::DeviceUnavailable`] leaves the property as the host
//! set it.

use crate::facade::ChrolisFacade;
use crate::hub::ChrolisHub;
use chrolis_core::{ChrolisError, Observable, Result};
use std::fmt::Debug;
use std::sync::Weak;
use tracing::{debug, warn};

/// Binding between one property and the hardware value behind it.
pub trait SyncBinding {
    type Value: Clone + Copy + PartialEq + Debug + Send + Sync + 'static;

    fn property(&self) -> &Observable<Self::Value>;

    /// Most recently confirmed hardware value.
    fn last_known(&self) -> Self::Value;

    /// Record a confirmed hardware value.
    fn remember(&self, value: Self::Value);

    fn read(&self, facade: &dyn ChrolisFacade) -> Result<Self::Value>;

    fn write(&self, facade: &dyn ChrolisFacade, value: Self::Value) -> Result<()>;

    /// Domain check applied before any hardware write.
    fn validate(&self, _value: Self::Value) -> Result<()> {
        Ok(())
    }
}

/// Refresh a property from hardware.
///
/// Fails only with [`ChrolisError::HubUnavailable`], leaving the property untouched.
pub fn before_get<B: SyncBinding>(hub: &Weak<ChrolisHub>, binding: &B) -> Result<B::Value> {
    let hub = hub.upgrade().ok_or(ChrolisError::HubUnavailable)?;
    let facade: &dyn ChrolisFacade = &**hub.facade();
    let property = binding.property();

    if !facade.is_connected() {
        warn!(property = %property.name(), "CHROLIS not available");
    }

    match binding.read(facade) {
        Ok(value) => binding.remember(value),
        Err(e) => warn!(
            property = %property.name(),
            error = %e,
            "Hardware read failed, keeping last-known value"
        ),
    }

    let value = binding.last_known();
    property.refresh(value);
    Ok(value)
}

/// Apply a host write to hardware.
///
/// The property may already hold `value` (the host's staged input). On return it holds
/// the confirmed hardware value, except after a `DeviceUnavailable` write failure.
pub fn after_set<B: SyncBinding>(
    hub: &Weak<ChrolisHub>,
    binding: &B,
    value: B::Value,
) -> Result<()> {
    let property = binding.property();

    let Some(hub) = hub.upgrade() else {
        warn!(property = %property.name(), "Hub not available");
        property.publish(binding.last_known());
        return Err(ChrolisError::HubUnavailable);
    };
    let facade: &dyn ChrolisFacade = &**hub.facade();

    if !facade.is_connected() {
        warn!(property = %property.name(), "CHROLIS not available");
        property.publish(binding.last_known());
        return Err(ChrolisError::DeviceUnavailable);
    }

    if let Err(e) = binding.validate(value) {
        warn!(property = %property.name(), value = ?value, "Requested value out of bounds");
        property.publish(binding.last_known());
        return Err(e);
    }

    match binding.write(facade, value) {
        Ok(()) => {
            binding.remember(value);
            property.publish(value);
            debug!(property = %property.name(), value = ?value, "Hardware write confirmed");
            Ok(())
        }
        Err(e) if e.is_device_unavailable() => {
            warn!(property = %property.name(), error = %e, "Hardware write failed");
            Err(e)
        }
        Err(e) => {
            warn!(property = %property.name(), error = %e, "Hardware write failed, re-reading");
            match binding.read(facade) {
                Ok(actual) => binding.remember(actual),
                Err(read_err) => warn!(
                    property = %property.name(),
                    error = %read_err,
                    "Re-read after failed write also failed"
                ),
            }
            property.publish(binding.last_known());
            Err(e)
        }
    }
}

/// Reject `value` unless it lies within the property's declared bounds.
pub fn check_bounds(property: &Observable<i64>, value: i64) -> Result<()> {
    match property.bounds() {
        Some((min, max)) if value < min || value > max => Err(ChrolisError::ParamNotValid {
            property: property.name(),
            value,
            min,
            max,
        }),
        _ => Ok(()),
    }
}
