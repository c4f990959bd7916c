//! Observable Properties
//!
//! Host-facing property system built on `tokio::sync::watch`. Every hardware-backed
//! value a device exposes (LED states, brightness, shutter, status text) is an
//! [`Observable`], and every republish emits an out-of-band change notification
//! to all subscribers.
//!
//! # Set vs Publish
//!
//! - [`Observable::set`] is the host entry point: it rejects read-only properties
//!   and values failing the validator.
//! - [`Observable::publish`] is the driver entry point: it always replaces the
//!   value and always notifies, even when the new value equals the old one. The
//!   synchronization protocol relies on this to revert a rejected input.
//! - [`Observable::refresh`] replaces the value and notifies only when it changed.
//!   Used when a hardware read merely confirms the displayed value.
//!
//! # Example
//!
//! ```rust,ignore
//! let power = Observable::new("LED 1 Power", 0i64)
//!     .with_range_introspectable(0, 1000);
//!
//! let mut rx = power.subscribe();
//! power.publish(250);
//! assert!(rx.has_changed()?);
//! ```

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Validator callback type.
pub type Validator<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Shared state for Observable that propagates to all clones.
///
/// Uses `parking_lot::RwLock` because metadata access is synchronous and short.
struct ObservableSharedState<T> {
    metadata: ObservableMetadata,
    validator: Option<Validator<T>>,
}

// =============================================================================
// PropertyBase Trait - Generic Property Access
// =============================================================================

/// Type-erased access to a property, used by [`PropertySet`].
pub trait PropertyBase: Send + Sync {
    /// Get the property name
    fn name(&self) -> String;

    /// Get the current value as JSON
    fn get_json(&self) -> Result<serde_json::Value>;

    /// Get the property metadata (returns a clone).
    fn metadata(&self) -> ObservableMetadata;
}

/// Combines PropertyBase with Any for downcasting when the concrete type is needed.
pub trait PropertyAny: PropertyBase {
    /// Get a reference to this property as `&dyn Any` for downcasting
    fn as_any(&self) -> &dyn Any;
}

// =============================================================================
// Observable<T>
// =============================================================================

/// A thread-safe, observable value with change notifications.
///
/// Clones share the same watch channel and metadata.
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: watch::Sender<T>,
    shared: Arc<RwLock<ObservableSharedState<T>>>,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.read();
        f.debug_struct("Observable")
            .field("metadata", &shared.metadata)
            .field("has_validator", &shared.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// Metadata for an observable property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservableMetadata {
    /// Property name (unique within a device).
    pub name: String,

    /// Human-readable description.
    pub description: Option<String>,

    /// Physical units (e.g., "nm", "‰").
    pub units: Option<String>,

    /// Whether this property rejects host writes.
    pub read_only: bool,

    /// Data type hint: `"int"`, `"bool"`, `"string"`, or empty when unknown.
    #[serde(default)]
    pub dtype: String,

    /// Inclusive lower bound for integer properties.
    #[serde(default)]
    pub min_value: Option<i64>,

    /// Inclusive upper bound for integer properties.
    #[serde(default)]
    pub max_value: Option<i64>,

    /// Allowed values for string properties (empty means unrestricted).
    #[serde(default)]
    pub allowed_values: Vec<String>,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new observable with an initial value.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            shared: Arc::new(RwLock::new(ObservableSharedState {
                metadata: ObservableMetadata {
                    name: name.into(),
                    description: None,
                    units: None,
                    read_only: false,
                    dtype: String::new(),
                    min_value: None,
                    max_value: None,
                    allowed_values: Vec::new(),
                },
                validator: None,
            })),
        }
    }

    /// Add a description to this observable.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.shared.write().metadata.description = Some(description.into());
        self
    }

    /// Add units to this observable.
    pub fn with_units(self, units: impl Into<String>) -> Self {
        self.shared.write().metadata.units = Some(units.into());
        self
    }

    /// Set the dtype hint.
    pub fn with_dtype(self, dtype: impl Into<String>) -> Self {
        self.shared.write().metadata.dtype = dtype.into();
        self
    }

    /// Mark this observable as read-only.
    pub fn read_only(self) -> Self {
        self.shared.write().metadata.read_only = true;
        self
    }

    /// Get the current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Get the property name.
    pub fn name(&self) -> String {
        self.shared.read().metadata.name.clone()
    }

    /// Get the metadata (returns a clone).
    pub fn metadata(&self) -> ObservableMetadata {
        self.shared.read().metadata.clone()
    }

    /// Validate a value without setting it.
    ///
    /// Returns error if the property is read-only or the validator rejects it.
    pub fn validate(&self, value: &T) -> Result<()> {
        let guard = self.shared.read();
        if guard.metadata.read_only {
            return Err(anyhow!("Property '{}' is read-only", guard.metadata.name));
        }

        if let Some(validator) = &guard.validator {
            validator(value)?;
        }

        Ok(())
    }

    /// Set a new value from the host, notifying all subscribers.
    pub fn set(&self, value: T) -> Result<()> {
        self.validate(&value)?;
        self.sender.send_replace(value);
        Ok(())
    }

    /// Replace the value and notify subscribers unconditionally.
    ///
    /// Skips validation and the read-only check. Subscribers are notified even when
    /// the value does not change.
    pub fn publish(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Replace the value, notifying subscribers only if it differs from the current one.
    ///
    /// Returns `true` when a notification was sent.
    pub fn refresh(&self, value: T) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }
}

impl Observable<i64> {
    /// Add inclusive range validation and record the bounds in metadata.
    ///
    /// # Panics
    ///
    /// Panics at construction time if `min > max`.
    pub fn with_range_introspectable(self, min: i64, max: i64) -> Self {
        assert!(min <= max, "min must be <= max: min={}, max={}", min, max);

        {
            let mut guard = self.shared.write();
            guard.metadata.min_value = Some(min);
            guard.metadata.max_value = Some(max);
            guard.metadata.dtype = "int".to_string();
            guard.validator = Some(Arc::new(move |value: &i64| {
                if *value < min || *value > max {
                    Err(anyhow!(
                        "Value {:?} out of range [{:?}, {:?}]",
                        value,
                        min,
                        max
                    ))
                } else {
                    Ok(())
                }
            }));
        }
        self
    }

    /// Declared bounds, if any.
    pub fn bounds(&self) -> Option<(i64, i64)> {
        let guard = self.shared.read();
        guard.metadata.min_value.zip(guard.metadata.max_value)
    }
}

impl Observable<String> {
    /// Restrict a string property to a list of allowed values.
    pub fn with_allowed_values(self, values: Vec<String>) -> Self {
        {
            let mut guard = self.shared.write();
            guard.metadata.dtype = "string".to_string();
            guard.metadata.allowed_values = values.clone();
            if !values.is_empty() {
                guard.validator = Some(Arc::new(move |value: &String| {
                    if values.contains(value) {
                        Ok(())
                    } else {
                        Err(anyhow!("'{}' is not one of {:?}", value, values))
                    }
                }));
            }
        }
        self
    }
}

impl<T> PropertyBase for Observable<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    fn name(&self) -> String {
        Observable::name(self)
    }

    fn get_json(&self) -> Result<serde_json::Value> {
        let value = self.get();
        serde_json::to_value(&value)
            .map_err(|e| anyhow!("Failed to serialize property '{}': {}", self.name(), e))
    }

    fn metadata(&self) -> ObservableMetadata {
        Observable::metadata(self)
    }
}

impl<T> PropertyAny for Observable<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// PropertySet - Collection of Observables
// =============================================================================

/// Name-indexed collection of a device's properties.
///
/// Ordered by name so enumeration is stable across runs.
#[derive(Default)]
pub struct PropertySet {
    properties: BTreeMap<String, Box<dyn PropertyAny>>,
}

impl std::fmt::Debug for PropertySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertySet")
            .field("names", &self.names())
            .finish()
    }
}

impl PropertySet {
    /// Create a new empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a property. A property with the same name is replaced.
    pub fn register<P>(&mut self, property: P)
    where
        P: PropertyAny + 'static,
    {
        let name = property.name();
        self.properties.insert(name, Box::new(property));
    }

    /// Get a property by name with its concrete type.
    pub fn get_typed<P>(&self, name: &str) -> Option<&P>
    where
        P: PropertyAny + 'static,
    {
        self.properties
            .get(name)
            .and_then(|p| p.as_any().downcast_ref::<P>())
    }

    /// Get a property by name as a trait object.
    pub fn get(&self, name: &str) -> Option<&dyn PropertyBase> {
        self.properties
            .get(name)
            .map(|p| p.as_ref() as &dyn PropertyBase)
    }

    /// Iterate over all properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn PropertyBase)> {
        self.properties
            .iter()
            .map(|(name, prop)| (name.as_str(), prop.as_ref() as &dyn PropertyBase))
    }

    /// List all property names.
    pub fn names(&self) -> Vec<&str> {
        self.properties.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observable_basic() {
        let obs = Observable::new("test", 42i64);
        assert_eq!(obs.get(), 42);
        assert_eq!(obs.name(), "test");

        obs.set(100).unwrap();
        assert_eq!(obs.get(), 100);
    }

    #[test]
    fn test_observable_range_validation() {
        let obs = Observable::new("LED 1 Power", 0i64).with_range_introspectable(0, 1000);

        assert!(obs.set(500).is_ok());
        assert!(obs.set(-1).is_err());
        assert!(obs.set(1001).is_err());
        assert_eq!(obs.get(), 500);
        assert_eq!(obs.bounds(), Some((0, 1000)));
        assert_eq!(obs.metadata().dtype, "int");
    }

    #[test]
    fn test_observable_read_only() {
        let obs = Observable::new("Manufacturer Name", "Thorlabs".to_string()).read_only();

        assert!(obs.set("Other".to_string()).is_err());
        assert_eq!(obs.get(), "Thorlabs");

        // Driver-side publish is still allowed
        obs.publish("Thorlabs Inc.".to_string());
        assert_eq!(obs.get(), "Thorlabs Inc.");
    }

    #[test]
    fn test_allowed_values() {
        let obs = Observable::new("Serial Number", "DEFAULT".to_string())
            .with_allowed_values(vec!["DEFAULT".into(), "M00123".into()]);

        assert!(obs.set("M00123".to_string()).is_ok());
        assert!(obs.set("M99999".to_string()).is_err());
        assert_eq!(obs.metadata().allowed_values.len(), 2);
    }

    #[test]
    fn test_publish_notifies_on_same_value() {
        let obs = Observable::new("State", 5i64);
        let mut rx = obs.subscribe();
        assert!(!rx.has_changed().unwrap());

        obs.publish(5);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 5);
    }

    #[test]
    fn test_refresh_only_notifies_on_change() {
        let obs = Observable::new("LED Enable State 1", 0i64);
        let mut rx = obs.subscribe();

        assert!(!obs.refresh(0));
        assert!(!rx.has_changed().unwrap());

        assert!(obs.refresh(1));
        assert!(rx.has_changed().unwrap());
        assert_eq!(obs.get(), 1);
    }

    #[tokio::test]
    async fn test_observable_subscription() {
        let obs = Observable::new("value", 0i64);
        let mut rx = obs.subscribe();

        assert_eq!(*rx.borrow(), 0);

        obs.set(42).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 42);
    }

    #[test]
    fn test_property_set_lookup() {
        let mut set = PropertySet::new();
        set.register(Observable::new("State", 3i64));
        set.register(Observable::new("Device Status", "No Error".to_string()));

        assert_eq!(set.len(), 2);
        assert_eq!(set.names(), vec!["Device Status", "State"]);

        let state = set.get_typed::<Observable<i64>>("State").unwrap();
        assert_eq!(state.get(), 3);
        assert!(set.get_typed::<Observable<bool>>("State").is_none());

        let json = set.get("Device Status").unwrap().get_json().unwrap();
        assert_eq!(json, serde_json::json!("No Error"));
    }

    #[test]
    fn test_property_set_shares_channel_with_clone() {
        let state = Observable::new("State", 0i64);
        let mut set = PropertySet::new();
        set.register(state.clone());

        state.publish(7);
        let json = set.get("State").unwrap().get_json().unwrap();
        assert_eq!(json, serde_json::json!(7));
    }
}
