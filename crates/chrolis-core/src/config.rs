//! Hub configuration.
//!
//! Sources are layered with figment, later sources overriding earlier ones:
//!
//! 1. Built-in defaults ([`HubConfig::default`])
//! 2. Optional TOML file
//! 3. Environment variables prefixed `CHROLIS_` (e.g. `CHROLIS_POLL_INTERVAL_MS=250`)
//!
//! # Example
//!
//! ```toml
//! serial_number = "M00612345"
//! poll_interval_ms = 500
//! brightness_min = 0
//! brightness_max = 1000
//! close_shutter_on_init = true
//! ```

use crate::error::{ChrolisError, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Serial number placeholder that selects the first enumerated instrument.
pub const DEFAULT_SERIAL: &str = "DEFAULT";

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "CHROLIS_";

/// Configuration for a CHROLIS hub and its peripherals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Instrument serial number. `None` or `"DEFAULT"` picks the first one found.
    #[serde(default)]
    pub serial_number: Option<String>,

    /// Delay between status polls in milliseconds (default: 500)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lower bound of the per-LED brightness properties (default: 0)
    #[serde(default)]
    pub brightness_min: u16,

    /// Upper bound of the per-LED brightness properties (default: 1000)
    #[serde(default = "default_brightness_max")]
    pub brightness_max: u16,

    /// Close the shutter when the shutter device initializes (default: true)
    #[serde(default = "default_close_shutter")]
    pub close_shutter_on_init: bool,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_brightness_max() -> u16 {
    1000
}

fn default_close_shutter() -> bool {
    true
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            serial_number: None,
            poll_interval_ms: default_poll_interval_ms(),
            brightness_min: 0,
            brightness_max: default_brightness_max(),
            close_shutter_on_init: default_close_shutter(),
        }
    }
}

impl HubConfig {
    /// Load configuration from defaults, an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(HubConfig::default()));
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading hub config file");
            figment = figment.merge(Toml::file(path));
        }
        let config: HubConfig = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: HubConfig = Figment::from(Serialized::defaults(HubConfig::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(ChrolisError::Configuration(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.brightness_min > self.brightness_max {
            return Err(ChrolisError::Configuration(format!(
                "brightness_min ({}) exceeds brightness_max ({})",
                self.brightness_min, self.brightness_max
            )));
        }
        Ok(())
    }

    /// Status monitor cadence.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The configured serial number, or `None` when auto-selection is requested.
    pub fn requested_serial(&self) -> Option<&str> {
        self.serial_number
            .as_deref()
            .filter(|serial| !serial.is_empty() && *serial != DEFAULT_SERIAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.brightness_max, 1000);
        assert!(config.close_shutter_on_init);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HubConfig::from_toml_str("poll_interval_ms = 50").unwrap();
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.brightness_max, 1000);
        assert_eq!(config.serial_number, None);
    }

    #[test]
    fn test_rejects_inverted_brightness_bounds() {
        let err = HubConfig::from_toml_str("brightness_min = 10\nbrightness_max = 5").unwrap_err();
        assert!(matches!(err, ChrolisError::Configuration(_)));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        assert!(HubConfig::from_toml_str("poll_interval_ms = 0").is_err());
    }

    #[test]
    fn test_rejects_wrong_type() {
        let err = HubConfig::from_toml_str("poll_interval_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, ChrolisError::Config(_)));
    }

    #[test]
    fn test_requested_serial() {
        let mut config = HubConfig::default();
        assert_eq!(config.requested_serial(), None);

        config.serial_number = Some(DEFAULT_SERIAL.into());
        assert_eq!(config.requested_serial(), None);

        config.serial_number = Some("M00612345".into());
        assert_eq!(config.requested_serial(), Some("M00612345"));
    }
}
