//! Core types for the Thorlabs CHROLIS hub driver.
//!
//! - [`error`] - `ChrolisError` taxonomy shared by every crate in the workspace
//! - [`observable`] - host-facing properties with change notifications
//! - [`config`] - layered hub configuration (defaults, TOML, environment)

pub mod config;
pub mod error;
pub mod observable;

pub use config::HubConfig;
pub use error::{ChrolisError, InstrumentErrorKind, Result};
pub use observable::{Observable, ObservableMetadata, PropertyBase, PropertySet};
