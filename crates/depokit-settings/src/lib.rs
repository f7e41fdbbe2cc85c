//! DepoKit Settings Crate
//!
//! The configuration file model read once at startup, with TOML/JSON
//! persistence, validation and the mapping onto runtime options.

pub mod config;
pub mod error;

pub use config::{BusSettings, Config, MotionSettings, RecipeSettings, TelemetrySettings};
pub use error::{SettingsError, SettingsResult};
