//! # DepoKit Machine
//!
//! The motion core above the axis clients:
//! - `manipulator`: three axis clients as one XYZ move surface
//! - `executor`: the recipe state machine and run loop
//! - `telemetry`: logging subscriber and status summary

pub mod executor;
pub mod manipulator;
pub mod telemetry;

pub use executor::{ExecutorConfig, PatternExecutor};
pub use manipulator::{AxisEndpoints, Manipulator, ManipulatorConfig};
pub use telemetry::{TelemetrySink, TelemetrySummary};
