//! # DepoKit
//!
//! Pattern execution for a three-axis deposition manipulator driven by
//! Modbus stepper controllers: DXF drawings become recipes of motion
//! commands that are run with pause, resume and abort.
//!
//! ## Architecture
//!
//! DepoKit is organized as a workspace with multiple crates:
//!
//! 1. **depokit-core** - Data model, errors, length units, telemetry bus
//! 2. **depokit-recipe** - DXF import and the recipe builder
//! 3. **depokit-communication** - Modbus TCP, register map, axis clients
//! 4. **depokit-machine** - Coordinator, pattern executor, telemetry sink
//! 5. **depokit-settings** - Configuration file model
//! 6. **depokit** - Runtime wiring and the command-line binary

pub mod runtime;

pub use depokit_core::{
    Axis, Command, Error, ExecutionStatus, MachineError, Point, Recipe, Result, TelemetryEvent,
};
pub use depokit_settings::Config;
pub use runtime::{Runtime, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Logging output options
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Raise the default level to debug
    pub verbose: bool,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl LogOptions {
    /// Filter directive used when `RUST_LOG` is unset
    pub fn default_directive(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

/// Initialize logging
///
/// Sets up structured logging on stderr with:
/// - RUST_LOG environment variable support, `info` (or `debug`) otherwise
/// - target, level, thread and line number on every record
/// - optional JSON output
pub fn init_logging(options: LogOptions) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_directive()));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true);

    if options.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_raises_default_level() {
        assert_eq!(LogOptions::default().default_directive(), "info");
        let verbose = LogOptions {
            verbose: true,
            json: false,
        };
        assert_eq!(verbose.default_directive(), "debug");
    }
}
