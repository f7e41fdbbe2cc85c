//! Configuration file model
//!
//! Everything the runtime reads at startup, grouped into sections:
//! - `bus`: controller host, port, slave ids and timeouts
//! - `workspace`: per-axis travel limits
//! - `motion`: polling, move deadlines, tolerances, speed limits, reconnect
//! - `recipe`: builder and importer defaults
//! - `telemetry`: event history and bus traffic logging
//!
//! Files are TOML or JSON, picked by extension. Missing keys and sections
//! fall back to their defaults.

use crate::error::{SettingsError, SettingsResult};
use depokit_communication::{AxisControllerConfig, BusEndpoint, ReconnectPolicy, MAX_MULTIPLIER};
use depokit_core::{Axis, LengthUnit, Point, SpeedLimits, ValidationError, WorkspaceBounds};
use depokit_recipe::{BuildOptions, DxfImportOptions, OriginMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "depokit";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(SettingsError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

/// Field-bus connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Controller gateway host
    pub host: String,
    /// Modbus TCP port
    pub port: u16,
    /// Slave id of the X controller
    pub x_slave: u8,
    /// Slave id of the Y controller
    pub y_slave: u8,
    /// Slave id of the Z controller
    pub z_slave: u8,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-transaction timeout in milliseconds
    pub io_timeout_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            host: "169.254.151.255".to_string(),
            port: 502,
            x_slave: 1,
            y_slave: 2,
            z_slave: 3,
            connect_timeout_ms: 10_000,
            io_timeout_ms: 1_000,
        }
    }
}

impl BusSettings {
    /// Slave id configured for an axis
    pub fn slave_id(&self, axis: Axis) -> u8 {
        match axis {
            Axis::X => self.x_slave,
            Axis::Y => self.y_slave,
            Axis::Z => self.z_slave,
        }
    }

    /// Bus address of an axis controller
    pub fn endpoint(&self, axis: Axis) -> BusEndpoint {
        BusEndpoint::new(self.host.clone(), self.port, self.slave_id(axis))
    }

    /// TCP connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-transaction timeout
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Motion and axis client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Background status poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Status poll interval while a move is in flight, in milliseconds
    pub completion_poll_ms: u64,
    /// Fixed part of every move deadline, in milliseconds
    pub timeout_margin_ms: u64,
    /// Multiplier on nominal travel time in the move deadline
    pub timeout_factor: f64,
    /// Homing deadline in milliseconds
    pub home_timeout_ms: u64,
    /// Grace period for the running flag after a start, in milliseconds
    pub running_bit_timeout_ms: u64,
    /// Distance from target accepted as arrived, in mm
    pub in_position_tolerance: f64,
    /// Axis deltas below this are not dispatched, in mm
    pub skip_epsilon: f64,
    /// Z axis speed for height changes, in mm/s
    pub z_speed: f64,
    /// Drift from the expected position that triggers a re-sync on resume, in mm
    pub resync_tolerance: f64,
    /// Controller speed envelope
    pub speed_limits: SpeedLimits,
    /// Reconnect backoff
    pub reconnect: ReconnectPolicy,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            completion_poll_ms: 50,
            timeout_margin_ms: 5_000,
            timeout_factor: 1.5,
            home_timeout_ms: 120_000,
            running_bit_timeout_ms: 2_000,
            in_position_tolerance: 2e-3,
            skip_epsilon: 4e-4,
            z_speed: 0.5,
            resync_tolerance: 5e-3,
            speed_limits: SpeedLimits::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Recipe builder and DXF import defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeSettings {
    /// Print move speed in mm/s
    pub print_speed: f64,
    /// Travel move speed in mm/s
    pub travel_speed: f64,
    /// Nozzle diameter in mm
    pub nozzle_diameter: f64,
    /// Offset closed paths inward by half the nozzle diameter
    pub compensate: bool,
    /// Consecutive vertices closer than this are merged, in mm
    pub dedupe_epsilon: f64,
    /// Cross-product tolerance for colinear collapse
    pub colinear_tolerance: f64,
    /// Gap, as a multiple of the median step, reported as a jump
    pub jump_multiple: f64,
    /// Emit hop-and-dwell units instead of print moves
    pub stop_and_go: bool,
    /// Hop spacing in stop-and-go mode, in mm
    pub hop_spacing: f64,
    /// Dwell time scale factor
    pub dwell_scale: f64,
    /// Origin normalisation on import
    pub origin: OriginMode,
    /// X offset added to every vertex, in mm
    pub offset_x: f64,
    /// Y offset added to every vertex, in mm
    pub offset_y: f64,
    /// Chord length for compensated arcs, in mm
    pub arc_resolution: f64,
    /// Chord length for imported arcs and circles, in mm
    pub import_arc_resolution: f64,
    /// Split LINE entities at the import resolution
    pub interpolate_lines: bool,
    /// Drawing unit to assume instead of the file header
    pub unit_override: Option<LengthUnit>,
    /// Fixed Z height attached to every point, in mm
    pub z_height: Option<f64>,
}

impl Default for RecipeSettings {
    fn default() -> Self {
        let build = BuildOptions::default();
        let import = DxfImportOptions::default();
        Self {
            print_speed: build.print_speed,
            travel_speed: build.travel_speed,
            nozzle_diameter: build.nozzle_diameter,
            compensate: build.compensate,
            dedupe_epsilon: build.dedupe_epsilon,
            colinear_tolerance: build.colinear_tolerance,
            jump_multiple: build.jump_multiple,
            stop_and_go: build.stop_and_go,
            hop_spacing: build.hop_spacing,
            dwell_scale: build.dwell_scale,
            origin: import.origin,
            offset_x: build.origin_offset.x,
            offset_y: build.origin_offset.y,
            arc_resolution: build.arc_resolution,
            import_arc_resolution: import.arc_resolution,
            interpolate_lines: import.interpolate_lines,
            unit_override: import.unit_override,
            z_height: build.z_height,
        }
    }
}

/// Telemetry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Events kept in the bus history; 0 disables history
    pub history_size: usize,
    /// Seconds an event stays in the history
    pub history_retention_secs: u64,
    /// Publish and log every bus transaction
    pub log_bus_traffic: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            history_size: 1000,
            history_retention_secs: 300,
            log_bus_traffic: false,
        }
    }
}

/// Complete DepoKit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Field-bus settings
    pub bus: BusSettings,
    /// Travel limits
    pub workspace: WorkspaceBounds,
    /// Motion settings
    pub motion: MotionSettings,
    /// Recipe defaults
    pub recipe: RecipeSettings,
    /// Telemetry settings
    pub telemetry: TelemetrySettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location under the user's config directory
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no user config directory on this platform".into())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path`, or the default location when `None`
    ///
    /// A missing default file yields the default config; a missing
    /// explicit path is an error.
    pub fn load_or_default(path: Option<&Path>) -> SettingsResult<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let path = Self::default_path()?;
                if path.exists() {
                    Self::load_from_file(&path)
                } else {
                    tracing::debug!(
                        "No configuration at {}, using defaults",
                        path.display()
                    );
                    Ok(Self::default())
                }
            }
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;
        let format = Format::of(path)?;

        let content = match format {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        let io_error = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, content).map_err(io_error)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        self.validate_bus()?;
        self.validate_workspace()?;
        self.validate_motion()?;
        self.build_options().validate().map_err(recipe_error)?;
        self.validate_import()
    }

    fn validate_bus(&self) -> SettingsResult<()> {
        let bus = &self.bus;
        if bus.host.trim().is_empty() {
            return Err(SettingsError::invalid("bus.host", "must not be empty"));
        }
        if bus.port == 0 {
            return Err(SettingsError::invalid("bus.port", "must be > 0"));
        }
        for axis in Axis::ALL {
            if bus.slave_id(axis) == 0 {
                return Err(SettingsError::invalid(
                    &format!("bus.{}_slave", axis.as_str()),
                    "must be > 0",
                ));
            }
        }
        if bus.x_slave == bus.y_slave || bus.x_slave == bus.z_slave || bus.y_slave == bus.z_slave {
            return Err(SettingsError::invalid(
                "bus",
                "slave ids must be distinct per axis",
            ));
        }
        if bus.connect_timeout_ms == 0 {
            return Err(SettingsError::invalid("bus.connect_timeout_ms", "must be > 0"));
        }
        if bus.io_timeout_ms == 0 {
            return Err(SettingsError::invalid("bus.io_timeout_ms", "must be > 0"));
        }
        Ok(())
    }

    fn validate_workspace(&self) -> SettingsResult<()> {
        for axis in Axis::ALL {
            let limits = self.workspace.limits(axis);
            if !(limits.min.is_finite() && limits.max.is_finite()) {
                return Err(SettingsError::invalid(
                    &format!("workspace.{}", axis.as_str()),
                    "limits must be finite",
                ));
            }
            if limits.min >= limits.max {
                return Err(SettingsError::invalid(
                    &format!("workspace.{}", axis.as_str()),
                    format!("min {} must be below max {}", limits.min, limits.max),
                ));
            }
        }
        Ok(())
    }

    fn validate_motion(&self) -> SettingsResult<()> {
        let motion = &self.motion;
        for (key, value) in [
            ("motion.poll_interval_ms", motion.poll_interval_ms),
            ("motion.completion_poll_ms", motion.completion_poll_ms),
            ("motion.home_timeout_ms", motion.home_timeout_ms),
            ("motion.running_bit_timeout_ms", motion.running_bit_timeout_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::invalid(key, "must be > 0"));
            }
        }

        let positive = |value: f64| value.is_finite() && value > 0.0;
        if !(motion.timeout_factor.is_finite() && motion.timeout_factor >= 1.0) {
            return Err(SettingsError::invalid("motion.timeout_factor", "must be >= 1"));
        }
        for (key, value) in [
            ("motion.in_position_tolerance", motion.in_position_tolerance),
            ("motion.z_speed", motion.z_speed),
            ("motion.resync_tolerance", motion.resync_tolerance),
        ] {
            if !positive(value) {
                return Err(SettingsError::invalid(key, "must be positive"));
            }
        }
        if !(motion.skip_epsilon.is_finite() && motion.skip_epsilon >= 0.0) {
            return Err(SettingsError::invalid(
                "motion.skip_epsilon",
                "must be a non-negative number",
            ));
        }

        let limits = &motion.speed_limits;
        if !(positive(limits.min_axis_speed) && limits.max_axis_speed.is_finite()) {
            return Err(SettingsError::invalid(
                "motion.speed_limits.min_axis_speed",
                "must be positive",
            ));
        }
        if limits.min_axis_speed > limits.max_axis_speed {
            return Err(SettingsError::invalid(
                "motion.speed_limits.max_axis_speed",
                "must not be below min_axis_speed",
            ));
        }
        if !(limits.zero_threshold >= 0.0 && limits.zero_threshold < limits.min_axis_speed) {
            return Err(SettingsError::invalid(
                "motion.speed_limits.zero_threshold",
                "must lie in [0, min_axis_speed)",
            ));
        }
        if !(limits.min_axis_speed..=limits.max_axis_speed).contains(&motion.z_speed) {
            return Err(SettingsError::invalid(
                "motion.z_speed",
                "must lie within the axis speed limits",
            ));
        }

        let reconnect = &motion.reconnect;
        if reconnect.initial_delay.is_zero() {
            return Err(SettingsError::invalid(
                "motion.reconnect.initial_delay",
                "must be > 0",
            ));
        }
        if reconnect.initial_delay > reconnect.max_delay {
            return Err(SettingsError::invalid(
                "motion.reconnect.max_delay",
                "must not be below initial_delay",
            ));
        }
        if !(1.0..=MAX_MULTIPLIER).contains(&reconnect.multiplier) {
            return Err(SettingsError::invalid(
                "motion.reconnect.multiplier",
                "must lie in [1, 10]",
            ));
        }
        Ok(())
    }

    fn validate_import(&self) -> SettingsResult<()> {
        let resolution = self.recipe.import_arc_resolution;
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(SettingsError::invalid(
                "recipe.import_arc_resolution",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Axis client settings shared by all three controllers
    pub fn axis_config(&self) -> AxisControllerConfig {
        let motion = &self.motion;
        AxisControllerConfig {
            poll_interval: Duration::from_millis(motion.poll_interval_ms),
            completion_poll: Duration::from_millis(motion.completion_poll_ms),
            timeout_margin: Duration::from_millis(motion.timeout_margin_ms),
            timeout_factor: motion.timeout_factor,
            home_timeout: Duration::from_millis(motion.home_timeout_ms),
            in_position_tolerance: motion.in_position_tolerance,
            running_bit_timeout: Duration::from_millis(motion.running_bit_timeout_ms),
            speed_limits: motion.speed_limits,
            reconnect: motion.reconnect.clone(),
            log_bus_traffic: self.telemetry.log_bus_traffic,
            ..AxisControllerConfig::default()
        }
    }

    /// Recipe builder options
    pub fn build_options(&self) -> BuildOptions {
        let recipe = &self.recipe;
        BuildOptions {
            origin_offset: Point::new(recipe.offset_x, recipe.offset_y),
            print_speed: recipe.print_speed,
            travel_speed: recipe.travel_speed,
            nozzle_diameter: recipe.nozzle_diameter,
            compensate: recipe.compensate,
            dedupe_epsilon: recipe.dedupe_epsilon,
            colinear_tolerance: recipe.colinear_tolerance,
            jump_multiple: recipe.jump_multiple,
            stop_and_go: recipe.stop_and_go,
            hop_spacing: recipe.hop_spacing,
            dwell_scale: recipe.dwell_scale,
            arc_resolution: recipe.arc_resolution,
            z_height: recipe.z_height,
            workspace: self.workspace,
            speed_limits: self.motion.speed_limits,
            source: None,
        }
    }

    /// DXF import options
    pub fn import_options(&self) -> DxfImportOptions {
        DxfImportOptions {
            unit_override: self.recipe.unit_override,
            origin: self.recipe.origin,
            arc_resolution: self.recipe.import_arc_resolution,
            interpolate_lines: self.recipe.interpolate_lines,
            ..DxfImportOptions::default()
        }
    }
}

fn recipe_error(err: ValidationError) -> SettingsError {
    match err {
        ValidationError::InvalidSpeed { ref name, .. } => {
            SettingsError::invalid(&format!("recipe.{}", name), err.to_string())
        }
        ValidationError::InvalidParameter { name, reason } => {
            SettingsError::invalid(&format!("recipe.{}", name), reason)
        }
        other => SettingsError::invalid("recipe", other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bus.port, 502);
        assert_eq!(config.bus.endpoint(Axis::Z).slave_id, 3);
    }

    #[test]
    fn test_defaults_match_runtime_defaults() {
        let config = Config::default();
        assert_eq!(config.build_options(), BuildOptions::default());
        assert_eq!(config.import_options(), DxfImportOptions::default());

        let axis = config.axis_config();
        let expected = AxisControllerConfig::default();
        assert_eq!(axis.poll_interval, expected.poll_interval);
        assert_eq!(axis.timeout_margin, expected.timeout_margin);
        assert_eq!(axis.running_bit_timeout, expected.running_bit_timeout);
        assert_eq!(axis.reconnect, expected.reconnect);
    }

    #[test]
    fn test_recipe_errors_carry_dotted_key() {
        let mut config = Config::default();
        config.recipe.travel_speed = 5.0;
        match config.validate() {
            Err(SettingsError::InvalidSetting { key, .. }) => {
                assert_eq!(key, "recipe.travel_speed")
            }
            other => panic!("expected invalid setting, got {:?}", other),
        }
    }

    #[test]
    fn test_runaway_reconnect_multiplier_rejected() {
        let mut config = Config::default();
        config.motion.reconnect.multiplier = 1e300;
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { key, .. }) if key == "motion.reconnect.multiplier"
        ));
        config.motion.reconnect.multiplier = MAX_MULTIPLIER;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hop_spacing_below_minimum_rejected() {
        let mut config = Config::default();
        config.recipe.stop_and_go = true;
        config.recipe.hop_spacing = 1e-9;
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { key, .. }) if key == "recipe.hop_spacing"
        ));
    }

    #[test]
    fn test_duplicate_slave_ids_rejected() {
        let mut config = Config::default();
        config.bus.z_slave = 1;
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { key, .. }) if key == "bus"
        ));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::of(Path::new("a.toml")).ok(), Some(Format::Toml));
        assert_eq!(Format::of(Path::new("a.json")).ok(), Some(Format::Json));
        assert!(matches!(
            Format::of(Path::new("a.yaml")),
            Err(SettingsError::UnsupportedFormat(ext)) if ext == "yaml"
        ));
    }
}
