//! Data models for the manipulator
//!
//! This module provides:
//! - Workspace coordinates ([`Point`]) and axis identifiers
//! - Workspace travel limits and speed limits
//! - Per-axis state as reported by an axis controller client
//! - Recipes and their motion commands
//! - Execution state and progress of a running pattern

pub mod execution;
pub mod recipe;

pub use execution::{ExecutionState, ExecutionStatus, Progress};
pub use recipe::{BoundingBox, Command, MoveKind, Recipe, RecipeMetadata};

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three manipulator axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    /// X-axis.
    X,
    /// Y-axis.
    Y,
    /// Z-axis (tool height).
    Z,
}

impl Axis {
    /// All axes in canonical order
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Lower-case axis letter, as used in configuration keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
            Axis::Z => write!(f, "Z"),
        }
    }
}

/// A machine-workspace coordinate in millimetres
///
/// `z` is absent for purely planar geometry; such points leave the tool
/// height untouched when executed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Optional Z coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl Point {
    /// Create a planar point
    pub fn new(x: f64, y: f64) -> Self {
        debug_assert!(x.is_finite() && y.is_finite(), "point must be finite");
        Self { x, y, z: None }
    }

    /// Create a point with an explicit Z coordinate
    pub fn new_3d(x: f64, y: f64, z: f64) -> Self {
        debug_assert!(z.is_finite(), "point must be finite");
        Self {
            z: Some(z),
            ..Self::new(x, y)
        }
    }

    /// Machine zero
    pub fn origin() -> Self {
        Self::new_3d(0.0, 0.0, 0.0)
    }

    /// Same XY with the given Z
    pub fn with_z(self, z: f64) -> Self {
        Self { z: Some(z), ..self }
    }

    /// Translate in the XY plane
    pub fn translated(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z,
        }
    }

    /// Planar Euclidean distance
    pub fn distance_xy(&self, other: &Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Euclidean distance, including Z when both points carry one
    pub fn distance(&self, other: &Point) -> f64 {
        let dz = match (self.z, other.z) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        };
        (self.distance_xy(other).powi(2) + dz * dz).sqrt()
    }

    /// Linear interpolation, `t` in `[0, 1]`
    pub fn lerp(&self, other: &Point, t: f64) -> Point {
        let z = match (self.z, other.z) {
            (Some(a), Some(b)) => Some(a + (b - a) * t),
            (_, b) => b,
        };
        Point {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z,
        }
    }

    /// Coordinate along an axis; Z defaults to `None` when absent
    pub fn coordinate(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => Some(self.x),
            Axis::Y => Some(self.y),
            Axis::Z => self.z,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.z {
            Some(z) => write!(f, "({:.4}, {:.4}, {:.4})", self.x, self.y, z),
            None => write!(f, "({:.4}, {:.4})", self.x, self.y),
        }
    }
}

/// Which end of an axis range was exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitSide {
    /// Below the minimum.
    Min,
    /// Above the maximum.
    Max,
}

impl fmt::Display for LimitSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitSide::Min => write!(f, "min"),
            LimitSide::Max => write!(f, "max"),
        }
    }
}

/// Travel range of one axis in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    /// Minimum reachable coordinate
    pub min: f64,
    /// Maximum reachable coordinate
    pub max: f64,
}

impl AxisLimits {
    /// Create a range
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// The exceeded side and its limit, if `value` lies outside the range
    pub fn violation(&self, value: f64) -> Option<(LimitSide, f64)> {
        if value < self.min {
            Some((LimitSide::Min, self.min))
        } else if value > self.max {
            Some((LimitSide::Max, self.max))
        } else {
            None
        }
    }

    /// Clamp a coordinate into the range
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Configured travel limits of the manipulator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceBounds {
    /// X range
    pub x: AxisLimits,
    /// Y range
    pub y: AxisLimits,
    /// Z range
    pub z: AxisLimits,
}

impl WorkspaceBounds {
    /// Limits of one axis
    pub fn limits(&self, axis: Axis) -> AxisLimits {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// First axis limit a point exceeds, checked in X, Y, Z order
    pub fn violation(&self, point: &Point) -> Option<(Axis, LimitSide, f64)> {
        Axis::ALL.into_iter().find_map(|axis| {
            let value = point.coordinate(axis)?;
            self.limits(axis)
                .violation(value)
                .map(|(side, limit)| (axis, side, limit))
        })
    }

    /// Whether a point lies within every axis range
    pub fn contains(&self, point: &Point) -> bool {
        self.violation(point).is_none()
    }
}

impl Default for WorkspaceBounds {
    fn default() -> Self {
        Self {
            x: AxisLimits::new(0.0, 50.0),
            y: AxisLimits::new(0.0, 50.0),
            z: AxisLimits::new(0.0, 25.0),
        }
    }
}

/// Speed envelope of the stepper controllers, in mm/s
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedLimits {
    /// Slowest speed a controller accepts
    pub min_axis_speed: f64,
    /// Fastest speed a controller accepts
    pub max_axis_speed: f64,
    /// Requested axis speeds below this round to zero
    pub zero_threshold: f64,
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self {
            min_axis_speed: 1e-5,
            max_axis_speed: 1.0,
            zero_threshold: 5e-6,
        }
    }
}

impl SpeedLimits {
    /// Fastest vector speed of a simultaneous three-axis move
    pub fn max_path_speed(&self) -> f64 {
        self.max_axis_speed * 3f64.sqrt()
    }

    /// Whether a requested path speed can be executed
    pub fn accepts_path_speed(&self, speed: f64) -> bool {
        speed.is_finite() && speed >= self.min_axis_speed && speed <= self.max_path_speed()
    }

    /// Map a requested axis speed onto what the controller will run
    ///
    /// Returns `0.0` for speeds under the zero threshold.
    pub fn clamp_axis_speed(&self, speed: f64) -> f64 {
        let speed = speed.abs();
        if !speed.is_finite() || speed < self.zero_threshold {
            0.0
        } else {
            speed.clamp(self.min_axis_speed, self.max_axis_speed)
        }
    }
}

/// Last fault recorded against an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisFault {
    /// A move did not complete before its deadline.
    Timeout,
    /// The bus session dropped.
    ConnectionLost,
    /// The controller never raised its running flag.
    NeverStarted {
        /// Controller error register at the time.
        error_code: u16,
    },
    /// The move was interrupted by a stop request.
    Stopped,
    /// A stop request could not be delivered or did not settle.
    StopFailed,
}

impl AxisFault {
    /// Whether the reported position can no longer be trusted
    pub fn invalidates_position(&self) -> bool {
        !matches!(self, AxisFault::Stopped)
    }
}

impl fmt::Display for AxisFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisFault::Timeout => write!(f, "timeout"),
            AxisFault::ConnectionLost => write!(f, "connection lost"),
            AxisFault::NeverStarted { error_code } => {
                write!(f, "motion never started (error code {})", error_code)
            }
            AxisFault::Stopped => write!(f, "stopped"),
            AxisFault::StopFailed => write!(f, "stop failed"),
        }
    }
}

/// Snapshot of one axis as last reported by its controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisState {
    /// Axis this state belongs to
    pub axis: Axis,
    /// Whether the bus session is up
    pub connected: bool,
    /// Last reported position in mm
    pub position: f64,
    /// Last commanded target in mm
    pub target: f64,
    /// Whether a move is in progress
    pub moving: bool,
    /// Last fault, cleared on the next successful move or requery
    pub last_error: Option<AxisFault>,
}

impl AxisState {
    /// Initial state of an axis with no session
    pub fn new(axis: Axis) -> Self {
        Self {
            axis,
            connected: false,
            position: 0.0,
            target: 0.0,
            moving: false,
            last_error: None,
        }
    }

    /// Whether `position` reflects the hardware
    pub fn is_trusted(&self) -> bool {
        self.connected
            && !self
                .last_error
                .is_some_and(|fault| fault.invalidates_position())
    }
}

/// Composite position of the manipulator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Position composed from the axes' last polled values
    pub point: Point,
    /// Set when any axis is disconnected or untrusted
    pub stale: bool,
}

impl fmt::Display for PositionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stale {
            write!(f, "{} (stale)", self.point)
        } else {
            write!(f, "{}", self.point)
        }
    }
}
