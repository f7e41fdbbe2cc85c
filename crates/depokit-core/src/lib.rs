//! # DepoKit Core
//!
//! Core types shared by every DepoKit crate: the machine data model
//! (points, commands, recipes, axis and execution state), the error
//! taxonomy, length units and the telemetry event bus.

pub mod data;
pub mod error;
pub mod event_bus;
pub mod units;

pub use data::{
    Axis, AxisFault, AxisLimits, AxisState, BoundingBox, Command, ExecutionState,
    ExecutionStatus, LimitSide, MoveKind, Point, PositionSnapshot, Progress, Recipe,
    RecipeMetadata, SpeedLimits, WorkspaceBounds,
};

pub use error::{
    ConnError, Error, ExecutionError, FaultEscalation, MachineError, MotionError,
    OutOfBoundsError, PartialMoveError, Result, StopFailure, ValidationError,
};

pub use event_bus::{
    BusRecord, CommandOutcome, EventBus, EventBusConfig, EventCategory,
    EventFilter, FaultKind, SubscriptionId, TelemetryEvent,
};

pub use units::LengthUnit;
