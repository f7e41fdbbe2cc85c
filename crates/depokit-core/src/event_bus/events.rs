//! Telemetry event definitions.
//!
//! Events are produced by the axis clients, the coordinator and the
//! executor, and consumed only by collaborators (logging, UI, debugging
//! panels). They are cloneable and serializable for logging and replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{Axis, AxisFault, Command, ExecutionStatus, Progress};

/// Root telemetry event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    /// An axis reported a new position.
    PositionUpdated {
        /// Axis
        axis: Axis,
        /// Position in mm
        value: f64,
    },
    /// An axis session came up or went down.
    ConnectionChanged {
        /// Axis
        axis: Axis,
        /// New connection state
        connected: bool,
    },
    /// The executor dispatched a command.
    CommandStarted {
        /// Recipe index
        index: usize,
        /// The command
        command: Command,
    },
    /// A command reached a terminal result.
    CommandCompleted {
        /// Recipe index
        index: usize,
        /// Outcome
        result: CommandOutcome,
    },
    /// The executor changed status.
    ExecutionStateChanged {
        /// Previous status
        old: ExecutionStatus,
        /// New status
        new: ExecutionStatus,
    },
    /// Progress after a completed command.
    Progress(Progress),
    /// Something went wrong.
    Fault {
        /// Affected axis, if any
        axis: Option<Axis>,
        /// Fault classification
        kind: FaultKind,
        /// Human readable detail
        message: String,
    },
    /// One field-bus transaction.
    BusTraffic(BusRecord),
}

impl TelemetryEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            TelemetryEvent::PositionUpdated { .. } => EventCategory::Position,
            TelemetryEvent::ConnectionChanged { .. } => EventCategory::Connection,
            TelemetryEvent::CommandStarted { .. } | TelemetryEvent::CommandCompleted { .. } => {
                EventCategory::Command
            }
            TelemetryEvent::ExecutionStateChanged { .. } | TelemetryEvent::Progress(_) => {
                EventCategory::Execution
            }
            TelemetryEvent::Fault { .. } => EventCategory::Fault,
            TelemetryEvent::BusTraffic(_) => EventCategory::Bus,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            TelemetryEvent::PositionUpdated { axis, value } => {
                format!("{} at {:.4} mm", axis, value)
            }
            TelemetryEvent::ConnectionChanged { axis, connected } => {
                if *connected {
                    format!("{} axis connected", axis)
                } else {
                    format!("{} axis disconnected", axis)
                }
            }
            TelemetryEvent::CommandStarted { index, command } => {
                format!("#{} started: {}", index, command)
            }
            TelemetryEvent::CommandCompleted { index, result } => match result {
                CommandOutcome::Succeeded => format!("#{} completed", index),
                CommandOutcome::Failed { reason } => format!("#{} failed: {}", index, reason),
            },
            TelemetryEvent::ExecutionStateChanged { old, new } => {
                format!("Execution: {} -> {}", old, new)
            }
            TelemetryEvent::Progress(progress) => format!("Progress {}", progress),
            TelemetryEvent::Fault {
                axis,
                kind,
                message,
            } => match axis {
                Some(axis) => format!("{:?} fault on {}: {}", kind, axis, message),
                None => format!("{:?} fault: {}", kind, message),
            },
            TelemetryEvent::BusTraffic(record) => format!(
                "{} {} {}",
                record.axis, record.action, record.description
            ),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Axis position updates.
    Position,
    /// Bus session changes.
    Connection,
    /// Command start/completion.
    Command,
    /// Executor status and progress.
    Execution,
    /// Faults.
    Fault,
    /// Raw bus traffic.
    Bus,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Position => write!(f, "Position"),
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Command => write!(f, "Command"),
            EventCategory::Execution => write!(f, "Execution"),
            EventCategory::Fault => write!(f, "Fault"),
            EventCategory::Bus => write!(f, "Bus"),
        }
    }
}

/// Terminal result of a dispatched command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// Completed.
    Succeeded,
    /// Failed; the executor paused or aborted.
    Failed {
        /// Error text
        reason: String,
    },
}

/// Fault classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// Move deadline exceeded.
    Timeout,
    /// Bus session dropped.
    ConnectionLost,
    /// Controller never started a commanded move.
    MotionNeverStarted,
    /// XY move failed on one axis.
    PartialMove,
    /// A stop could not be delivered; fatal.
    StopFailed,
    /// Controller rejected a request.
    Rejected,
    /// Operator-visible motion failure not covered above.
    Motion,
    /// The machine had to be re-synced before resuming.
    Resync,
}

impl From<AxisFault> for FaultKind {
    fn from(fault: AxisFault) -> Self {
        match fault {
            AxisFault::Timeout => FaultKind::Timeout,
            AxisFault::ConnectionLost => FaultKind::ConnectionLost,
            AxisFault::NeverStarted { .. } => FaultKind::MotionNeverStarted,
            AxisFault::Stopped => FaultKind::Motion,
            AxisFault::StopFailed => FaultKind::StopFailed,
        }
    }
}

/// One logged field-bus transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusRecord {
    /// When the transaction completed
    pub timestamp: DateTime<Utc>,
    /// Axis the endpoint drives
    pub axis: Axis,
    /// `read`, `write` or `error`
    pub action: String,
    /// Register and value description
    pub description: String,
    /// Raw register words
    pub raw: Vec<u16>,
}

impl BusRecord {
    /// Record stamped with the current time
    pub fn now(
        axis: Axis,
        action: impl Into<String>,
        description: impl Into<String>,
        raw: Vec<u16>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            axis,
            action: action.into(),
            description: description.into(),
            raw,
        }
    }
}
