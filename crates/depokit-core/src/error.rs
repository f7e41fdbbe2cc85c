//! Error handling for DepoKit
//!
//! Error types for each layer of the machine:
//! - Connection errors (field-bus session)
//! - Motion errors (single axis moves)
//! - Coordinator errors (partial XY moves, failed stops)
//! - Validation errors (recipe geometry, parameters)
//! - Execution errors (pattern executor state machine)
//!
//! All error types use `thiserror` for ergonomic error handling.

use std::fmt;

use thiserror::Error;

use crate::data::{Axis, ExecutionStatus, LimitSide, Point};

/// Connection error type
///
/// Raised by an axis controller client when its bus session is missing,
/// cannot be established, or drops mid-transaction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnError {
    /// No session has been established
    #[error("Not connected")]
    NotConnected,

    /// The endpoint could not be reached
    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed {
        /// The endpoint address.
        endpoint: String,
        /// The reason the connection failed.
        reason: String,
    },

    /// The session dropped while in use
    #[error("Connection lost: {reason}")]
    Lost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// The controller answered with an exception response
    #[error("Request rejected by controller (function 0x{function:02X}, exception {code})")]
    Rejected {
        /// Function code of the rejected request.
        function: u8,
        /// Exception code returned by the controller.
        code: u8,
    },

    /// A reconnect loop was cancelled before it succeeded
    #[error("Connection attempt cancelled")]
    Cancelled,
}

impl ConnError {
    /// Whether the session is gone as a result of this error
    pub fn is_session_loss(&self) -> bool {
        matches!(self, ConnError::Lost { .. } | ConnError::NotConnected)
    }
}

/// Motion error type
///
/// Terminal failure of a single-axis move or homing run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    /// Motion did not complete before the deadline
    #[error("{axis} axis move timed out after {timeout_ms}ms")]
    Timeout {
        /// The axis that timed out.
        axis: Axis,
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The controller accepted the move but never started it
    #[error("{axis} axis motion never started (controller error code {error_code})")]
    NeverStarted {
        /// The axis that did not start.
        axis: Axis,
        /// Controller error register.
        error_code: u16,
    },

    /// The move was interrupted by a stop request
    #[error("{axis} axis move interrupted by stop")]
    Stopped {
        /// The stopped axis.
        axis: Axis,
    },

    /// Requested speed rounds to zero on this axis
    #[error("{axis} axis cannot move at {speed} mm/s")]
    InvalidSpeed {
        /// The axis.
        axis: Axis,
        /// The requested speed.
        speed: f64,
    },

    /// The bus session failed during the move
    #[error("{axis} axis: {source}")]
    Connection {
        /// The axis.
        axis: Axis,
        /// The underlying connection error.
        #[source]
        source: ConnError,
    },
}

impl MotionError {
    /// Axis the error belongs to
    pub fn axis(&self) -> Axis {
        match self {
            MotionError::Timeout { axis, .. }
            | MotionError::NeverStarted { axis, .. }
            | MotionError::Stopped { axis }
            | MotionError::InvalidSpeed { axis, .. }
            | MotionError::Connection { axis, .. } => *axis,
        }
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, MotionError::Timeout { .. })
    }
}

/// Why a single axis stop failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StopFailure {
    /// The stop request never reached the controller
    #[error("{axis} axis stop could not be delivered: {source}")]
    Unreachable {
        /// The axis.
        axis: Axis,
        /// The underlying connection error.
        #[source]
        source: ConnError,
    },

    /// The controller kept reporting motion after the stop
    #[error("{axis} axis still moving {waited_ms}ms after stop")]
    DidNotSettle {
        /// The axis.
        axis: Axis,
        /// How long the controller was watched.
        waited_ms: u64,
    },
}

impl StopFailure {
    /// Axis that failed to stop
    pub fn axis(&self) -> Axis {
        match self {
            StopFailure::Unreachable { axis, .. } | StopFailure::DidNotSettle { axis, .. } => *axis,
        }
    }
}

/// A stop command failed to reach the hardware
///
/// Fatal: no further motion may be dispatched until an operator intervenes.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Fault escalation: {}", describe_failures(.failures))]
pub struct FaultEscalation {
    /// Per-axis failures
    pub failures: Vec<StopFailure>,
}

fn describe_failures(failures: &[StopFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One axis of a joint XY move failed
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Partial XY move, {failed_axis} axis failed: {source}")]
pub struct PartialMoveError {
    /// The axis whose move failed
    pub failed_axis: Axis,
    /// The failure
    #[source]
    pub source: MotionError,
}

/// Coordinator error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MachineError {
    /// Single axis failure
    #[error(transparent)]
    Motion(#[from] MotionError),

    /// Joint XY move failed on one axis
    #[error(transparent)]
    PartialMove(#[from] PartialMoveError),

    /// A stop could not be delivered
    #[error(transparent)]
    Fault(#[from] FaultEscalation),

    /// Motion is latched off after an emergency stop
    #[error("Motion halted by emergency stop")]
    Halted,

    /// A dwell or wait was interrupted by abort
    #[error("Interrupted by abort")]
    Interrupted,
}

impl MachineError {
    /// Whether the error forbids any further dispatch
    pub fn is_fatal(&self) -> bool {
        matches!(self, MachineError::Fault(_))
    }
}

/// A vertex lies outside the manipulator travel limits
#[derive(Debug, Clone, PartialEq)]
pub struct OutOfBoundsError {
    /// The offending vertex, after origin offset
    pub vertex: Point,
    /// Path the vertex belongs to
    pub sequence_id: Option<u32>,
    /// Index of the vertex within its path
    pub vertex_index: usize,
    /// The exceeded axis
    pub axis: Axis,
    /// Which end of the range was exceeded
    pub side: LimitSide,
    /// The exceeded limit
    pub limit: f64,
}

impl fmt::Display for OutOfBoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vertex {} {} is outside the workspace: {} {} limit {}",
            self.vertex_index, self.vertex, self.axis, self.side, self.limit
        )?;
        if let Some(id) = self.sequence_id {
            write!(f, " (path {})", id)?;
        }
        Ok(())
    }
}

impl std::error::Error for OutOfBoundsError {}

/// Validation error type
///
/// Bad recipe geometry or parameters, rejected before any hardware is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Geometry leaves the workspace
    #[error(transparent)]
    OutOfBounds(#[from] OutOfBoundsError),

    /// Speed outside what the controllers can run
    #[error("Invalid {name} {speed} mm/s (allowed {min}..={max})")]
    InvalidSpeed {
        /// Which speed parameter.
        name: String,
        /// The requested speed.
        speed: f64,
        /// Slowest accepted speed.
        min: f64,
        /// Fastest accepted speed.
        max: f64,
    },

    /// Other parameter out of range
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// The parameter name.
        name: String,
        /// The reason the parameter is invalid.
        reason: String,
    },

    /// Nothing printable left after filtering
    #[error("Geometry contains no printable paths")]
    EmptyGeometry,
}

/// Pattern executor error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// Operation not valid in the current state
    #[error("Cannot {operation} while {status}")]
    InvalidTransition {
        /// The rejected operation.
        operation: &'static str,
        /// The status at the time.
        status: ExecutionStatus,
    },

    /// Operation needs a loaded recipe
    #[error("No recipe loaded")]
    NoRecipe,

    /// The recipe has no commands
    #[error("Recipe is empty")]
    EmptyRecipe,

    /// The recipe leaves the configured workspace
    #[error("Recipe rejected: {0}")]
    OutsideWorkspace(#[from] OutOfBoundsError),

    /// The coordinator reported a failure
    #[error(transparent)]
    Machine(#[from] MachineError),
}

/// Main error type for DepoKit
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnError),

    /// Motion error
    #[error(transparent)]
    Motion(#[from] MotionError),

    /// Coordinator error
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// Validation error
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Executor error
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Motion(MotionError::Connection { .. })
        )
    }

    /// Check if this error requires operator or hardware intervention
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Machine(e) => e.is_fatal(),
            Error::Execution(ExecutionError::Machine(e)) => e.is_fatal(),
            _ => false,
        }
    }

    /// Check if the system can continue after this error
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_move_display_names_failed_axis() {
        let err = PartialMoveError {
            failed_axis: Axis::Y,
            source: MotionError::Timeout {
                axis: Axis::Y,
                timeout_ms: 5000,
            },
        };
        assert_eq!(
            err.to_string(),
            "Partial XY move, Y axis failed: Y axis move timed out after 5000ms"
        );
    }

    #[test]
    fn test_fault_escalation_is_fatal() {
        let fault = FaultEscalation {
            failures: vec![
                StopFailure::Unreachable {
                    axis: Axis::X,
                    source: ConnError::NotConnected,
                },
                StopFailure::DidNotSettle {
                    axis: Axis::Z,
                    waited_ms: 100,
                },
            ],
        };
        assert!(fault.to_string().contains("X axis stop could not be delivered"));
        assert!(fault.to_string().contains("Z axis still moving 100ms after stop"));

        let err: Error = MachineError::from(fault).into();
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_out_of_bounds_display() {
        let err = OutOfBoundsError {
            vertex: Point::new(60.0, 1.0),
            sequence_id: Some(3),
            vertex_index: 2,
            axis: Axis::X,
            side: LimitSide::Max,
            limit: 50.0,
        };
        assert_eq!(
            err.to_string(),
            "Vertex 2 (60.0000, 1.0000) is outside the workspace: X max limit 50 (path 3)"
        );
    }

    #[test]
    fn test_connection_classification() {
        let err: Error = MotionError::Connection {
            axis: Axis::X,
            source: ConnError::Lost {
                reason: "reset".into(),
            },
        }
        .into();
        assert!(err.is_connection_error());
        assert!(err.is_recoverable());
    }
}
