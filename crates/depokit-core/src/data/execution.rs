//! Pattern execution state and progress

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a pattern run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// No recipe loaded.
    Idle,
    /// Recipe loaded, moving to its first position.
    Positioning,
    /// At the first position, waiting for operator confirmation.
    ReadyPrompt,
    /// Dispatching commands.
    Running,
    /// Halted at a command boundary, waiting for the operator.
    Paused,
    /// Stopped by abort or a fatal fault.
    Aborted,
    /// Every command completed.
    Completed,
}

impl ExecutionStatus {
    /// Completed or Aborted
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Aborted | ExecutionStatus::Completed)
    }

    /// Running or Paused, the states in which a recipe counts as active
    pub fn is_active(&self) -> bool {
        matches!(self, ExecutionStatus::Running | ExecutionStatus::Paused)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Idle => write!(f, "Idle"),
            ExecutionStatus::Positioning => write!(f, "Positioning"),
            ExecutionStatus::ReadyPrompt => write!(f, "ReadyPrompt"),
            ExecutionStatus::Running => write!(f, "Running"),
            ExecutionStatus::Paused => write!(f, "Paused"),
            ExecutionStatus::Aborted => write!(f, "Aborted"),
            ExecutionStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// Snapshot of the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Current status
    pub status: ExecutionStatus,
    /// Index of the next command to dispatch
    pub current_index: usize,
    /// Wall-clock time the run was confirmed
    pub started_at: Option<DateTime<Utc>>,
    /// Milliseconds since the run was confirmed
    pub elapsed_ms: u64,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            status: ExecutionStatus::Idle,
            current_index: 0,
            started_at: None,
            elapsed_ms: 0,
        }
    }
}

/// Run progress with a linear time estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Completed commands
    pub completed: usize,
    /// Total commands
    pub total: usize,
    /// `completed / total`
    pub fraction: f64,
    /// Milliseconds since the run started
    pub elapsed_ms: u64,
    /// Extrapolated time to completion
    pub estimated_remaining_ms: Option<u64>,
}

impl Progress {
    /// Compute progress
    ///
    /// `since_first_completed_ms` is the time elapsed since the first
    /// command completed; the remaining time is extrapolated from the rate
    /// observed over the commands completed after it.
    pub fn compute(
        completed: usize,
        total: usize,
        elapsed_ms: u64,
        since_first_completed_ms: Option<u64>,
    ) -> Self {
        let fraction = if total == 0 {
            1.0
        } else {
            completed as f64 / total as f64
        };
        let estimated_remaining_ms = if completed >= total {
            Some(0)
        } else {
            match since_first_completed_ms {
                Some(window) if completed > 1 => {
                    let per_command = window as f64 / (completed - 1) as f64;
                    Some((per_command * (total - completed) as f64).round() as u64)
                }
                _ => None,
            }
        };
        Self {
            completed,
            total,
            fraction,
            elapsed_ms,
            estimated_remaining_ms,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({:.1}%)",
            self.completed,
            self.total,
            self.fraction * 100.0
        )?;
        if let Some(remaining) = self.estimated_remaining_ms {
            write!(f, ", ~{}s remaining", remaining / 1000)?;
        }
        Ok(())
    }
}
