//! Pattern Executor
//!
//! Drives a loaded recipe through the coordinator:
//!
//! ```text
//! Idle -> Positioning -> ReadyPrompt -> Running <-> Paused -> Completed
//!                 \____________\____________\_________\____> Aborted
//! ```
//!
//! The run loop is a single task dispatching one command at a time.
//! `current_index` only advances when a command has completed, so it
//! always names a fully completed boundary.

use chrono::{DateTime, Utc};
use depokit_core::{
    Axis, Command, CommandOutcome, EventBus, ExecutionError, ExecutionState, ExecutionStatus,
    FaultKind, MachineError, MotionError, OutOfBoundsError, Point, Progress, Recipe, TelemetryEvent,
    WorkspaceBounds,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::manipulator::Manipulator;

/// Executor settings, read once when the executor is created
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Speed for positioning, re-sync and hop moves, in mm/s
    pub travel_speed: f64,
    /// Distance from the expected position tolerated on resume, in mm
    pub resync_tolerance: f64,
    /// Limits every recipe target is checked against on load
    pub workspace: WorkspaceBounds,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            travel_speed: 0.5,
            resync_tolerance: 5e-3,
            workspace: WorkspaceBounds::default(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    recipe: Option<Arc<Recipe>>,
    status: ExecutionStatus,
    current_index: usize,
    pause_requested: bool,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    first_completed: Option<Instant>,
    last_failure: Option<MachineError>,
    fatal: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            recipe: None,
            status: ExecutionStatus::Idle,
            current_index: 0,
            pause_requested: false,
            started_at: None,
            started: None,
            first_completed: None,
            last_failure: None,
            fatal: false,
        }
    }
}

impl Inner {
    fn elapsed_ms(&self) -> u64 {
        self.started
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    fn progress(&self) -> Option<Progress> {
        let recipe = self.recipe.as_ref()?;
        Some(Progress::compute(
            self.current_index,
            recipe.len(),
            self.elapsed_ms(),
            self.first_completed
                .map(|t| t.elapsed().as_millis() as u64),
        ))
    }
}

struct Shared {
    manipulator: Arc<Manipulator>,
    config: ExecutorConfig,
    events: Arc<EventBus>,
    inner: Mutex<Inner>,
    status: watch::Sender<ExecutionStatus>,
    run_task: Mutex<Option<JoinHandle<()>>>,
}

/// The recipe state machine
///
/// Cheap to clone; clones drive the same executor.
#[derive(Clone)]
pub struct PatternExecutor {
    shared: Arc<Shared>,
}

impl PatternExecutor {
    /// Create an idle executor
    pub fn new(
        manipulator: Arc<Manipulator>,
        config: ExecutorConfig,
        events: Arc<EventBus>,
    ) -> Self {
        let (status, _) = watch::channel(ExecutionStatus::Idle);
        Self {
            shared: Arc::new(Shared {
                manipulator,
                config,
                events,
                inner: Mutex::new(Inner::default()),
                status,
                run_task: Mutex::new(None),
            }),
        }
    }

    /// The coordinator this executor drives
    pub fn manipulator(&self) -> &Arc<Manipulator> {
        &self.shared.manipulator
    }

    /// Snapshot of status, index and timing
    pub fn state(&self) -> ExecutionState {
        let inner = self.shared.inner.lock();
        ExecutionState {
            status: inner.status,
            current_index: inner.current_index,
            started_at: inner.started_at,
            elapsed_ms: inner.elapsed_ms(),
        }
    }

    /// Current status
    pub fn status(&self) -> ExecutionStatus {
        self.shared.inner.lock().status
    }

    /// Index of the next command to dispatch
    pub fn current_index(&self) -> usize {
        self.shared.inner.lock().current_index
    }

    /// The loaded recipe
    pub fn recipe(&self) -> Option<Arc<Recipe>> {
        self.shared.inner.lock().recipe.clone()
    }

    /// Progress of the loaded recipe
    pub fn progress(&self) -> Option<Progress> {
        self.shared.inner.lock().progress()
    }

    /// Failure that caused the last pause or abort
    pub fn last_failure(&self) -> Option<MachineError> {
        self.shared.inner.lock().last_failure.clone()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<ExecutionStatus> {
        self.shared.status.subscribe()
    }

    /// Wait until the executor is no longer running
    pub async fn wait_until_settled(&self) -> ExecutionStatus {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|s| *s != ExecutionStatus::Running)
            .await
            .map(|status| *status);
        settled.unwrap_or_else(|_| self.status())
    }

    /// Load a recipe; valid only while idle
    ///
    /// Every target is checked against the workspace before anything is
    /// stored.
    pub fn load(&self, recipe: Recipe) -> Result<(), ExecutionError> {
        if recipe.is_empty() {
            return Err(ExecutionError::EmptyRecipe);
        }
        self.check_workspace(&recipe)?;

        let (change, fatal) = {
            let mut inner = self.shared.inner.lock();
            if inner.status != ExecutionStatus::Idle {
                return Err(ExecutionError::InvalidTransition {
                    operation: "load",
                    status: inner.status,
                });
            }
            tracing::info!(
                "Loaded recipe: {} commands, {:.3} mm path{}",
                recipe.len(),
                recipe.path_length(),
                recipe
                    .metadata()
                    .source
                    .as_deref()
                    .map(|s| format!(" from {}", s))
                    .unwrap_or_default()
            );
            let fatal = inner.fatal;
            *inner = Inner {
                recipe: Some(Arc::new(recipe)),
                fatal,
                ..Inner::default()
            };
            (self.transition(&mut inner, ExecutionStatus::Positioning), fatal)
        };
        if !fatal {
            self.shared.manipulator.release_halt();
        }
        self.announce(change);
        Ok(())
    }

    /// Move to the first position and wait for operator confirmation
    ///
    /// A recipe that starts with `Home` needs no positioning move.
    pub async fn begin(&self) -> Result<(), ExecutionError> {
        let first = {
            let inner = self.shared.inner.lock();
            if inner.status != ExecutionStatus::Positioning {
                return Err(ExecutionError::InvalidTransition {
                    operation: "begin",
                    status: inner.status,
                });
            }
            inner
                .recipe
                .as_ref()
                .ok_or(ExecutionError::NoRecipe)?
                .first_position()
        };

        if let Some(point) = first {
            tracing::info!("Positioning at {}", point);
            if let Err(err) = self
                .shared
                .manipulator
                .move_to_point(point, self.shared.config.travel_speed)
                .await
            {
                self.fault(None, FaultKind::Motion, format!("positioning failed: {}", err));
                if err.is_fatal() {
                    self.fail_fatal(err.clone());
                }
                return Err(err.into());
            }
        }

        let change = {
            let mut inner = self.shared.inner.lock();
            if inner.status != ExecutionStatus::Positioning {
                return Err(ExecutionError::InvalidTransition {
                    operation: "begin",
                    status: inner.status,
                });
            }
            self.transition(&mut inner, ExecutionStatus::ReadyPrompt)
        };
        self.announce(change);
        Ok(())
    }

    /// Operator confirmation; starts the run loop
    pub fn confirm(&self) -> Result<(), ExecutionError> {
        let change = {
            let mut inner = self.shared.inner.lock();
            if inner.status != ExecutionStatus::ReadyPrompt {
                return Err(ExecutionError::InvalidTransition {
                    operation: "confirm",
                    status: inner.status,
                });
            }
            inner.started_at = Some(Utc::now());
            inner.started = Some(Instant::now());
            self.transition(&mut inner, ExecutionStatus::Running)
        };
        self.announce(change);
        self.spawn_run_loop();
        Ok(())
    }

    /// Pause at the next command boundary
    ///
    /// An in-flight command is not cancelled; this waits for it to finish
    /// and returns the status the executor settled in.
    pub async fn pause(&self) -> Result<ExecutionStatus, ExecutionError> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.status != ExecutionStatus::Running {
                return Err(ExecutionError::InvalidTransition {
                    operation: "pause",
                    status: inner.status,
                });
            }
            inner.pause_requested = true;
        }
        tracing::info!("Pause requested");
        Ok(self.wait_until_settled().await)
    }

    /// Continue a paused run
    ///
    /// Re-reads every axis and re-syncs to the expected position first
    /// when the machine has drifted or its position is not trusted.
    pub async fn resume(&self) -> Result<(), ExecutionError> {
        let expected = {
            let inner = self.shared.inner.lock();
            if inner.status != ExecutionStatus::Paused {
                return Err(ExecutionError::InvalidTransition {
                    operation: "resume",
                    status: inner.status,
                });
            }
            if inner.fatal {
                return Err(ExecutionError::Machine(MachineError::Halted));
            }
            inner
                .recipe
                .as_ref()
                .ok_or(ExecutionError::NoRecipe)?
                .expected_position_before(inner.current_index)
        };

        let manipulator = &self.shared.manipulator;
        manipulator.release_halt();
        let snapshot = manipulator
            .requery_all()
            .await
            .map_err(MachineError::from)?;

        if let Some(expected) = expected {
            let drift = drift(&snapshot.point, &expected);
            if snapshot.stale || drift > self.shared.config.resync_tolerance {
                let message = format!(
                    "re-syncing from {} to {} (drift {:.4} mm)",
                    snapshot, expected, drift
                );
                tracing::warn!("{}", message);
                self.fault(None, FaultKind::Resync, message);
                manipulator
                    .move_to_point(expected, self.shared.config.travel_speed)
                    .await?;
            }
        }

        let change = {
            let mut inner = self.shared.inner.lock();
            if inner.status != ExecutionStatus::Paused {
                return Err(ExecutionError::InvalidTransition {
                    operation: "resume",
                    status: inner.status,
                });
            }
            inner.last_failure = None;
            inner.pause_requested = false;
            self.transition(&mut inner, ExecutionStatus::Running)
        };
        self.announce(change);
        self.spawn_run_loop();
        Ok(())
    }

    /// Emergency stop and abort
    ///
    /// Valid from any loaded, non-terminal state. The index is frozen. A
    /// stop that cannot be delivered is returned as a fatal fault; the
    /// executor is Aborted either way.
    pub async fn abort(&self) -> Result<(), ExecutionError> {
        let change = {
            let mut inner = self.shared.inner.lock();
            if inner.status == ExecutionStatus::Idle || inner.status.is_terminal() {
                return Err(ExecutionError::InvalidTransition {
                    operation: "abort",
                    status: inner.status,
                });
            }
            inner.pause_requested = false;
            self.transition(&mut inner, ExecutionStatus::Aborted)
        };
        self.announce(change);
        tracing::warn!("Aborting at command {}", self.current_index());

        let stopped = self.shared.manipulator.emergency_stop().await;

        let task = self.shared.run_task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!("Run loop ended abnormally: {}", err);
            }
        }

        if let Err(escalation) = stopped {
            let err = MachineError::from(escalation);
            let mut inner = self.shared.inner.lock();
            inner.fatal = true;
            inner.last_failure = Some(err.clone());
            return Err(err.into());
        }
        Ok(())
    }

    /// Return a completed or aborted executor to idle
    ///
    /// The motion halt stays latched after a fatal fault.
    pub fn reset(&self) -> Result<(), ExecutionError> {
        let (change, fatal) = {
            let mut inner = self.shared.inner.lock();
            if !inner.status.is_terminal() {
                return Err(ExecutionError::InvalidTransition {
                    operation: "reset",
                    status: inner.status,
                });
            }
            let fatal = inner.fatal;
            *inner = Inner {
                status: inner.status,
                fatal,
                ..Inner::default()
            };
            (self.transition(&mut inner, ExecutionStatus::Idle), fatal)
        };
        if !fatal {
            self.shared.manipulator.release_halt();
        }
        self.announce(change);
        Ok(())
    }

    fn check_workspace(&self, recipe: &Recipe) -> Result<(), ExecutionError> {
        let bounds = &self.shared.config.workspace;
        for (index, command) in recipe.commands().iter().enumerate() {
            let Some(target) = command.target() else {
                continue;
            };
            if let Some((axis, side, limit)) = bounds.violation(&target) {
                return Err(OutOfBoundsError {
                    vertex: target,
                    sequence_id: None,
                    vertex_index: index,
                    axis,
                    side,
                    limit,
                }
                .into());
            }
        }
        Ok(())
    }

    fn spawn_run_loop(&self) {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_loop().await });
        if let Some(previous) = self.shared.run_task.lock().replace(handle) {
            // a finished loop from before a pause
            previous.abort();
        }
    }

    async fn run_loop(&self) {
        loop {
            let next = {
                let mut inner = self.shared.inner.lock();
                self.next_command(&mut inner)
            };
            let (index, command) = match next {
                Next::Dispatch(index, command) => (index, command),
                Next::Stop(change) => {
                    self.announce(change);
                    return;
                }
            };

            self.shared.events.emit(TelemetryEvent::CommandStarted {
                index,
                command: command.clone(),
            });
            tracing::debug!("#{} {}", index, command);
            let result = self.dispatch(&command).await;

            match result {
                Ok(()) => {
                    let progress = {
                        let mut inner = self.shared.inner.lock();
                        if inner.status != ExecutionStatus::Running {
                            None
                        } else {
                            inner.current_index = index + 1;
                            if inner.first_completed.is_none() {
                                inner.first_completed = Some(Instant::now());
                            }
                            inner.progress()
                        }
                    };
                    self.shared.events.emit(TelemetryEvent::CommandCompleted {
                        index,
                        result: CommandOutcome::Succeeded,
                    });
                    match progress {
                        Some(progress) => {
                            self.shared.events.emit(TelemetryEvent::Progress(progress))
                        }
                        None => return,
                    }
                }
                Err(err) => {
                    self.shared.events.emit(TelemetryEvent::CommandCompleted {
                        index,
                        result: CommandOutcome::Failed {
                            reason: err.to_string(),
                        },
                    });
                    self.handle_failure(index, err);
                    return;
                }
            }
        }
    }

    fn next_command(&self, inner: &mut Inner) -> Next {
        if inner.status != ExecutionStatus::Running {
            return Next::Stop(None);
        }
        let command = inner
            .recipe
            .as_ref()
            .and_then(|recipe| recipe.get(inner.current_index))
            .cloned();
        let Some(command) = command else {
            // A pause landing on the last command has nothing left to hold.
            inner.pause_requested = false;
            tracing::info!(
                "Recipe completed: {} commands in {} ms",
                inner.current_index,
                inner.elapsed_ms()
            );
            return Next::Stop(self.transition(inner, ExecutionStatus::Completed));
        };
        if inner.pause_requested {
            inner.pause_requested = false;
            tracing::info!("Paused at command {}", inner.current_index);
            return Next::Stop(self.transition(inner, ExecutionStatus::Paused));
        }
        Next::Dispatch(inner.current_index, command)
    }

    async fn dispatch(&self, command: &Command) -> Result<(), MachineError> {
        let manipulator = &self.shared.manipulator;
        match command {
            Command::Move { to, speed, .. } => manipulator.move_to_point(*to, *speed).await,
            Command::HopDwell { at, dwell_ms } => {
                manipulator
                    .move_to_point(*at, self.shared.config.travel_speed)
                    .await?;
                self.dwell(Duration::from_millis(*dwell_ms)).await
            }
            Command::Home => manipulator.home_all().await,
        }
    }

    async fn dwell(&self, duration: Duration) -> Result<(), MachineError> {
        let rx = self.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = aborted(rx) => Err(MachineError::Interrupted),
        }
    }

    fn handle_failure(&self, index: usize, err: MachineError) {
        let change = {
            let mut inner = self.shared.inner.lock();
            if inner.status != ExecutionStatus::Running {
                return;
            }
            inner.last_failure = Some(err.clone());
            inner.pause_requested = false;
            if err.is_fatal() {
                inner.fatal = true;
                tracing::error!("Command {} failed fatally: {}", index, err);
                self.transition(&mut inner, ExecutionStatus::Aborted)
            } else {
                tracing::warn!("Command {} failed, pausing: {}", index, err);
                self.transition(&mut inner, ExecutionStatus::Paused)
            }
        };
        if err.is_fatal() {
            self.shared.manipulator.latch_halt();
        }
        self.fault(None, fault_kind(&err), err.to_string());
        self.announce(change);
    }

    fn fail_fatal(&self, err: MachineError) {
        self.shared.manipulator.latch_halt();
        let change = {
            let mut inner = self.shared.inner.lock();
            inner.fatal = true;
            inner.last_failure = Some(err);
            if inner.status.is_terminal() {
                None
            } else {
                self.transition(&mut inner, ExecutionStatus::Aborted)
            }
        };
        self.announce(change);
    }

    /// Change status under the lock; the event goes out via `announce`
    fn transition(
        &self,
        inner: &mut Inner,
        new: ExecutionStatus,
    ) -> Option<(ExecutionStatus, ExecutionStatus)> {
        let old = inner.status;
        if old == new {
            return None;
        }
        inner.status = new;
        self.shared.status.send_replace(new);
        Some((old, new))
    }

    fn announce(&self, change: Option<(ExecutionStatus, ExecutionStatus)>) {
        if let Some((old, new)) = change {
            tracing::info!("Execution: {} -> {}", old, new);
            self.shared
                .events
                .emit(TelemetryEvent::ExecutionStateChanged { old, new });
        }
    }

    fn fault(&self, axis: Option<Axis>, kind: FaultKind, message: String) {
        self.shared.events.emit(TelemetryEvent::Fault {
            axis,
            kind,
            message,
        });
    }
}

impl std::fmt::Debug for PatternExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternExecutor")
            .field("state", &self.state())
            .finish()
    }
}

enum Next {
    Dispatch(usize, Command),
    Stop(Option<(ExecutionStatus, ExecutionStatus)>),
}

async fn aborted(mut rx: watch::Receiver<ExecutionStatus>) {
    let _ = rx.wait_for(|s| *s == ExecutionStatus::Aborted).await;
}

fn drift(actual: &Point, expected: &Point) -> f64 {
    let dz = expected
        .z
        .zip(actual.z)
        .map(|(e, a)| e - a)
        .unwrap_or(0.0);
    (actual.distance_xy(expected).powi(2) + dz * dz).sqrt()
}

fn fault_kind(err: &MachineError) -> FaultKind {
    match err {
        MachineError::PartialMove(_) => FaultKind::PartialMove,
        MachineError::Fault(_) => FaultKind::StopFailed,
        MachineError::Motion(motion) if motion.is_timeout() => FaultKind::Timeout,
        MachineError::Motion(MotionError::NeverStarted { .. }) => {
            FaultKind::MotionNeverStarted
        }
        MachineError::Motion(MotionError::Connection { .. }) => {
            FaultKind::ConnectionLost
        }
        _ => FaultKind::Motion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_ignores_missing_z() {
        let actual = Point::new_3d(1.0, 1.0, 3.0);
        assert_eq!(drift(&actual, &Point::new(1.0, 1.0)), 0.0);
        assert!((drift(&actual, &Point::new_3d(1.0, 4.0, 7.0)) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_failure_classification() {
        let timeout = MachineError::Motion(MotionError::Timeout {
            axis: Axis::Y,
            timeout_ms: 5000,
        });
        assert_eq!(fault_kind(&timeout), FaultKind::Timeout);
        assert_eq!(fault_kind(&MachineError::Halted), FaultKind::Motion);
    }
}
