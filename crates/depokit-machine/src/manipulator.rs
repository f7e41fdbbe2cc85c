//! Manipulator Coordinator
//!
//! Unifies the three axis clients into one logical XYZ move surface.
//! Motion calls are serialised by a single lock; status reads and the
//! emergency stop never take it. XY moves are dispatched to both axes at
//! once and joined.

use depokit_communication::{AxisController, BusEndpoint};
use depokit_core::{
    Axis, ConnError, EventBus, FaultEscalation, FaultKind, MachineError, MotionError,
    PartialMoveError, Point, PositionSnapshot, StopFailure, TelemetryEvent,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Coordinator tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManipulatorConfig {
    /// Axis deltas below this are not dispatched, in mm
    pub skip_epsilon: f64,
    /// Speed of Z moves issued by `move_to_point`, in mm/s
    pub z_speed: f64,
}

impl Default for ManipulatorConfig {
    fn default() -> Self {
        Self {
            skip_epsilon: 4e-4,
            z_speed: 0.5,
        }
    }
}

/// Bus endpoints of the three axis controllers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisEndpoints {
    /// X controller
    pub x: BusEndpoint,
    /// Y controller
    pub y: BusEndpoint,
    /// Z controller
    pub z: BusEndpoint,
}

/// The three-axis coordinator
pub struct Manipulator {
    x: Arc<AxisController>,
    y: Arc<AxisController>,
    z: Arc<AxisController>,
    config: ManipulatorConfig,
    events: Arc<EventBus>,
    motion_lock: Mutex<()>,
    halted: AtomicBool,
}

impl Manipulator {
    /// Create a coordinator over already constructed axis clients
    pub fn new(
        x: Arc<AxisController>,
        y: Arc<AxisController>,
        z: Arc<AxisController>,
        config: ManipulatorConfig,
        events: Arc<EventBus>,
    ) -> Self {
        debug_assert_eq!(x.axis(), Axis::X);
        debug_assert_eq!(y.axis(), Axis::Y);
        debug_assert_eq!(z.axis(), Axis::Z);
        Self {
            x,
            y,
            z,
            config,
            events,
            motion_lock: Mutex::new(()),
            halted: AtomicBool::new(false),
        }
    }

    /// Client of one axis
    pub fn axis(&self, axis: Axis) -> &Arc<AxisController> {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    /// Coordinator configuration
    pub fn config(&self) -> &ManipulatorConfig {
        &self.config
    }

    /// Connect all three axes and start their status monitors
    ///
    /// Monitors are started even for axes that failed to connect, so they
    /// keep reconnecting in the background. The first failure is returned.
    pub async fn connect_all(&self, endpoints: &AxisEndpoints) -> Result<(), ConnError> {
        let (x, y, z) = tokio::join!(
            self.x.connect(endpoints.x.clone()),
            self.y.connect(endpoints.y.clone()),
            self.z.connect(endpoints.z.clone()),
        );
        for controller in [&self.x, &self.y, &self.z] {
            controller.start_monitor();
        }
        x.and(y).and(z)
    }

    /// Stop the monitors and close every session
    pub async fn shutdown(&self) {
        tokio::join!(
            self.x.disconnect(),
            self.y.disconnect(),
            self.z.disconnect()
        );
        tracing::info!("Manipulator shut down");
    }

    /// Position composed from the axes' last polled values
    ///
    /// Never performs bus I/O. Marked stale when any axis is disconnected
    /// or carries a fault that invalidates its position.
    pub fn current_position(&self) -> PositionSnapshot {
        let x = self.x.poll_status();
        let y = self.y.poll_status();
        let z = self.z.poll_status();
        PositionSnapshot {
            point: Point::new_3d(x.position, y.position, z.position),
            stale: !(x.is_trusted() && y.is_trusted() && z.is_trusted()),
        }
    }

    /// Re-read every axis from the hardware, clearing recorded faults
    pub async fn requery_all(&self) -> Result<PositionSnapshot, MotionError> {
        let (x, y, z) = tokio::join!(self.x.requery(), self.y.requery(), self.z.requery());
        for (axis, result) in [(Axis::X, x), (Axis::Y, y), (Axis::Z, z)] {
            result.map_err(|source| MotionError::Connection { axis, source })?;
        }
        Ok(self.current_position())
    }

    /// Whether motion is latched off by an emergency stop
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Latch motion off without issuing stops
    pub fn latch_halt(&self) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            tracing::warn!("Motion latched off");
        }
    }

    /// Allow motion again after an emergency stop
    pub fn release_halt(&self) {
        if self.halted.swap(false, Ordering::SeqCst) {
            tracing::info!("Motion halt released");
        }
    }

    /// Joint XY move at `speed` mm/s along the straight line
    ///
    /// Both axes are commanded at once with speeds scaled so they arrive
    /// together. If one axis fails the other is stopped immediately and a
    /// [`PartialMoveError`] names the failed axis.
    pub async fn move_xy(&self, x: f64, y: f64, speed: f64) -> Result<(), MachineError> {
        let _guard = self.motion_lock.lock().await;
        self.ensure_not_halted()?;
        self.xy_locked(x, y, speed).await
    }

    /// Single-axis Z move
    pub async fn move_z(&self, z: f64, speed: f64) -> Result<(), MachineError> {
        let _guard = self.motion_lock.lock().await;
        self.ensure_not_halted()?;
        self.z.move_to(z, speed).await.map_err(MachineError::from)
    }

    /// Move to a point, adjusting Z before the XY move when the point
    /// carries a different height
    pub async fn move_to_point(&self, point: Point, speed: f64) -> Result<(), MachineError> {
        let _guard = self.motion_lock.lock().await;
        self.ensure_not_halted()?;
        if let Some(z) = point.z {
            if (z - self.z.poll_status().position).abs() >= self.config.skip_epsilon {
                self.z.move_to(z, self.config.z_speed).await?;
            }
        }
        self.xy_locked(point.x, point.y, speed).await
    }

    /// Home Z first, then X and Y together
    pub async fn home_all(&self) -> Result<(), MachineError> {
        let _guard = self.motion_lock.lock().await;
        self.ensure_not_halted()?;
        tracing::info!("Homing all axes");
        self.z.home().await?;
        let (first, second) = self.joint(self.x.home(), self.y.home()).await;
        self.settle_joint(first, second).await?;
        tracing::info!("All axes homed");
        Ok(())
    }

    /// Stop all three axes concurrently
    ///
    /// Never waits for the motion lock, so it interrupts a move in flight.
    /// Latches motion off until [`Manipulator::release_halt`]. Any axis
    /// that cannot be stopped is escalated as a fatal fault.
    pub async fn emergency_stop(&self) -> Result<(), FaultEscalation> {
        self.latch_halt();
        tracing::warn!("Emergency stop");
        let (x, y, z) = tokio::join!(self.x.stop(), self.y.stop(), self.z.stop());
        let failures: Vec<StopFailure> = [x, y, z].into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            return Ok(());
        }
        Err(self.escalate(failures))
    }

    fn ensure_not_halted(&self) -> Result<(), MachineError> {
        if self.is_halted() {
            Err(MachineError::Halted)
        } else {
            Ok(())
        }
    }

    async fn xy_locked(&self, x: f64, y: f64, speed: f64) -> Result<(), MachineError> {
        let dx = x - self.x.poll_status().position;
        let dy = y - self.y.poll_status().position;
        let move_x = dx.abs() >= self.config.skip_epsilon;
        let move_y = dy.abs() >= self.config.skip_epsilon;
        let distance = dx.hypot(dy);

        match (move_x, move_y) {
            (false, false) => Ok(()),
            (true, false) => Ok(self.x.move_to(x, speed).await?),
            (false, true) => Ok(self.y.move_to(y, speed).await?),
            (true, true) => {
                let speed_x = self.axis_speed(speed, dx, distance);
                let speed_y = self.axis_speed(speed, dy, distance);
                let (first, second) = self
                    .joint(self.x.move_to(x, speed_x), self.y.move_to(y, speed_y))
                    .await;
                self.settle_joint(first, second).await
            }
        }
    }

    fn axis_speed(&self, speed: f64, delta: f64, distance: f64) -> f64 {
        let limits = self.x.config().speed_limits;
        (speed * delta.abs() / distance).max(limits.min_axis_speed)
    }

    /// Run an X and a Y future together, stopping the survivor as soon as
    /// one of them fails. Results come back in completion order.
    async fn joint<FX, FY>(&self, x: FX, y: FY) -> (JointResult, JointResult)
    where
        FX: Future<Output = Result<(), MotionError>>,
        FY: Future<Output = Result<(), MotionError>>,
    {
        tokio::pin!(x, y);
        let first = tokio::select! {
            result = &mut x => (Axis::X, result),
            result = &mut y => (Axis::Y, result),
        };
        let (first_axis, first_result) = first;
        let other = match first_axis {
            Axis::X => Axis::Y,
            _ => Axis::X,
        };

        let (other_result, stop) = match (&first_result, other) {
            (Ok(()), Axis::Y) => ((&mut y).await, None),
            (Ok(()), _) => ((&mut x).await, None),
            (Err(_), Axis::Y) => {
                let (result, stop) = tokio::join!(&mut y, self.y.stop());
                (result, Some(stop))
            }
            (Err(_), _) => {
                let (result, stop) = tokio::join!(&mut x, self.x.stop());
                (result, Some(stop))
            }
        };

        (
            JointResult {
                axis: first_axis,
                result: first_result,
                stop: None,
            },
            JointResult {
                axis: other,
                result: other_result,
                stop,
            },
        )
    }

    /// Turn the two joint outcomes into one result, stopping a succeeded
    /// axis when its partner failed last
    async fn settle_joint(
        &self,
        first: JointResult,
        second: JointResult,
    ) -> Result<(), MachineError> {
        let (failed, survivor_stop) = match (first.result, second.result) {
            (Ok(()), Ok(())) => return Ok(()),
            (Err(err), _) => ((first.axis, err), second.stop),
            (Ok(()), Err(err)) => {
                let survivor = self.axis(first.axis);
                ((second.axis, err), Some(survivor.stop().await))
            }
        };
        let (failed_axis, source) = failed;
        if self.is_halted() && matches!(source, MotionError::Stopped { .. }) {
            return Err(MachineError::Halted);
        }

        tracing::error!("Partial XY move: {} axis failed: {}", failed_axis, source);
        self.events.emit(TelemetryEvent::Fault {
            axis: Some(failed_axis),
            kind: FaultKind::PartialMove,
            message: source.to_string(),
        });

        if let Some(Err(stop_failure)) = survivor_stop {
            self.latch_halt();
            return Err(self.escalate(vec![stop_failure]).into());
        }
        Err(PartialMoveError {
            failed_axis,
            source,
        }
        .into())
    }

    fn escalate(&self, failures: Vec<StopFailure>) -> FaultEscalation {
        let escalation = FaultEscalation { failures };
        tracing::error!("{}", escalation);
        self.events.emit(TelemetryEvent::Fault {
            axis: None,
            kind: FaultKind::StopFailed,
            message: escalation.to_string(),
        });
        escalation
    }
}

impl std::fmt::Debug for Manipulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manipulator")
            .field("position", &self.current_position())
            .field("halted", &self.is_halted())
            .field("config", &self.config)
            .finish()
    }
}

struct JointResult {
    axis: Axis,
    result: Result<(), MotionError>,
    stop: Option<Result<(), StopFailure>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManipulatorConfig::default();
        assert_eq!(config.skip_epsilon, 4e-4);
        assert!(config.z_speed > 0.0);
    }
}
