//! Axis Controller Client
//!
//! Owns the field-bus session to one stepper controller. Every bus
//! transaction takes the session lock for its own duration only, so a
//! `stop()` can interleave with a move that is waiting for completion.
//!
//! The authoritative [`AxisState`] lives in a `watch` channel written only
//! by this client; readers get snapshots via [`AxisController::poll_status`]
//! or a subscription. A background monitor refreshes it at a fixed interval
//! and reconnects a dropped session with exponential backoff.

mod reconnect;

pub use reconnect::{Backoff, MAX_MULTIPLIER, ReconnectPolicy};

use depokit_core::{
    Axis, AxisFault, AxisState, BusRecord, ConnError, EventBus, FaultKind, MotionError,
    SpeedLimits, StopFailure, TelemetryEvent,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::fieldbus::{BusConnector, BusEndpoint, FieldBus};
use crate::registers::{self, MoveType, StatusWord};

const POSITION_REPORT_EPSILON: f64 = 1e-6;

/// Timing and tolerance settings of one axis client
#[derive(Debug, Clone)]
pub struct AxisControllerConfig {
    /// Background status poll interval
    pub poll_interval: Duration,
    /// Status poll interval while waiting for a move to finish
    pub completion_poll: Duration,
    /// Fixed part of the move deadline
    pub timeout_margin: Duration,
    /// Multiplier on the nominal travel time in the move deadline
    pub timeout_factor: f64,
    /// Deadline for a homing run
    pub home_timeout: Duration,
    /// Distance from target accepted as arrived, in mm
    pub in_position_tolerance: f64,
    /// How long a move may take to raise the running flag
    pub running_bit_timeout: Duration,
    /// How long trigger registers are held high
    pub pulse_hold: Duration,
    /// How long to wait for a trigger register to read back clear
    pub pulse_clear_timeout: Duration,
    /// Controller speed envelope
    pub speed_limits: SpeedLimits,
    /// Reconnect schedule
    pub reconnect: ReconnectPolicy,
    /// Publish every bus transaction as telemetry
    pub log_bus_traffic: bool,
}

impl Default for AxisControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            completion_poll: Duration::from_millis(50),
            timeout_margin: Duration::from_secs(5),
            timeout_factor: 1.5,
            home_timeout: Duration::from_secs(120),
            in_position_tolerance: 2e-3,
            running_bit_timeout: Duration::from_secs(2),
            pulse_hold: Duration::from_millis(50),
            pulse_clear_timeout: Duration::from_secs(1),
            speed_limits: SpeedLimits::default(),
            reconnect: ReconnectPolicy::default(),
            log_bus_traffic: false,
        }
    }
}

impl AxisControllerConfig {
    /// Deadline for a move of `distance` mm at `speed` mm/s
    pub fn move_timeout(&self, distance: f64, speed: f64) -> Duration {
        let nominal = if speed > 0.0 {
            distance.abs() / speed
        } else {
            0.0
        };
        Duration::try_from_secs_f64(nominal * self.timeout_factor)
            .unwrap_or(Duration::MAX)
            .saturating_add(self.timeout_margin)
    }
}

#[derive(Debug, Clone, Copy)]
enum BusOp<'a> {
    Read { address: u16, count: u16 },
    Write { address: u16, value: u16 },
    WriteMany { address: u16, values: &'a [u16] },
}

impl BusOp<'_> {
    fn address(&self) -> u16 {
        match self {
            BusOp::Read { address, .. }
            | BusOp::Write { address, .. }
            | BusOp::WriteMany { address, .. } => *address,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            BusOp::Read { .. } => "read",
            BusOp::Write { .. } | BusOp::WriteMany { .. } => "write",
        }
    }
}

/// Client for one axis controller
pub struct AxisController {
    axis: Axis,
    config: AxisControllerConfig,
    connector: Arc<dyn BusConnector>,
    events: Arc<EventBus>,
    endpoint: RwLock<Option<BusEndpoint>>,
    session: Mutex<Option<Box<dyn FieldBus>>>,
    state: watch::Sender<AxisState>,
    stop_generation: AtomicU64,
    in_flight: AtomicBool,
    monitor_task: RwLock<Option<JoinHandle<()>>>,
    monitor_shutdown: RwLock<Option<watch::Sender<bool>>>,
}

impl AxisController {
    /// Create a disconnected client
    pub fn new(
        axis: Axis,
        connector: Arc<dyn BusConnector>,
        config: AxisControllerConfig,
        events: Arc<EventBus>,
    ) -> Self {
        let (state, _) = watch::channel(AxisState::new(axis));
        Self {
            axis,
            config,
            connector,
            events,
            endpoint: RwLock::new(None),
            session: Mutex::new(None),
            state,
            stop_generation: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            monitor_task: RwLock::new(None),
            monitor_shutdown: RwLock::new(None),
        }
    }

    /// Axis driven by this client
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Client configuration
    pub fn config(&self) -> &AxisControllerConfig {
        &self.config
    }

    /// Last known state; never performs bus I/O
    pub fn poll_status(&self) -> AxisState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<AxisState> {
        self.state.subscribe()
    }

    /// Whether the session is up
    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    /// Endpoint of the last connect call
    pub fn endpoint(&self) -> Option<BusEndpoint> {
        self.endpoint.read().clone()
    }

    /// Establish the bus session
    ///
    /// Zeroes backlash compensation and reads the initial position. The
    /// endpoint is remembered for background reconnects.
    pub async fn connect(&self, endpoint: BusEndpoint) -> Result<(), ConnError> {
        *self.endpoint.write() = Some(endpoint.clone());
        self.open_session(&endpoint).await
    }

    /// Connect, retrying with the configured backoff until success,
    /// exhaustion of the attempt budget, or cancellation
    pub async fn connect_with_retry(
        &self,
        endpoint: BusEndpoint,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), ConnError> {
        let mut backoff = self.config.reconnect.backoff();
        loop {
            if *cancel.borrow() {
                return Err(ConnError::Cancelled);
            }
            let err = match self.connect(endpoint.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            let Some(delay) = backoff.next() else {
                return Err(err);
            };
            tracing::warn!(
                "{} axis: {} (attempt {}), retrying in {} ms",
                self.axis,
                err,
                backoff.attempts(),
                delay.as_millis()
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Err(ConnError::Cancelled);
                    }
                }
            }
        }
    }

    /// Close the session and forget the endpoint
    pub async fn disconnect(&self) {
        self.stop_monitor();
        *self.endpoint.write() = None;
        self.session.lock().await.take();
        let was_connected = self.state.borrow().connected;
        self.state.send_modify(|s| {
            s.connected = false;
            s.moving = false;
        });
        if was_connected {
            tracing::info!("{} axis disconnected", self.axis);
            self.events.emit(TelemetryEvent::ConnectionChanged {
                axis: self.axis,
                connected: false,
            });
        }
    }

    /// Move to an absolute position at `speed` mm/s
    ///
    /// Resolves when the controller reports in-position at the target, or
    /// fails on timeout, stop, or connection loss.
    pub async fn move_to(&self, position: f64, speed: f64) -> Result<(), MotionError> {
        self.run_move(MoveType::Absolute, position, position, speed)
            .await
    }

    /// Move by a distance relative to the current position
    pub async fn move_by(&self, distance: f64, speed: f64) -> Result<(), MotionError> {
        let target = self.poll_status().position + distance;
        self.run_move(MoveType::Relative, distance, target, speed)
            .await
    }

    /// Run the controller's homing sequence; sets position to 0 on success
    pub async fn home(&self) -> Result<(), MotionError> {
        let generation = self.stop_generation.load(Ordering::SeqCst);
        self.in_flight.store(true, Ordering::SeqCst);
        let result = self.run_home(generation).await;
        self.in_flight.store(false, Ordering::SeqCst);
        if result.is_ok() {
            self.state.send_modify(|s| {
                s.position = 0.0;
                s.target = 0.0;
            });
            tracing::info!("{} axis homed", self.axis);
        }
        result
    }

    /// Decelerate and halt immediately
    ///
    /// Always attempted, reconnecting first if the session is gone.
    /// Succeeds only once the controller reports it is no longer running.
    pub async fn stop(&self) -> Result<(), StopFailure> {
        let axis = self.axis;
        self.stop_generation.fetch_add(1, Ordering::SeqCst);

        if self.session.lock().await.is_none() {
            if let Some(endpoint) = self.endpoint() {
                if let Err(err) = self.open_session(&endpoint).await {
                    tracing::warn!("{} axis: reconnect for stop failed: {}", axis, err);
                }
            }
        }

        if let Err(source) = self.pulse(registers::STOP).await {
            tracing::error!("{} axis stop not delivered: {}", axis, source);
            self.record_fault(AxisFault::StopFailed, format!("stop not delivered: {}", source));
            return Err(StopFailure::Unreachable { axis, source });
        }

        let started = Instant::now();
        let deadline = started + self.config.poll_interval;
        loop {
            match self.read_status().await {
                Ok((status, position)) => {
                    self.apply_reading(status, position);
                    if !status.running() {
                        self.state.send_modify(|s| {
                            s.moving = false;
                            s.target = position;
                        });
                        tracing::debug!("{} axis stopped at {:.4}", axis, position);
                        return Ok(());
                    }
                }
                Err(source) => {
                    tracing::error!("{} axis stop not confirmed: {}", axis, source);
                    self.record_fault(
                        AxisFault::StopFailed,
                        format!("stop not confirmed: {}", source),
                    );
                    return Err(StopFailure::Unreachable { axis, source });
                }
            }
            let now = Instant::now();
            if now >= deadline {
                let waited_ms = now.duration_since(started).as_millis() as u64;
                tracing::error!("{} axis still running {} ms after stop", axis, waited_ms);
                self.record_fault(AxisFault::StopFailed, "axis did not settle".into());
                return Err(StopFailure::DidNotSettle { axis, waited_ms });
            }
            tokio::time::sleep(self.config.completion_poll.min(deadline - now)).await;
        }
    }

    /// Re-read status and position, clearing a recorded fault
    pub async fn requery(&self) -> Result<AxisState, ConnError> {
        let (status, position) = self.read_status().await?;
        self.apply_reading(status, position);
        self.state.send_modify(|s| {
            s.connected = true;
            s.last_error = None;
            if !status.running() {
                s.target = position;
            }
        });
        Ok(self.poll_status())
    }

    /// One status refresh, as done by the background monitor
    pub async fn poll_once(&self) -> Result<AxisState, ConnError> {
        let (status, position) = self.read_status().await?;
        self.apply_reading(status, position);
        Ok(self.poll_status())
    }

    /// Controller error register
    pub async fn error_code(&self) -> Result<u16, ConnError> {
        let words = self
            .transact(BusOp::Read {
                address: registers::ERROR_CODE,
                count: 1,
            })
            .await?;
        Ok(words.first().copied().unwrap_or(0))
    }

    /// Clear the controller error register
    pub async fn clear_error(&self) -> Result<(), ConnError> {
        self.pulse(registers::CLEAR_ERROR).await
    }

    /// Start the background status monitor
    ///
    /// Replaces a running monitor. The monitor reconnects a dropped session
    /// on its own but never resumes motion.
    pub fn start_monitor(self: &Arc<Self>) {
        self.stop_monitor();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.monitor_loop(&mut shutdown_rx).await;
        });
        *self.monitor_task.write() = Some(handle);
        *self.monitor_shutdown.write() = Some(shutdown_tx);
    }

    /// Stop the background monitor
    pub fn stop_monitor(&self) {
        if let Some(tx) = self.monitor_shutdown.write().take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.monitor_task.write().take() {
            handle.abort();
        }
    }

    /// Whether a monitor task is running
    pub fn monitor_running(&self) -> bool {
        self.monitor_task
            .read()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn monitor_loop(&self, shutdown: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            if self.is_connected() {
                if let Err(err) = self.poll_once().await {
                    tracing::debug!("{} axis poll failed: {}", self.axis, err);
                }
            } else if let Some(endpoint) = self.endpoint() {
                tracing::info!("{} axis reconnecting to {}", self.axis, endpoint);
                if let Err(ConnError::Cancelled) =
                    self.connect_with_retry(endpoint, shutdown).await
                {
                    break;
                }
            }
        }
        tracing::debug!("{} axis monitor stopped", self.axis);
    }

    async fn open_session(&self, endpoint: &BusEndpoint) -> Result<(), ConnError> {
        let bus = self
            .connector
            .connect(endpoint)
            .await
            .map_err(|err| ConnError::ConnectFailed {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            })?;
        *self.session.lock().await = Some(bus);

        if let Err(err) = self
            .transact(BusOp::WriteMany {
                address: registers::BACKLASH,
                values: &registers::encode_f32(0.0),
            })
            .await
        {
            if err.is_session_loss() {
                return Err(err);
            }
            tracing::warn!("{} axis: could not clear backlash: {}", self.axis, err);
        }

        let (status, position) = self.read_status().await?;
        self.state.send_modify(|s| {
            s.connected = true;
            s.position = position;
            s.moving = status.running();
            if !s.moving {
                s.target = position;
            }
            if s.last_error == Some(AxisFault::ConnectionLost) {
                s.last_error = None;
            }
        });
        tracing::info!(
            "{} axis connected to {} at {:.4} mm",
            self.axis,
            endpoint,
            position
        );
        self.events.emit(TelemetryEvent::ConnectionChanged {
            axis: self.axis,
            connected: true,
        });
        self.events.emit(TelemetryEvent::PositionUpdated {
            axis: self.axis,
            value: position,
        });
        Ok(())
    }

    async fn run_move(
        &self,
        move_type: MoveType,
        register_target: f64,
        target: f64,
        speed: f64,
    ) -> Result<(), MotionError> {
        let axis = self.axis;
        let axis_speed = self.config.speed_limits.clamp_axis_speed(speed);
        if axis_speed <= 0.0 {
            return Err(MotionError::InvalidSpeed { axis, speed });
        }
        if !self.is_connected() {
            return Err(MotionError::Connection {
                axis,
                source: ConnError::NotConnected,
            });
        }

        let generation = self.stop_generation.load(Ordering::SeqCst);
        self.in_flight.store(true, Ordering::SeqCst);
        let result = self
            .dispatch_move(move_type, register_target, target, axis_speed, generation)
            .await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn dispatch_move(
        &self,
        move_type: MoveType,
        register_target: f64,
        target: f64,
        axis_speed: f64,
        generation: u64,
    ) -> Result<(), MotionError> {
        let start = self.poll_status().position;
        let fail = |source| self.connection_failure(source);

        self.energize().await.map_err(fail)?;
        self.transact(BusOp::Write {
            address: registers::MOVE_TYPE,
            value: move_type.into(),
        })
        .await
        .map_err(fail)?;
        self.transact(BusOp::WriteMany {
            address: registers::TARGET_POSITION,
            values: &registers::encode_f32(register_target),
        })
        .await
        .map_err(fail)?;
        self.transact(BusOp::WriteMany {
            address: registers::TARGET_SPEED,
            values: &registers::encode_f32(axis_speed),
        })
        .await
        .map_err(fail)?;

        if self.stop_generation.load(Ordering::SeqCst) != generation {
            return Err(self.interrupted());
        }
        self.state.send_modify(|s| {
            s.target = target;
            s.moving = true;
            s.last_error = None;
        });
        tracing::debug!(
            "{} axis move {:.4} -> {:.4} at {} mm/s",
            self.axis,
            start,
            target,
            axis_speed
        );
        self.pulse(registers::START).await.map_err(fail)?;

        let timeout = self.config.move_timeout(target - start, axis_speed);
        self.await_completion(target, timeout, generation).await
    }

    async fn run_home(&self, generation: u64) -> Result<(), MotionError> {
        let fail = |source| self.connection_failure(source);
        self.energize().await.map_err(fail)?;
        if self.stop_generation.load(Ordering::SeqCst) != generation {
            return Err(self.interrupted());
        }
        self.state.send_modify(|s| {
            s.target = 0.0;
            s.moving = true;
            s.last_error = None;
        });
        self.pulse(registers::HOME).await.map_err(fail)?;
        self.await_completion(0.0, self.config.home_timeout, generation)
            .await
    }

    async fn await_completion(
        &self,
        target: f64,
        timeout: Duration,
        generation: u64,
    ) -> Result<(), MotionError> {
        let axis = self.axis;
        let started = Instant::now();
        let deadline = started + timeout;
        let mut seen_running = false;

        loop {
            if self.stop_generation.load(Ordering::SeqCst) != generation {
                // a start pulse may have raced the stop; repeat it
                if let Err(err) = self.pulse(registers::STOP).await {
                    tracing::warn!("{} axis: repeat stop failed: {}", axis, err);
                }
                return Err(self.interrupted());
            }

            let (status, position) = self
                .read_status()
                .await
                .map_err(|source| self.connection_failure(source))?;
            self.apply_reading(status, position);

            if status.in_position()
                && !status.running()
                && (position - target).abs() <= self.config.in_position_tolerance
            {
                self.state.send_modify(|s| {
                    s.moving = false;
                    s.position = position;
                });
                return Ok(());
            }
            seen_running |= status.running();

            let now = Instant::now();
            if !seen_running
                && !status.running()
                && now.duration_since(started) >= self.config.running_bit_timeout
            {
                let error_code = self.error_code().await.unwrap_or(0);
                self.state.send_modify(|s| s.moving = false);
                self.record_fault(
                    AxisFault::NeverStarted { error_code },
                    format!("motion never started, error code {}", error_code),
                );
                return Err(MotionError::NeverStarted { axis, error_code });
            }

            if now >= deadline {
                let timeout_ms = timeout.as_millis() as u64;
                if let Err(err) = self.pulse(registers::STOP).await {
                    tracing::warn!("{} axis: stop after timeout failed: {}", axis, err);
                }
                self.state.send_modify(|s| s.moving = false);
                self.record_fault(
                    AxisFault::Timeout,
                    format!("no completion within {} ms, at {:.4}", timeout_ms, position),
                );
                return Err(MotionError::Timeout { axis, timeout_ms });
            }

            tokio::time::sleep(self.config.completion_poll.min(deadline - now)).await;
        }
    }

    fn interrupted(&self) -> MotionError {
        self.state.send_modify(|s| {
            s.moving = false;
            s.last_error = Some(AxisFault::Stopped);
        });
        tracing::debug!("{} axis move interrupted by stop", self.axis);
        MotionError::Stopped { axis: self.axis }
    }

    fn connection_failure(&self, source: ConnError) -> MotionError {
        self.state.send_modify(|s| s.moving = false);
        MotionError::Connection {
            axis: self.axis,
            source,
        }
    }

    async fn energize(&self) -> Result<(), ConnError> {
        match self
            .transact(BusOp::Write {
                address: registers::MOTOR_ON,
                value: 1,
            })
            .await
        {
            Err(err) if !err.is_session_loss() => {
                tracing::warn!("{} axis: motor on rejected: {}", self.axis, err);
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    /// Write 1, hold, write 0, then wait for the register to read back clear
    async fn pulse(&self, address: u16) -> Result<(), ConnError> {
        self.transact(BusOp::Write { address, value: 1 }).await?;
        tokio::time::sleep(self.config.pulse_hold).await;
        self.transact(BusOp::Write { address, value: 0 }).await?;

        let deadline = Instant::now() + self.config.pulse_clear_timeout;
        loop {
            let words = self.transact(BusOp::Read { address, count: 1 }).await?;
            if words.first().copied().unwrap_or(0) == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    "{} axis: {} did not read back clear",
                    self.axis,
                    registers::name(address)
                );
                return Ok(());
            }
            tokio::time::sleep(self.config.completion_poll).await;
        }
    }

    async fn read_status(&self) -> Result<(StatusWord, f64), ConnError> {
        let words = self
            .transact(BusOp::Read {
                address: registers::STATUS,
                count: 3,
            })
            .await?;
        match words.as_slice() {
            [status, lo, hi, ..] => Ok((StatusWord(*status), registers::decode_f32([*lo, *hi]))),
            _ => Err(ConnError::Lost {
                reason: format!("short status read ({} words)", words.len()),
            }),
        }
    }

    fn apply_reading(&self, status: StatusWord, position: f64) {
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        let mut moved = false;
        self.state.send_if_modified(|s| {
            let moving = status.running() || in_flight;
            moved = (s.position - position).abs() > POSITION_REPORT_EPSILON;
            let changed = moved || s.moving != moving;
            s.position = position;
            s.moving = moving;
            changed
        });
        if moved {
            tracing::trace!("{} axis at {:.4}", self.axis, position);
            self.events.emit(TelemetryEvent::PositionUpdated {
                axis: self.axis,
                value: position,
            });
        }
    }

    async fn transact(&self, op: BusOp<'_>) -> Result<Vec<u16>, ConnError> {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else {
            return Err(ConnError::NotConnected);
        };
        let result = match op {
            BusOp::Read { address, count } => session.read_holding_registers(address, count).await,
            BusOp::Write { address, value } => session
                .write_single_register(address, value)
                .await
                .map(|()| vec![value]),
            BusOp::WriteMany { address, values } => session
                .write_multiple_registers(address, values)
                .await
                .map(|()| values.to_vec()),
        };

        match result {
            Ok(words) => {
                self.record_traffic(op.action(), op.address(), &words);
                Ok(words)
            }
            Err(err) => {
                let err = ConnError::from(err);
                self.record_traffic("error", op.address(), &[]);
                if err.is_session_loss() {
                    slot.take();
                    drop(slot);
                    self.mark_lost(&err);
                }
                Err(err)
            }
        }
    }

    fn mark_lost(&self, err: &ConnError) {
        let was_connected = self.state.borrow().connected;
        self.state.send_modify(|s| {
            s.connected = false;
            s.moving = false;
            s.last_error = Some(AxisFault::ConnectionLost);
        });
        if was_connected {
            tracing::warn!("{} axis connection lost: {}", self.axis, err);
            self.events.emit(TelemetryEvent::ConnectionChanged {
                axis: self.axis,
                connected: false,
            });
            self.events.emit(TelemetryEvent::Fault {
                axis: Some(self.axis),
                kind: FaultKind::ConnectionLost,
                message: err.to_string(),
            });
        }
    }

    fn record_fault(&self, fault: AxisFault, message: String) {
        self.state.send_modify(|s| s.last_error = Some(fault));
        tracing::warn!("{} axis fault: {}", self.axis, message);
        self.events.emit(TelemetryEvent::Fault {
            axis: Some(self.axis),
            kind: fault.into(),
            message,
        });
    }

    fn record_traffic(&self, action: &str, address: u16, words: &[u16]) {
        tracing::trace!(
            "{} axis {} {}({}) {:?}",
            self.axis,
            action,
            registers::name(address),
            address,
            words
        );
        if self.config.log_bus_traffic {
            self.events.emit(TelemetryEvent::BusTraffic(BusRecord::now(
                self.axis,
                action,
                format!("{}({})", registers::name(address), address),
                words.to_vec(),
            )));
        }
    }
}

impl std::fmt::Debug for AxisController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxisController")
            .field("axis", &self.axis)
            .field("endpoint", &self.endpoint())
            .field("state", &self.poll_status())
            .finish()
    }
}
