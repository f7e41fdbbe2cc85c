//! Simulated controllers
//!
//! A register-level model of the stepper controller: trigger pulses start
//! and stop constant-speed moves whose progress is derived from elapsed
//! time, so `tokio::time::pause` drives it deterministically. Faults can be
//! injected to exercise timeout, stall and link-loss paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{BusConnector, BusEndpoint, BusError, FieldBus};
use crate::registers::{self, MoveType, StatusWord};

const IN_POSITION_TOLERANCE: f64 = 1e-3;

/// Injectable misbehaviour
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatedFaults {
    /// Refuse connections and fail every transaction
    pub offline: bool,
    /// Moves start but make no progress
    pub stall: bool,
    /// START pulses are ignored
    pub ignore_start: bool,
    /// STOP pulses are ignored
    pub ignore_stop: bool,
    /// Value reported in ERROR_CODE
    pub error_code: u16,
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    from: f64,
    to: f64,
    speed: f64,
    started: Instant,
}

#[derive(Debug)]
struct SimState {
    registers: HashMap<u16, u16>,
    position: f64,
    target: f64,
    motion: Option<Motion>,
    faults: SimulatedFaults,
    home_speed: f64,
    last_speed: Option<f64>,
    starts: u32,
    stops: u32,
    homes: u32,
    connects: u32,
}

impl SimState {
    fn advance(&mut self, now: Instant) {
        let Some(motion) = self.motion else {
            return;
        };
        if self.faults.stall {
            return;
        }
        let distance = motion.to - motion.from;
        let travelled = motion.speed * now.duration_since(motion.started).as_secs_f64();
        if travelled >= distance.abs() {
            self.position = motion.to;
            self.motion = None;
        } else {
            self.position = motion.from + travelled.copysign(distance);
        }
    }

    fn register_pair(&self, address: u16) -> f64 {
        let lo = self.registers.get(&address).copied().unwrap_or(0);
        let hi = self.registers.get(&(address + 1)).copied().unwrap_or(0);
        registers::decode_f32([lo, hi])
    }

    fn begin_motion(&mut self, to: f64, speed: f64, now: Instant) {
        self.target = to;
        self.last_speed = Some(speed);
        if speed <= 0.0 || (to - self.position).abs() < f64::EPSILON {
            self.position = to;
            self.motion = None;
            return;
        }
        self.motion = Some(Motion {
            from: self.position,
            to,
            speed,
            started: now,
        });
    }

    fn status(&self) -> StatusWord {
        let mut word = 0;
        if self.motion.is_some() {
            word |= StatusWord::RUNNING;
        } else if (self.position - self.target).abs() <= IN_POSITION_TOLERANCE {
            word |= StatusWord::IN_POSITION;
        }
        StatusWord(word)
    }

    fn write(&mut self, address: u16, value: u16, now: Instant) {
        self.advance(now);
        self.registers.insert(address, value);
        if value != 1 {
            return;
        }
        match address {
            registers::START => {
                self.starts += 1;
                if self.faults.ignore_start {
                    return;
                }
                let target = self.register_pair(registers::TARGET_POSITION);
                let speed = self.register_pair(registers::TARGET_SPEED);
                let relative = self.registers.get(&registers::MOVE_TYPE).copied()
                    == Some(MoveType::Relative.into());
                let to = if relative {
                    self.position + target
                } else {
                    target
                };
                self.begin_motion(to, speed, now);
            }
            registers::STOP => {
                self.stops += 1;
                if !self.faults.ignore_stop {
                    self.motion = None;
                    self.target = self.position;
                }
            }
            registers::HOME => {
                self.homes += 1;
                let speed = self.home_speed;
                self.begin_motion(0.0, speed, now);
            }
            registers::CLEAR_ERROR => self.faults.error_code = 0,
            _ => {}
        }
    }

    fn read(&mut self, address: u16, count: u16, now: Instant) -> Vec<u16> {
        self.advance(now);
        let position = registers::encode_f32(self.position);
        (address..address.saturating_add(count))
            .map(|a| match a {
                registers::STATUS => self.status().0,
                registers::ACTUAL_POSITION => position[0],
                a if a == registers::ACTUAL_POSITION + 1 => position[1],
                registers::ERROR_CODE => self.faults.error_code,
                other => self.registers.get(&other).copied().unwrap_or(0),
            })
            .collect()
    }
}

/// One simulated controller, cheap to clone and shared with its sessions
#[derive(Debug, Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedController {
    /// Controller at position 0
    pub fn new() -> Self {
        Self::with_position(0.0)
    }

    /// Controller at a given position
    pub fn with_position(position: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                registers: HashMap::new(),
                position,
                target: position,
                motion: None,
                faults: SimulatedFaults::default(),
                home_speed: 1.0,
                last_speed: None,
                starts: 0,
                stops: 0,
                homes: 0,
                connects: 0,
            })),
        }
    }

    /// Set the speed of the homing run
    pub fn set_home_speed(&self, speed: f64) {
        self.state.lock().home_speed = speed;
    }

    /// Current position
    pub fn position(&self) -> f64 {
        let mut state = self.state.lock();
        state.advance(Instant::now());
        state.position
    }

    /// Whether a move is in progress
    pub fn is_running(&self) -> bool {
        let mut state = self.state.lock();
        state.advance(Instant::now());
        state.motion.is_some()
    }

    /// Replace the injected faults
    pub fn set_faults(&self, faults: SimulatedFaults) {
        self.state.lock().faults = faults;
    }

    /// Modify the injected faults in place
    pub fn update_faults(&self, f: impl FnOnce(&mut SimulatedFaults)) {
        f(&mut self.state.lock().faults);
    }

    /// Speed of the most recently started move
    pub fn last_speed(&self) -> Option<f64> {
        self.state.lock().last_speed
    }

    /// Number of START pulses seen
    pub fn start_count(&self) -> u32 {
        self.state.lock().starts
    }

    /// Number of STOP pulses seen
    pub fn stop_count(&self) -> u32 {
        self.state.lock().stops
    }

    /// Number of HOME pulses seen
    pub fn home_count(&self) -> u32 {
        self.state.lock().homes
    }

    /// Number of sessions opened
    pub fn connect_count(&self) -> u32 {
        self.state.lock().connects
    }

    /// Raw value of a stored register
    pub fn register(&self, address: u16) -> Option<u16> {
        self.state.lock().registers.get(&address).copied()
    }

    fn offline(&self) -> bool {
        self.state.lock().faults.offline
    }
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

struct SimulatedSession {
    controller: SimulatedController,
    latency: Duration,
}

impl SimulatedSession {
    async fn round_trip(&self) -> Result<(), BusError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.controller.offline() {
            return Err(BusError::Io {
                reason: "simulated link down".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FieldBus for SimulatedSession {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, BusError> {
        self.round_trip().await?;
        Ok(self
            .controller
            .state
            .lock()
            .read(address, count, Instant::now()))
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), BusError> {
        self.round_trip().await?;
        self.controller
            .state
            .lock()
            .write(address, value, Instant::now());
        Ok(())
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), BusError> {
        self.round_trip().await?;
        let now = Instant::now();
        let mut state = self.controller.state.lock();
        for (offset, value) in values.iter().enumerate() {
            state.write(address + offset as u16, *value, now);
        }
        Ok(())
    }
}

/// Connector serving simulated controllers by slave id
#[derive(Debug, Clone, Default)]
pub struct SimulatedConnector {
    controllers: HashMap<u8, SimulatedController>,
    latency: Duration,
}

impl SimulatedConnector {
    /// Connector with no controllers attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a controller under a slave id
    pub fn with_controller(mut self, slave_id: u8, controller: SimulatedController) -> Self {
        self.controllers.insert(slave_id, controller);
        self
    }

    /// Delay every transaction by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Controller attached under a slave id
    pub fn controller(&self, slave_id: u8) -> Option<&SimulatedController> {
        self.controllers.get(&slave_id)
    }
}

#[async_trait]
impl BusConnector for SimulatedConnector {
    async fn connect(&self, endpoint: &BusEndpoint) -> Result<Box<dyn FieldBus>, BusError> {
        let controller = self
            .controllers
            .get(&endpoint.slave_id)
            .ok_or_else(|| BusError::Io {
                reason: format!("no simulated unit {}", endpoint.slave_id),
            })?;
        if controller.offline() {
            return Err(BusError::Io {
                reason: "connection refused".into(),
            });
        }
        controller.state.lock().connects += 1;
        Ok(Box::new(SimulatedSession {
            controller: controller.clone(),
            latency: self.latency,
        }))
    }
}
