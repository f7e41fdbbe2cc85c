//! # DepoKit Communication
//!
//! Field-bus sessions to the stepper controllers and the per-axis
//! controller client built on top of them.
//! - `fieldbus`: the request/response seam, Modbus TCP and a simulated bus
//! - `registers`: the controller register map and word codecs
//! - `axis`: connection lifecycle, moves, stops, homing and status polling

pub mod axis;
pub mod fieldbus;
pub mod registers;

pub use axis::{AxisController, AxisControllerConfig, Backoff, MAX_MULTIPLIER, ReconnectPolicy};
pub use fieldbus::{
    modbus::{ModbusTcpConnector, ModbusTcpSession},
    simulation::{SimulatedConnector, SimulatedController, SimulatedFaults},
    BusConnector, BusEndpoint, BusError, FieldBus,
};
pub use registers::{MoveType, StatusWord};
