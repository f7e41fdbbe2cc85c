//! # Telemetry Event Bus
//!
//! Publish/subscribe channel carrying position updates, command events,
//! executor state changes and faults out of the motion core:
//! - Producers emit typed events without knowing subscribers
//! - Subscribers filter by category
//! - Supports both synchronous handlers and async broadcast receivers
//!
//! ## Usage
//!
//! ```rust
//! use depokit_core::event_bus::{EventBus, EventCategory, EventFilter, TelemetryEvent};
//! use depokit_core::Axis;
//!
//! let bus = EventBus::new();
//! let id = bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Position]),
//!     |event| {
//!         if let TelemetryEvent::PositionUpdated { axis, value } = event {
//!             println!("{} at {}", axis, value);
//!         }
//!     },
//! );
//! bus.emit(TelemetryEvent::PositionUpdated { axis: Axis::X, value: 1.5 });
//! bus.unsubscribe(id);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
