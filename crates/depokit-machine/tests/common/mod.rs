#![allow(dead_code)]

use depokit_communication::{
    AxisController, AxisControllerConfig, BusEndpoint, SimulatedConnector, SimulatedController,
};
use depokit_core::{
    Axis, Command, EventBus, EventBusConfig, MoveKind, Point, Recipe, RecipeMetadata,
};
use depokit_machine::{AxisEndpoints, Manipulator, ManipulatorConfig};
use std::sync::Arc;
use std::time::Duration;

pub struct Rig {
    pub x: SimulatedController,
    pub y: SimulatedController,
    pub z: SimulatedController,
    pub events: Arc<EventBus>,
    pub manipulator: Arc<Manipulator>,
}

impl Rig {
    pub fn sim(&self, axis: Axis) -> &SimulatedController {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

pub fn endpoints() -> AxisEndpoints {
    AxisEndpoints {
        x: BusEndpoint::new("sim", 502, 1),
        y: BusEndpoint::new("sim", 502, 2),
        z: BusEndpoint::new("sim", 502, 3),
    }
}

/// Move deadline of `|d| / speed + 3 s`
pub fn axis_config() -> AxisControllerConfig {
    AxisControllerConfig {
        timeout_margin: Duration::from_secs(3),
        timeout_factor: 1.0,
        ..Default::default()
    }
}

pub async fn rig() -> Rig {
    let x = SimulatedController::new();
    let y = SimulatedController::new();
    let z = SimulatedController::new();
    let connector = Arc::new(
        SimulatedConnector::new()
            .with_controller(1, x.clone())
            .with_controller(2, y.clone())
            .with_controller(3, z.clone()),
    );
    let events = Arc::new(EventBus::with_config(EventBusConfig {
        history_size: 100_000,
        history_retention: Duration::from_secs(24 * 3600),
        ..Default::default()
    }));
    let client = |axis| {
        Arc::new(AxisController::new(
            axis,
            connector.clone(),
            axis_config(),
            Arc::clone(&events),
        ))
    };
    let manipulator = Arc::new(Manipulator::new(
        client(Axis::X),
        client(Axis::Y),
        client(Axis::Z),
        ManipulatorConfig::default(),
        Arc::clone(&events),
    ));
    manipulator.connect_all(&endpoints()).await.unwrap();
    Rig {
        x,
        y,
        z,
        events,
        manipulator,
    }
}

pub fn travel(x: f64, y: f64) -> Command {
    Command::Move {
        to: Point::new(x, y),
        kind: MoveKind::Travel,
        speed: 0.5,
    }
}

pub fn print(x: f64, y: f64, speed: f64) -> Command {
    Command::Move {
        to: Point::new(x, y),
        kind: MoveKind::Print,
        speed,
    }
}

pub fn recipe(commands: Vec<Command>) -> Recipe {
    Recipe::new(
        commands,
        RecipeMetadata {
            source: Some("test".into()),
            path_count: 1,
            vertex_count: 0,
            bounding_box: None,
            nozzle_offset: 0.0,
            print_speed: 0.5,
            travel_speed: 0.5,
            stop_and_go: false,
        },
    )
}
