//! Runtime wiring
//!
//! Builds the event bus, the three axis clients, the coordinator, the
//! executor and the telemetry sink from a loaded [`Config`].

use depokit_communication::{
    AxisController, BusConnector, ModbusTcpConnector, SimulatedConnector, SimulatedController,
};
use depokit_core::{Axis, Command, ConnError, EventBus, EventBusConfig, Point, Recipe};
use depokit_machine::{
    AxisEndpoints, ExecutorConfig, Manipulator, ManipulatorConfig, PatternExecutor,
    TelemetrySink,
};
use depokit_recipe::{prepare_recipe, BuildOutput, ImportedGeometry, RecipeError};
use depokit_settings::Config;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Coordinator settings from the `motion` section
pub fn manipulator_config(config: &Config) -> ManipulatorConfig {
    ManipulatorConfig {
        skip_epsilon: config.motion.skip_epsilon,
        z_speed: config.motion.z_speed,
    }
}

/// Executor settings
pub fn executor_config(config: &Config) -> ExecutorConfig {
    ExecutorConfig {
        travel_speed: config.recipe.travel_speed,
        resync_tolerance: config.motion.resync_tolerance,
        workspace: config.workspace,
    }
}

/// Bus addresses of the three controllers
pub fn endpoints(config: &Config) -> AxisEndpoints {
    AxisEndpoints {
        x: config.bus.endpoint(Axis::X),
        y: config.bus.endpoint(Axis::Y),
        z: config.bus.endpoint(Axis::Z),
    }
}

/// Event bus sized by the `telemetry` section
pub fn event_bus(config: &Config) -> EventBus {
    EventBus::with_config(EventBusConfig {
        history_size: config.telemetry.history_size,
        history_retention: Duration::from_secs(config.telemetry.history_retention_secs),
        ..EventBusConfig::default()
    })
}

/// Import a drawing and build its recipe with the configured options
pub fn prepare(
    config: &Config,
    path: impl AsRef<Path>,
) -> Result<(ImportedGeometry, BuildOutput), RecipeError> {
    prepare_recipe(path, &config.import_options(), config.build_options())
}

/// Nominal run time of a recipe, starting at its first target
///
/// Hop moves run at `travel_speed`; homing is not counted.
pub fn estimate_duration(recipe: &Recipe, travel_speed: f64) -> Duration {
    let mut seconds = 0.0;
    let mut position: Option<Point> = None;
    for command in recipe.commands() {
        let leg = |to: &Point, speed: f64| match position {
            Some(from) if speed > 0.0 => from.distance(to) / speed,
            _ => 0.0,
        };
        match command {
            Command::Move { to, speed, .. } => seconds += leg(to, *speed),
            Command::HopDwell { at, dwell_ms } => {
                seconds += leg(at, travel_speed) + *dwell_ms as f64 / 1000.0;
            }
            Command::Home => {}
        }
        position = Some(command.end_position());
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// Connector to use for the machine
pub enum Transport {
    /// Modbus TCP to the configured host
    Modbus,
    /// In-process simulated controllers
    Simulated,
}

/// The assembled machine
pub struct Runtime {
    config: Config,
    events: Arc<EventBus>,
    manipulator: Arc<Manipulator>,
    executor: PatternExecutor,
    simulated: Option<SimulatedConnector>,
    _telemetry: TelemetrySink,
}

impl Runtime {
    /// Wire every component; nothing is connected yet
    pub fn new(config: Config, transport: Transport) -> Self {
        let events = Arc::new(event_bus(&config));
        let telemetry =
            TelemetrySink::attach_with(Arc::clone(&events), config.telemetry.log_bus_traffic);

        let (connector, simulated): (Arc<dyn BusConnector>, _) = match transport {
            Transport::Modbus => (
                Arc::new(ModbusTcpConnector::new(
                    config.bus.connect_timeout(),
                    config.bus.io_timeout(),
                )),
                None,
            ),
            Transport::Simulated => {
                let connector = Axis::ALL.into_iter().fold(
                    SimulatedConnector::new(),
                    |connector, axis| {
                        connector
                            .with_controller(config.bus.slave_id(axis), SimulatedController::new())
                    },
                );
                (Arc::new(connector.clone()), Some(connector))
            }
        };

        let axis_config = config.axis_config();
        let client = |axis| {
            Arc::new(AxisController::new(
                axis,
                Arc::clone(&connector),
                axis_config.clone(),
                Arc::clone(&events),
            ))
        };
        let manipulator = Arc::new(Manipulator::new(
            client(Axis::X),
            client(Axis::Y),
            client(Axis::Z),
            manipulator_config(&config),
            Arc::clone(&events),
        ));
        let executor = PatternExecutor::new(
            Arc::clone(&manipulator),
            executor_config(&config),
            Arc::clone(&events),
        );

        Self {
            config,
            events,
            manipulator,
            executor,
            simulated,
            _telemetry: telemetry,
        }
    }

    /// Loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Telemetry bus
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Coordinator
    pub fn manipulator(&self) -> &Arc<Manipulator> {
        &self.manipulator
    }

    /// Executor
    pub fn executor(&self) -> &PatternExecutor {
        &self.executor
    }

    /// Simulated controller of an axis, when running simulated
    pub fn simulated(&self, axis: Axis) -> Option<&SimulatedController> {
        self.simulated
            .as_ref()
            .and_then(|connector| connector.controller(self.config.bus.slave_id(axis)))
    }

    /// Connect all three axes and start their monitors
    pub async fn connect(&self) -> Result<(), ConnError> {
        let endpoints = endpoints(&self.config);
        tracing::info!(
            "Connecting to {} (slaves {}, {}, {})",
            self.config.bus.host,
            endpoints.x.slave_id,
            endpoints.y.slave_id,
            endpoints.z.slave_id
        );
        self.manipulator.connect_all(&endpoints).await
    }

    /// Load a recipe into the executor
    pub fn load(&self, recipe: Recipe) -> Result<(), depokit_core::ExecutionError> {
        self.executor.load(recipe)
    }

    /// Stop monitors and drop the sessions
    pub async fn shutdown(&self) {
        self.manipulator.shutdown().await;
    }
}
