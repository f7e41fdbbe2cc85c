use depokit::{Axis, Config, ExecutionStatus, Point, Runtime, Transport};
use depokit_recipe::{PathEntity, RecipeBuilder};

fn square(side: f64) -> PathEntity {
    PathEntity::closed(
        0,
        vec![
            Point::new(1.0, 1.0),
            Point::new(1.0 + side, 1.0),
            Point::new(1.0 + side, 1.0 + side),
            Point::new(1.0, 1.0 + side),
        ],
    )
}

#[tokio::test(start_paused = true)]
async fn test_simulated_run_completes_square() {
    let mut config = Config::default();
    config.recipe.print_speed = 0.5;
    config.validate().unwrap();

    let output = RecipeBuilder::new(config.build_options())
        .unwrap()
        .build(&[square(2.0)])
        .unwrap();
    assert!(output.jumps.is_empty());

    let runtime = Runtime::new(config, Transport::Simulated);
    runtime.connect().await.unwrap();
    runtime.manipulator().home_all().await.unwrap();

    let executor = runtime.executor();
    runtime.load(output.recipe.clone()).unwrap();
    executor.begin().await.unwrap();
    assert_eq!(executor.status(), ExecutionStatus::ReadyPrompt);
    let start = output.recipe.first_position().unwrap();
    let at = runtime.manipulator().current_position().point;
    assert!(at.distance_xy(&start) < 1e-4, "positioned at {}", at);

    executor.confirm().unwrap();
    assert_eq!(executor.wait_until_settled().await, ExecutionStatus::Completed);
    assert_eq!(executor.current_index(), output.recipe.len());

    let end = output.recipe.commands().last().unwrap().end_position();
    let x = runtime.simulated(Axis::X).unwrap().position();
    let y = runtime.simulated(Axis::Y).unwrap().position();
    assert!((x - end.x).abs() < 1e-4, "x = {}", x);
    assert!((y - end.y).abs() < 1e-4, "y = {}", y);

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_simulated_stop_while_idle_is_clean() {
    let runtime = Runtime::new(Config::default(), Transport::Simulated);
    runtime.connect().await.unwrap();
    runtime.manipulator().emergency_stop().await.unwrap();
    assert!(runtime.manipulator().is_halted());
    for axis in Axis::ALL {
        assert!(!runtime.simulated(axis).unwrap().is_running());
    }
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_modbus_runtime_reports_unreachable_host() {
    let mut config = Config::default();
    config.bus.host = "127.0.0.1".into();
    config.bus.port = 1;
    config.bus.connect_timeout_ms = 200;

    let runtime = Runtime::new(config, Transport::Modbus);
    assert!(runtime.connect().await.is_err());
    assert!(runtime.manipulator().current_position().stale);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_runtime_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("depokit.toml");

    let mut config = Config::default();
    config.bus.z_slave = 9;
    config.motion.skip_epsilon = 1e-3;
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_or_default(Some(path.as_path())).unwrap();
    assert_eq!(loaded, config);

    let runtime = Runtime::new(loaded, Transport::Simulated);
    assert!(runtime.simulated(Axis::Z).is_some());
    assert_eq!(runtime.config().bus.slave_id(Axis::Z), 9);
    assert_eq!(runtime.manipulator().config().skip_epsilon, 1e-3);

    runtime.connect().await.unwrap();
    assert!(!runtime.manipulator().current_position().stale);
    runtime.shutdown().await;
}
