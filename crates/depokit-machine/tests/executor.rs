mod common;

use common::{print, recipe, rig, travel, Rig};
use depokit_core::{
    Axis, Command, CommandOutcome, ExecutionError, ExecutionStatus, MachineError, Point,
    TelemetryEvent,
};
use depokit_machine::{ExecutorConfig, PatternExecutor};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn executor(rig: &Rig) -> PatternExecutor {
    PatternExecutor::new(
        Arc::clone(&rig.manipulator),
        ExecutorConfig::default(),
        Arc::clone(&rig.events),
    )
}

async fn start(executor: &PatternExecutor, commands: Vec<Command>) {
    executor.load(recipe(commands)).unwrap();
    executor.begin().await.unwrap();
    assert_eq!(executor.status(), ExecutionStatus::ReadyPrompt);
    executor.confirm().unwrap();
}

fn started_indices(rig: &Rig) -> Vec<usize> {
    rig.events
        .history()
        .into_iter()
        .filter_map(|e| match e {
            TelemetryEvent::CommandStarted { index, .. } => Some(index),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_runs_recipe_to_completion() {
    let rig = rig().await;
    let executor = executor(&rig);

    start(
        &executor,
        vec![travel(1.0, 1.0), print(2.0, 1.0, 0.25), print(2.0, 2.0, 0.25)],
    )
    .await;
    assert_eq!(executor.wait_until_settled().await, ExecutionStatus::Completed);

    let state = executor.state();
    assert_eq!(state.current_index, 3);
    assert!(state.started_at.is_some());
    assert!(state.elapsed_ms >= 8_000);
    let progress = executor.progress().unwrap();
    assert_eq!(progress.fraction, 1.0);
    assert_eq!(progress.estimated_remaining_ms, Some(0));
    assert_eq!(
        rig.manipulator.current_position().point,
        Point::new_3d(2.0, 2.0, 0.0)
    );
    assert_eq!(started_indices(&rig), vec![0, 1, 2]);

    let transitions: Vec<_> = rig
        .events
        .history()
        .into_iter()
        .filter_map(|e| match e {
            TelemetryEvent::ExecutionStateChanged { new, .. } => Some(new),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            ExecutionStatus::Positioning,
            ExecutionStatus::ReadyPrompt,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_begin_positions_at_first_command() {
    let rig = rig().await;
    let executor = executor(&rig);

    executor
        .load(recipe(vec![travel(3.0, 4.0), print(4.0, 4.0, 0.5)]))
        .unwrap();
    assert_eq!(executor.status(), ExecutionStatus::Positioning);
    executor.begin().await.unwrap();

    assert_eq!(executor.status(), ExecutionStatus::ReadyPrompt);
    assert_eq!(executor.current_index(), 0);
    let at = rig.manipulator.current_position().point;
    assert_eq!((at.x, at.y), (3.0, 4.0));

    // waiting at the prompt dispatches nothing
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(executor.status(), ExecutionStatus::ReadyPrompt);
    assert!(started_indices(&rig).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partial_move_pauses_without_advancing() {
    let rig = rig().await;
    let executor = executor(&rig);
    rig.y.update_faults(|f| f.stall = true);

    start(
        &executor,
        vec![
            travel(0.0, 0.0),
            print(1.0, 1.0, 0.5 * 2f64.sqrt()),
            print(2.0, 1.0, 0.5),
        ],
    )
    .await;

    let started = Instant::now();
    assert_eq!(executor.wait_until_settled().await, ExecutionStatus::Paused);
    assert!(started.elapsed() >= Duration::from_secs(5));

    assert_eq!(executor.current_index(), 1);
    match executor.last_failure() {
        Some(MachineError::PartialMove(partial)) => {
            assert_eq!(partial.failed_axis, Axis::Y);
            assert!(partial.source.is_timeout());
        }
        other => panic!("expected a partial move, got {other:?}"),
    }
    assert!(rig.x.stop_count() >= 1);
    assert!(!rig.x.is_running());

    let failed = rig.events.history().into_iter().any(|e| {
        matches!(
            e,
            TelemetryEvent::CommandCompleted {
                index: 1,
                result: CommandOutcome::Failed { .. },
            }
        )
    });
    assert!(failed);
}

#[tokio::test(start_paused = true)]
async fn test_resume_resyncs_and_redispatches_failed_command() {
    let rig = rig().await;
    let executor = executor(&rig);
    rig.y.update_faults(|f| f.stall = true);

    start(
        &executor,
        vec![
            travel(0.0, 0.0),
            print(1.0, 1.0, 0.5 * 2f64.sqrt()),
            print(2.0, 1.0, 0.5),
        ],
    )
    .await;
    assert_eq!(executor.wait_until_settled().await, ExecutionStatus::Paused);
    assert_eq!(executor.current_index(), 1);

    rig.y.update_faults(|f| f.stall = false);
    executor.resume().await.unwrap();
    // X drifted to 1.0 during the failed move and was brought back
    assert_eq!(executor.wait_until_settled().await, ExecutionStatus::Completed);
    assert_eq!(executor.current_index(), 3);
    assert_eq!(started_indices(&rig), vec![0, 1, 1, 2]);

    let resynced = rig.events.history().into_iter().any(|e| {
        matches!(
            e,
            TelemetryEvent::Fault {
                kind: depokit_core::FaultKind::Resync,
                ..
            }
        )
    });
    assert!(resynced);
}

#[tokio::test(start_paused = true)]
async fn test_pause_waits_for_in_flight_command() {
    let rig = rig().await;
    let executor = executor(&rig);

    start(
        &executor,
        vec![
            travel(0.0, 0.0),
            print(1.0, 0.0, 0.5),
            print(2.0, 0.0, 0.5),
            print(3.0, 0.0, 0.5),
        ],
    )
    .await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(executor.current_index(), 1);
    let settled = executor.pause().await.unwrap();

    assert_eq!(settled, ExecutionStatus::Paused);
    assert_eq!(executor.current_index(), 2);
    assert!((rig.x.position() - 1.0).abs() < 1e-6);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(executor.current_index(), 2);
    assert!(!rig.x.is_running());

    executor.resume().await.unwrap();
    assert_eq!(executor.status(), ExecutionStatus::Running);
    assert_eq!(executor.wait_until_settled().await, ExecutionStatus::Completed);
    assert_eq!(started_indices(&rig), vec![0, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_pause_during_last_command_completes() {
    let rig = rig().await;
    let executor = executor(&rig);

    start(&executor, vec![travel(0.0, 0.0), print(1.0, 0.0, 0.5)]).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(executor.current_index(), 1);
    let settled = executor.pause().await.unwrap();

    assert_eq!(settled, ExecutionStatus::Completed);
    assert_eq!(executor.status(), ExecutionStatus::Completed);
    assert_eq!(executor.current_index(), 2);
    assert!((rig.x.position() - 1.0).abs() < 1e-6);
    assert!(executor.resume().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_abort_freezes_index_and_stops_axes() {
    let rig = rig().await;
    let executor = executor(&rig);

    start(
        &executor,
        vec![travel(0.0, 0.0), print(10.0, 0.0, 0.5), print(10.0, 10.0, 0.5)],
    )
    .await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    executor.abort().await.unwrap();
    assert_eq!(executor.status(), ExecutionStatus::Aborted);
    assert_eq!(executor.current_index(), 1);
    for axis in Axis::ALL {
        assert!(!rig.manipulator.axis(axis).poll_status().moving);
        assert!(!rig.sim(axis).is_running());
    }
    assert!(rig.manipulator.is_halted());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(executor.current_index(), 1);
    assert_eq!(started_indices(&rig), vec![0, 1]);

    assert!(matches!(
        executor.abort().await,
        Err(ExecutionError::InvalidTransition {
            operation: "abort",
            status: ExecutionStatus::Aborted
        })
    ));

    executor.reset().unwrap();
    assert_eq!(executor.status(), ExecutionStatus::Idle);
    assert!(!rig.manipulator.is_halted());
}

#[tokio::test(start_paused = true)]
async fn test_abort_interrupts_dwell() {
    let rig = rig().await;
    let executor = executor(&rig);

    start(
        &executor,
        vec![
            travel(0.0, 0.0),
            Command::HopDwell {
                at: Point::new(0.5, 0.0),
                dwell_ms: 60_000,
            },
            Command::HopDwell {
                at: Point::new(1.0, 0.0),
                dwell_ms: 60_000,
            },
        ],
    )
    .await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(executor.current_index(), 1);

    let started = Instant::now();
    executor.abort().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(executor.current_index(), 1);
    assert!((rig.x.position() - 0.5).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_hop_dwell_holds_before_next_command() {
    let rig = rig().await;
    let executor = executor(&rig);

    start(
        &executor,
        vec![
            travel(0.0, 0.0),
            Command::HopDwell {
                at: Point::new(1.0, 0.0),
                dwell_ms: 10_000,
            },
        ],
    )
    .await;
    let started = Instant::now();
    assert_eq!(executor.wait_until_settled().await, ExecutionStatus::Completed);
    // 2 s travel at 0.5 mm/s, then the hold
    assert!(started.elapsed() >= Duration::from_secs(12));
    assert_eq!(rig.x.last_speed(), Some(0.5));
}

#[tokio::test(start_paused = true)]
async fn test_unstoppable_axis_on_abort_is_fatal() {
    let rig = rig().await;
    let executor = executor(&rig);

    start(&executor, vec![travel(0.0, 0.0), print(10.0, 0.0, 0.5)]).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    rig.x.update_faults(|f| f.ignore_stop = true);

    let err = executor.abort().await.unwrap_err();
    match err {
        ExecutionError::Machine(machine) => assert!(machine.is_fatal()),
        other => panic!("expected a fault escalation, got {other}"),
    }
    assert_eq!(executor.status(), ExecutionStatus::Aborted);

    executor.reset().unwrap();
    // a failed stop keeps motion latched off until released by hand
    assert!(rig.manipulator.is_halted());
    executor
        .load(recipe(vec![travel(1.0, 1.0)]))
        .unwrap();
    assert!(matches!(
        executor.begin().await,
        Err(ExecutionError::Machine(MachineError::Halted))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_recipe_starting_with_home_skips_positioning() {
    let rig = rig().await;
    rig.manipulator
        .move_to_point(Point::new(2.0, 2.0), 1.0)
        .await
        .unwrap();
    let executor = executor(&rig);

    executor
        .load(recipe(vec![Command::Home, travel(1.0, 0.0)]))
        .unwrap();
    executor.begin().await.unwrap();
    assert_eq!(rig.x.home_count(), 0);
    assert_eq!(executor.status(), ExecutionStatus::ReadyPrompt);

    executor.confirm().unwrap();
    assert_eq!(executor.wait_until_settled().await, ExecutionStatus::Completed);
    assert_eq!(rig.x.home_count(), 1);
    assert_eq!(rig.z.home_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_transitions_are_rejected() {
    let rig = rig().await;
    let executor = executor(&rig);

    assert!(matches!(
        executor.begin().await,
        Err(ExecutionError::InvalidTransition {
            operation: "begin",
            status: ExecutionStatus::Idle
        })
    ));
    assert!(matches!(
        executor.pause().await,
        Err(ExecutionError::InvalidTransition { operation: "pause", .. })
    ));
    assert!(matches!(
        executor.resume().await,
        Err(ExecutionError::InvalidTransition { operation: "resume", .. })
    ));
    assert!(matches!(
        executor.abort().await,
        Err(ExecutionError::InvalidTransition { operation: "abort", .. })
    ));
    assert!(matches!(
        executor.confirm(),
        Err(ExecutionError::InvalidTransition { operation: "confirm", .. })
    ));
    assert_eq!(executor.load(recipe(vec![])), Err(ExecutionError::EmptyRecipe));

    executor.load(recipe(vec![travel(1.0, 1.0)])).unwrap();
    assert!(matches!(
        executor.load(recipe(vec![travel(1.0, 1.0)])),
        Err(ExecutionError::InvalidTransition {
            operation: "load",
            status: ExecutionStatus::Positioning
        })
    ));
    assert!(matches!(
        executor.reset(),
        Err(ExecutionError::InvalidTransition { operation: "reset", .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_load_rejects_targets_outside_workspace() {
    let rig = rig().await;
    let executor = executor(&rig);

    let err = executor
        .load(recipe(vec![travel(1.0, 1.0), print(1.0, 75.0, 0.5)]))
        .unwrap_err();
    match err {
        ExecutionError::OutsideWorkspace(bounds) => {
            assert_eq!(bounds.vertex_index, 1);
            assert_eq!(bounds.axis, Axis::Y);
        }
        other => panic!("expected a workspace rejection, got {other}"),
    }
    assert_eq!(executor.status(), ExecutionStatus::Idle);
}
