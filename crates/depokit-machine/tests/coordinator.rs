mod common;

use common::rig;
use depokit_core::{
    Axis, AxisFault, FaultKind, MachineError, MotionError, PartialMoveError, Point,
    TelemetryEvent,
};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_xy_axes_move_together() {
    let rig = rig().await;

    let started = Instant::now();
    // 3-4-5 triangle: 0.3 and 0.4 mm/s per axis, 10 s both
    rig.manipulator.move_xy(3.0, 4.0, 0.5).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_secs(11), "took {:?}", elapsed);
    assert!((rig.x.last_speed().unwrap() - 0.3).abs() < 1e-6);
    assert!((rig.y.last_speed().unwrap() - 0.4).abs() < 1e-6);

    let snapshot = rig.manipulator.current_position();
    assert!(!snapshot.stale);
    assert!((snapshot.point.x - 3.0).abs() < 1e-6);
    assert!((snapshot.point.y - 4.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_y_timeout_stops_x_and_reports_partial_move() {
    let rig = rig().await;
    rig.y.update_faults(|f| f.stall = true);

    let started = Instant::now();
    let err = rig
        .manipulator
        .move_xy(1.0, 1.0, 0.5 * 2f64.sqrt())
        .await
        .unwrap_err();

    match err {
        MachineError::PartialMove(PartialMoveError {
            failed_axis,
            source,
        }) => {
            assert_eq!(failed_axis, Axis::Y);
            assert!(source.is_timeout());
        }
        other => panic!("expected a partial move, got {other}"),
    }
    assert!(started.elapsed() >= Duration::from_secs(5));

    // X finished its leg, then was stopped once Y failed
    assert!(rig.x.stop_count() >= 1);
    assert!(!rig.x.is_running());
    let x = rig.manipulator.axis(Axis::X).poll_status();
    assert!(!x.moving);
    assert!((x.position - 1.0).abs() < 1e-6);

    let y = rig.manipulator.axis(Axis::Y).poll_status();
    assert!(!y.moving);
    assert_eq!(y.last_error, Some(AxisFault::Timeout));
    assert!(rig.manipulator.current_position().stale);

    let partial_faults = rig
        .events
        .history()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                TelemetryEvent::Fault {
                    kind: FaultKind::PartialMove,
                    axis: Some(Axis::Y),
                    ..
                }
            )
        })
        .count();
    assert_eq!(partial_faults, 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_failure_interrupts_other_axis() {
    let rig = rig().await;
    rig.x.update_faults(|f| {
        f.ignore_start = true;
        f.error_code = 3;
    });

    // Y runs at 0.5 mm/s over 4 mm, X never starts
    let speed = 0.5 * 17f64.sqrt() / 4.0;
    let started = Instant::now();
    let err = rig.manipulator.move_xy(1.0, 4.0, speed).await.unwrap_err();

    assert_eq!(
        err,
        MachineError::PartialMove(PartialMoveError {
            failed_axis: Axis::X,
            source: MotionError::NeverStarted {
                axis: Axis::X,
                error_code: 3,
            },
        })
    );
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!rig.y.is_running());
    let y = rig.manipulator.axis(Axis::Y).poll_status();
    assert!(!y.moving);
    assert!(y.position > 0.0 && y.position < 4.0);
}

#[tokio::test(start_paused = true)]
async fn test_single_axis_delta_moves_one_axis() {
    let rig = rig().await;
    rig.manipulator.move_xy(0.0, 2.0, 1.0).await.unwrap();
    assert_eq!(rig.x.start_count(), 0);
    assert_eq!(rig.y.start_count(), 1);
    assert_eq!(rig.y.last_speed(), Some(1.0));

    // below the skip threshold nothing is dispatched
    rig.manipulator.move_xy(0.0001, 2.0, 1.0).await.unwrap();
    assert_eq!(rig.x.start_count(), 0);
    assert_eq!(rig.y.start_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_move_to_point_sets_height_first() {
    let rig = rig().await;
    rig.manipulator
        .move_to_point(Point::new_3d(1.0, 1.0, 2.0), 0.5)
        .await
        .unwrap();
    assert_eq!(rig.z.position(), 2.0);
    assert_eq!(rig.z.last_speed(), Some(0.5));
    assert_eq!(
        rig.manipulator.current_position().point,
        Point::new_3d(1.0, 1.0, 2.0)
    );

    // planar points leave Z alone
    rig.manipulator
        .move_to_point(Point::new(2.0, 1.0), 0.5)
        .await
        .unwrap();
    assert_eq!(rig.z.start_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_home_all_homes_z_before_xy() {
    let rig = rig().await;
    rig.manipulator
        .move_to_point(Point::new_3d(2.0, 3.0, 1.0), 1.0)
        .await
        .unwrap();

    let home = {
        let manipulator = rig.manipulator.clone();
        tokio::spawn(async move { manipulator.home_all().await })
    };
    // Z needs 1 s to home; XY must not have started yet
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(rig.z.home_count(), 1);
    assert_eq!(rig.x.home_count(), 0);
    assert_eq!(rig.y.home_count(), 0);

    home.await.unwrap().unwrap();
    assert_eq!(rig.x.home_count(), 1);
    assert_eq!(rig.y.home_count(), 1);
    assert_eq!(rig.manipulator.current_position().point, Point::origin());
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_interrupts_move_and_latches() {
    let rig = rig().await;
    let moving = {
        let manipulator = rig.manipulator.clone();
        tokio::spawn(async move { manipulator.move_xy(10.0, 10.0, 1.0).await })
    };
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(rig.x.is_running());

    rig.manipulator.emergency_stop().await.unwrap();
    let result = moving.await.unwrap();
    assert_eq!(result, Err(MachineError::Halted));
    for axis in Axis::ALL {
        assert!(!rig.sim(axis).is_running());
        assert!(!rig.manipulator.axis(axis).poll_status().moving);
    }

    assert!(rig.manipulator.is_halted());
    assert_eq!(
        rig.manipulator.move_z(1.0, 0.5).await,
        Err(MachineError::Halted)
    );
    rig.manipulator.release_halt();
    rig.manipulator.move_z(1.0, 0.5).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_is_idempotent() {
    let rig = rig().await;
    let moving = {
        let manipulator = rig.manipulator.clone();
        tokio::spawn(async move { manipulator.move_xy(5.0, 2.0, 1.0).await })
    };
    tokio::time::sleep(Duration::from_millis(1500)).await;

    rig.manipulator.emergency_stop().await.unwrap();
    let _ = moving.await.unwrap();
    let once: Vec<_> = Axis::ALL
        .iter()
        .map(|a| rig.manipulator.axis(*a).poll_status())
        .collect();

    rig.manipulator.emergency_stop().await.unwrap();
    let twice: Vec<_> = Axis::ALL
        .iter()
        .map(|a| rig.manipulator.axis(*a).poll_status())
        .collect();
    assert_eq!(once, twice);
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_does_not_wait_for_motion_lock() {
    let rig = rig().await;
    let moving = {
        let manipulator = rig.manipulator.clone();
        tokio::spawn(async move { manipulator.move_z(20.0, 0.5).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    let started = Instant::now();
    rig.manipulator.emergency_stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(moving.await.unwrap().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_unstoppable_axis_escalates() {
    let rig = rig().await;
    let moving = {
        let manipulator = rig.manipulator.clone();
        tokio::spawn(async move { manipulator.move_xy(8.0, 0.0, 1.0).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    rig.x.update_faults(|f| f.ignore_stop = true);

    let escalation = rig.manipulator.emergency_stop().await.unwrap_err();
    assert_eq!(escalation.failures.len(), 1);
    assert_eq!(escalation.failures[0].axis(), Axis::X);
    assert!(MachineError::from(escalation).is_fatal());
    moving.abort();

    let stop_failed = rig.events.history().into_iter().any(|e| {
        matches!(
            e,
            TelemetryEvent::Fault {
                kind: FaultKind::StopFailed,
                axis: None,
                ..
            }
        )
    });
    assert!(stop_failed);
}

#[tokio::test(start_paused = true)]
async fn test_position_is_stale_while_an_axis_is_offline() {
    let rig = rig().await;
    assert!(!rig.manipulator.current_position().stale);

    rig.z.update_faults(|f| f.offline = true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rig.manipulator.current_position().stale);

    rig.z.update_faults(|f| f.offline = false);
    tokio::time::sleep(Duration::from_secs(5)).await;
    let snapshot = rig.manipulator.requery_all().await.unwrap();
    assert!(!snapshot.stale);
}
