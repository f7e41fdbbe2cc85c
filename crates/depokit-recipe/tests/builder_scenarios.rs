use depokit_core::{
    Axis, AxisLimits, Command, LimitSide, MoveKind, OutOfBoundsError, Point, ValidationError,
    WorkspaceBounds,
};
use depokit_recipe::{BuildOptions, PathEntity, RecipeBuilder};

fn pts(raw: &[(f64, f64)]) -> Vec<Point> {
    raw.iter().map(|&(x, y)| Point::new(x, y)).collect()
}

fn wide_workspace() -> WorkspaceBounds {
    WorkspaceBounds {
        x: AxisLimits::new(0.0, 100.0),
        y: AxisLimits::new(0.0, 100.0),
        z: AxisLimits::new(0.0, 25.0),
    }
}

#[test]
fn test_duplicates_within_epsilon_are_removed() {
    let path = PathEntity::open(
        0,
        pts(&[(0.0, 0.0), (0.0, 0.0), (10.0, 0.0), (10.0, 0.001), (10.0, 10.0)]),
    );
    let builder = RecipeBuilder::new(BuildOptions {
        dedupe_epsilon: 0.01,
        ..Default::default()
    })
    .unwrap();

    let output = builder.build(&[path]).unwrap();
    let targets: Vec<Point> = output
        .recipe
        .commands()
        .iter()
        .filter_map(Command::target)
        .collect();
    assert_eq!(targets, pts(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]));
    assert_eq!(output.recipe.metadata().vertex_count, 3);
    assert!(output.jumps.is_empty());
}

#[test]
fn test_large_gap_is_flagged_as_jump() {
    let path = PathEntity::open(
        3,
        pts(&[
            (0.0, 0.0),
            (2.0, 0.0),
            (2.0, 2.0),
            (4.0, 2.0),
            (4.0, 4.0),
            (6.0, 4.0),
            (6.0, 6.0),
            (56.0, 6.0),
            (56.0, 8.0),
            (58.0, 8.0),
        ]),
    );
    let builder = RecipeBuilder::new(BuildOptions {
        workspace: wide_workspace(),
        ..Default::default()
    })
    .unwrap();

    let output = builder.build(&[path]).unwrap();
    assert_eq!(output.jumps.len(), 1);
    let jump = &output.jumps[0];
    assert_eq!(jump.vertex_index, 7);
    assert_eq!(jump.command_index, 7);
    assert_eq!(jump.sequence_id, 3);
    assert!((jump.distance - 50.0).abs() < 1e-9);
    assert!((jump.median - 2.0).abs() < 1e-9);
    // flagged, not removed
    assert_eq!(output.recipe.len(), 10);
}

#[test]
fn test_stop_and_go_dwell_from_speed_and_spacing() {
    let path = PathEntity::open(0, pts(&[(0.0, 0.0), (3.0, 0.0)]));
    let builder = RecipeBuilder::new(BuildOptions {
        stop_and_go: true,
        hop_spacing: 1.0,
        print_speed: 0.1,
        dwell_scale: 1.0,
        ..Default::default()
    })
    .unwrap();

    let output = builder.build(&[path]).unwrap();
    let commands = output.recipe.commands();
    assert_eq!(commands.len(), 4);
    assert!(matches!(
        commands[0],
        Command::Move {
            kind: MoveKind::Travel,
            ..
        }
    ));
    for (i, command) in commands[1..].iter().enumerate() {
        match command {
            Command::HopDwell { at, dwell_ms } => {
                assert_eq!(*dwell_ms, 10_000);
                assert!((at.x - (i + 1) as f64).abs() < 1e-9);
            }
            other => panic!("expected a hop, got {other}"),
        }
    }
    assert!(output.recipe.metadata().stop_and_go);
}

#[test]
fn test_hops_shorter_than_spacing_split_evenly() {
    let path = PathEntity::open(0, pts(&[(0.0, 0.0), (2.5, 0.0)]));
    let builder = RecipeBuilder::new(BuildOptions {
        stop_and_go: true,
        hop_spacing: 1.0,
        print_speed: 0.5,
        dwell_scale: 2.0,
        ..Default::default()
    })
    .unwrap();

    let output = builder.build(&[path]).unwrap();
    let dwells: Vec<u64> = output
        .recipe
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::HopDwell { dwell_ms, .. } => Some(*dwell_ms),
            _ => None,
        })
        .collect();
    // three hops of 0.833 mm at 0.5 mm/s, doubled
    assert_eq!(dwells, vec![3333, 3333, 3333]);
}

#[test]
fn test_vertex_outside_workspace_is_rejected() {
    let path = PathEntity::open(2, pts(&[(1.0, 1.0), (60.0, 1.0)]));
    let builder = RecipeBuilder::new(BuildOptions::default()).unwrap();

    let err = builder.build(&[path]).unwrap_err();
    assert_eq!(
        err,
        ValidationError::OutOfBounds(OutOfBoundsError {
            vertex: Point::new(60.0, 1.0),
            sequence_id: Some(2),
            vertex_index: 1,
            axis: Axis::X,
            side: LimitSide::Max,
            limit: 50.0,
        })
    );
}

#[test]
fn test_origin_offset_applies_before_validation() {
    let path = PathEntity::open(0, pts(&[(0.0, 0.0), (10.0, 0.0)]));
    let shifted = RecipeBuilder::new(BuildOptions {
        origin_offset: Point::new(45.0, 5.0),
        ..Default::default()
    })
    .unwrap();
    assert!(matches!(
        shifted.build(std::slice::from_ref(&path)),
        Err(ValidationError::OutOfBounds(OutOfBoundsError {
            axis: Axis::X,
            side: LimitSide::Max,
            ..
        }))
    ));

    let inside = RecipeBuilder::new(BuildOptions {
        origin_offset: Point::new(20.0, 5.0),
        ..Default::default()
    })
    .unwrap();
    let output = inside.build(&[path]).unwrap();
    assert_eq!(output.recipe.first_position(), Some(Point::new(20.0, 5.0)));
}

#[test]
fn test_z_outside_workspace_is_rejected() {
    let path = PathEntity::open(0, pts(&[(1.0, 1.0), (2.0, 1.0)]));
    let builder = RecipeBuilder::new(BuildOptions {
        z_height: Some(30.0),
        ..Default::default()
    })
    .unwrap();
    assert!(matches!(
        builder.build(&[path]),
        Err(ValidationError::OutOfBounds(OutOfBoundsError { axis: Axis::Z, .. }))
    ));
}

#[test]
fn test_build_is_deterministic() {
    let paths = vec![
        PathEntity::closed(0, pts(&[(5.0, 5.0), (15.0, 5.0), (15.0, 15.0), (5.0, 15.0)])),
        PathEntity::open(1, pts(&[(20.0, 20.0), (25.0, 22.0), (30.0, 20.0)])),
    ];
    let builder = RecipeBuilder::new(BuildOptions {
        compensate: true,
        nozzle_diameter: 0.4,
        ..Default::default()
    })
    .unwrap();

    let first = builder.build(&paths).unwrap();
    let second = builder.build(&paths).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.warnings.len(), 1);
}

#[test]
fn test_recipe_serialises_for_review() {
    let path = PathEntity::open(0, pts(&[(1.0, 1.0), (2.0, 2.0)]));
    let output = RecipeBuilder::new(BuildOptions::default())
        .unwrap()
        .build(&[path])
        .unwrap();
    let json = serde_json::to_value(&output.recipe).unwrap();
    assert_eq!(json["commands"][0]["type"], "move");
    assert_eq!(json["commands"][0]["kind"], "travel");
    assert_eq!(json["commands"][1]["kind"], "print");
}
