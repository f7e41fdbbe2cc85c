//! Recipe builder
//!
//! Turns drawing paths into a validated [`Recipe`]. The pipeline runs in a
//! fixed order: origin offset, workspace check, nozzle compensation,
//! duplicate and colinear filtering, jump detection, command emission and
//! a final workspace check on every command target.
//!
//! The builder holds no state between calls; identical input always
//! yields an identical recipe.

use depokit_core::{
    BoundingBox, Command, MoveKind, OutOfBoundsError, Point, Recipe, RecipeMetadata, SpeedLimits,
    ValidationError, WorkspaceBounds,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::compensation;
use crate::geometry::{self, PathEntity};

/// Shortest accepted stop-and-go hop, in mm
pub const MIN_HOP_SPACING: f64 = 1e-3;

/// Most commands a single recipe may hold
pub const MAX_RECIPE_COMMANDS: usize = 1_000_000;

/// Builder parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    /// Added to every vertex, Z ignored
    pub origin_offset: Point,
    /// Deposition speed in mm/s
    pub print_speed: f64,
    /// Positioning speed in mm/s
    pub travel_speed: f64,
    /// Nozzle diameter in mm; positive shrinks closed paths inward
    pub nozzle_diameter: f64,
    /// Apply nozzle compensation
    pub compensate: bool,
    /// Consecutive vertices closer than this are merged
    pub dedupe_epsilon: f64,
    /// Perpendicular deviation below which a vertex counts as colinear
    pub colinear_tolerance: f64,
    /// Print segments longer than this multiple of the median are flagged
    pub jump_multiple: f64,
    /// Replace print moves with hop-dwell units
    pub stop_and_go: bool,
    /// Longest hop in stop-and-go mode, in mm
    pub hop_spacing: f64,
    /// Multiplier on the computed dwell
    pub dwell_scale: f64,
    /// Chord length used when flattening offset arcs
    pub arc_resolution: f64,
    /// Tool height attached to every point
    pub z_height: Option<f64>,
    /// Manipulator travel limits
    pub workspace: WorkspaceBounds,
    /// Controller speed envelope
    pub speed_limits: SpeedLimits,
    /// Source drawing name for the metadata
    pub source: Option<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            origin_offset: Point::new(0.0, 0.0),
            print_speed: 0.1,
            travel_speed: 0.5,
            nozzle_diameter: 0.2,
            compensate: false,
            dedupe_epsilon: 1e-3,
            colinear_tolerance: 1e-6,
            jump_multiple: 5.0,
            stop_and_go: false,
            hop_spacing: 0.1,
            dwell_scale: 1.0,
            arc_resolution: 0.1,
            z_height: None,
            workspace: WorkspaceBounds::default(),
            speed_limits: SpeedLimits::default(),
            source: None,
        }
    }
}

impl BuildOptions {
    /// Reject parameters the builder or the controllers cannot honour
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, speed) in [
            ("print_speed", self.print_speed),
            ("travel_speed", self.travel_speed),
        ] {
            if !self.speed_limits.accepts_path_speed(speed) {
                return Err(ValidationError::InvalidSpeed {
                    name: name.into(),
                    speed,
                    min: self.speed_limits.min_axis_speed,
                    max: self.speed_limits.max_path_speed(),
                });
            }
        }

        let invalid = |name: &str, reason: &str| ValidationError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        };
        let non_negative = |value: f64| value.is_finite() && value >= 0.0;
        if !self.nozzle_diameter.is_finite() {
            return Err(invalid("nozzle_diameter", "must be finite"));
        }
        if !non_negative(self.dedupe_epsilon) {
            return Err(invalid("dedupe_epsilon", "must be a non-negative number"));
        }
        if !non_negative(self.colinear_tolerance) {
            return Err(invalid("colinear_tolerance", "must be a non-negative number"));
        }
        if !(self.jump_multiple.is_finite() && self.jump_multiple > 0.0) {
            return Err(invalid("jump_multiple", "must be positive"));
        }
        if !(self.arc_resolution.is_finite() && self.arc_resolution > 0.0) {
            return Err(invalid("arc_resolution", "must be positive"));
        }
        if self.stop_and_go {
            if !(self.hop_spacing.is_finite() && self.hop_spacing >= MIN_HOP_SPACING) {
                return Err(invalid("hop_spacing", "must be at least 0.001 mm"));
            }
            if !non_negative(self.dwell_scale) {
                return Err(invalid("dwell_scale", "must be a non-negative number"));
            }
        }
        if let Some(z) = self.z_height {
            if !z.is_finite() {
                return Err(invalid("z_height", "must be finite"));
            }
        }
        Ok(())
    }
}

/// Non-fatal geometry finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeometryWarning {
    /// A closed path crosses itself and was left uncompensated
    SelfIntersecting {
        /// The path.
        sequence_id: u32,
    },
    /// Compensation only applies to closed paths
    OpenPathNotCompensated {
        /// The path.
        sequence_id: u32,
    },
    /// The offset consumed the whole shape; the path was dropped
    CompensationCollapsed {
        /// The path.
        sequence_id: u32,
    },
    /// The offset split the shape into several loops
    CompensationSplit {
        /// The path.
        sequence_id: u32,
        /// Number of resulting loops.
        pieces: usize,
    },
    /// Fewer than two distinct vertices remained; the path was dropped
    DegeneratePath {
        /// The path.
        sequence_id: u32,
        /// Vertices left after filtering.
        vertices: usize,
    },
}

impl fmt::Display for GeometryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfIntersecting { sequence_id } => {
                write!(f, "path {} intersects itself, compensation skipped", sequence_id)
            }
            Self::OpenPathNotCompensated { sequence_id } => {
                write!(f, "path {} is open, compensation skipped", sequence_id)
            }
            Self::CompensationCollapsed { sequence_id } => {
                write!(f, "path {} vanished under compensation", sequence_id)
            }
            Self::CompensationSplit {
                sequence_id,
                pieces,
            } => write!(f, "path {} split into {} loops by compensation", sequence_id, pieces),
            Self::DegeneratePath {
                sequence_id,
                vertices,
            } => write!(f, "path {} dropped with {} distinct vertices", sequence_id, vertices),
        }
    }
}

/// Unusually long print segment flagged for review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpWarning {
    /// Path the segment belongs to
    pub sequence_id: u32,
    /// Position of the segment end among all emitted vertices
    pub vertex_index: usize,
    /// Command that arrives at the segment end
    pub command_index: usize,
    /// Segment length in mm
    pub distance: f64,
    /// Median print segment length the threshold was derived from
    pub median: f64,
}

impl fmt::Display for JumpWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "jump of {:.3} mm at vertex {} (path {}, command {}, median {:.3} mm)",
            self.distance, self.vertex_index, self.sequence_id, self.command_index, self.median
        )
    }
}

/// Result of one build
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    /// The validated recipe
    pub recipe: Recipe,
    /// Segments flagged for operator review
    pub jumps: Vec<JumpWarning>,
    /// Geometry findings
    pub warnings: Vec<GeometryWarning>,
}

/// Where an emitted command came from, for error reporting
#[derive(Debug, Clone, Copy)]
struct Origin {
    sequence_id: u32,
    vertex_index: usize,
}

/// Recipe builder
#[derive(Debug, Clone)]
pub struct RecipeBuilder {
    options: BuildOptions,
}

impl RecipeBuilder {
    /// Create a builder, validating the options
    pub fn new(options: BuildOptions) -> Result<Self, ValidationError> {
        options.validate()?;
        Ok(Self { options })
    }

    /// Options in use
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Build a recipe from drawing paths
    pub fn build(&self, paths: &[PathEntity]) -> Result<BuildOutput, ValidationError> {
        let opts = &self.options;
        let mut warnings = Vec::new();

        let offset: Vec<PathEntity> = paths.iter().map(|p| self.place(p)).collect();
        for path in &offset {
            self.check_bounds(path)?;
        }

        let compensating = opts.compensate && opts.nozzle_diameter != 0.0;
        let mut compensated = Vec::with_capacity(offset.len());
        for path in &offset {
            if compensating {
                let result =
                    compensation::compensate(path, opts.nozzle_diameter, opts.arc_resolution);
                warnings.extend(result.warning);
                compensated.extend(result.paths);
            } else {
                compensated.push(path.clone());
            }
        }

        let mut retained = Vec::with_capacity(compensated.len());
        for path in compensated {
            let vertices = self.filter(&path);
            if vertices.len() < 2 {
                warnings.push(GeometryWarning::DegeneratePath {
                    sequence_id: path.sequence_id,
                    vertices: vertices.len(),
                });
                continue;
            }
            tracing::debug!(
                "path {}: {} vertices kept of {}",
                path.sequence_id,
                vertices.len(),
                path.vertices.len()
            );
            retained.push(PathEntity { vertices, ..path });
        }
        if retained.is_empty() {
            return Err(ValidationError::EmptyGeometry);
        }

        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        let median = geometry::median(
            &retained
                .iter()
                .flat_map(print_segments)
                .map(|(a, b)| a.distance_xy(&b))
                .collect::<Vec<_>>(),
        )
        .unwrap_or(0.0);

        let (commands, origins, jumps) = self.emit(&retained, median)?;

        for (index, (command, origin)) in commands.iter().zip(&origins).enumerate() {
            if let Some(target) = command.target() {
                if let Some((axis, side, limit)) = opts.workspace.violation(&target) {
                    tracing::debug!("command {} leaves the workspace", index);
                    return Err(OutOfBoundsError {
                        vertex: target,
                        sequence_id: Some(origin.sequence_id),
                        vertex_index: origin.vertex_index,
                        axis,
                        side,
                        limit,
                    }
                    .into());
                }
            }
        }

        for jump in &jumps {
            tracing::warn!("{}", jump);
        }

        let targets: Vec<Point> = commands.iter().filter_map(Command::target).collect();
        let metadata = RecipeMetadata {
            source: opts.source.clone(),
            path_count: retained.len(),
            vertex_count: retained.iter().map(|p| p.vertices.len()).sum(),
            bounding_box: BoundingBox::from_points(&targets),
            nozzle_offset: if compensating {
                opts.nozzle_diameter / 2.0
            } else {
                0.0
            },
            print_speed: opts.print_speed,
            travel_speed: opts.travel_speed,
            stop_and_go: opts.stop_and_go,
        };
        let recipe = Recipe::new(commands, metadata);
        tracing::info!(
            "built recipe: {} commands over {} paths, {:.3} mm path length, {} jumps, {} warnings",
            recipe.len(),
            recipe.metadata().path_count,
            recipe.path_length(),
            jumps.len(),
            warnings.len()
        );

        Ok(BuildOutput {
            recipe,
            jumps,
            warnings,
        })
    }

    fn place(&self, path: &PathEntity) -> PathEntity {
        let (dx, dy) = (self.options.origin_offset.x, self.options.origin_offset.y);
        let vertices = path
            .vertices
            .iter()
            .map(|v| {
                let moved = v.translated(dx, dy);
                match self.options.z_height {
                    Some(z) => moved.with_z(z),
                    None => moved,
                }
            })
            .collect();
        PathEntity {
            vertices,
            ..path.clone()
        }
    }

    fn check_bounds(&self, path: &PathEntity) -> Result<(), OutOfBoundsError> {
        for (vertex_index, vertex) in path.vertices.iter().enumerate() {
            if let Some((axis, side, limit)) = self.options.workspace.violation(vertex) {
                return Err(OutOfBoundsError {
                    vertex: *vertex,
                    sequence_id: Some(path.sequence_id),
                    vertex_index,
                    axis,
                    side,
                    limit,
                });
            }
        }
        Ok(())
    }

    fn filter(&self, path: &PathEntity) -> Vec<Point> {
        let epsilon = self.options.dedupe_epsilon;
        let mut vertices = geometry::dedupe(&path.vertices, epsilon);
        if path.closed && vertices.len() > 2 {
            if let (Some(first), Some(last)) = (vertices.first(), vertices.last()) {
                if first.distance_xy(last) < epsilon {
                    vertices.pop();
                }
            }
        }
        geometry::collapse_colinear(&vertices, self.options.colinear_tolerance)
    }

    fn emit(
        &self,
        paths: &[PathEntity],
        median: f64,
    ) -> Result<(Vec<Command>, Vec<Origin>, Vec<JumpWarning>), ValidationError> {
        let opts = &self.options;
        let threshold = opts.jump_multiple * median;
        let mut commands = Vec::new();
        let mut origins = Vec::new();
        let mut jumps = Vec::new();
        let mut cursor: Option<Point> = None;
        let mut vertex_index = 0usize;

        for path in paths {
            let start = path.vertices[0];
            let continuous = cursor.is_some_and(|c| c.distance(&start) < opts.dedupe_epsilon);
            if !continuous {
                commands.push(Command::Move {
                    to: start,
                    kind: MoveKind::Travel,
                    speed: opts.travel_speed,
                });
                origins.push(Origin {
                    sequence_id: path.sequence_id,
                    vertex_index,
                });
            }
            vertex_index += 1;

            for (from, to) in print_segments(path) {
                let origin = Origin {
                    sequence_id: path.sequence_id,
                    vertex_index,
                };
                if opts.stop_and_go {
                    let count = self.hop_count(from.distance_xy(&to));
                    if commands.len().saturating_add(count) > MAX_RECIPE_COMMANDS {
                        return Err(ValidationError::InvalidParameter {
                            name: "hop_spacing".into(),
                            reason: format!(
                                "recipe would exceed {} commands",
                                MAX_RECIPE_COMMANDS
                            ),
                        });
                    }
                    for command in self.hops(from, to, count) {
                        commands.push(command);
                        origins.push(origin);
                    }
                } else {
                    commands.push(Command::Move {
                        to,
                        kind: MoveKind::Print,
                        speed: opts.print_speed,
                    });
                    origins.push(origin);
                }

                let distance = from.distance_xy(&to);
                if median > 0.0 && distance > threshold {
                    jumps.push(JumpWarning {
                        sequence_id: path.sequence_id,
                        vertex_index,
                        command_index: commands.len() - 1,
                        distance,
                        median,
                    });
                }
                vertex_index += 1;
            }
            cursor = commands.last().and_then(Command::target);
        }
        Ok((commands, origins, jumps))
    }

    /// Hops needed so none is longer than the hop spacing
    fn hop_count(&self, length: f64) -> usize {
        // Saturating float cast; the caller bounds the result.
        ((length / self.options.hop_spacing - 1e-9).ceil() as usize).max(1)
    }

    /// `count` equal hops, each followed by a dwell
    fn hops(&self, from: Point, to: Point, count: usize) -> Vec<Command> {
        let opts = &self.options;
        let hop = from.distance_xy(&to) / count as f64;
        let dwell_ms = (hop / opts.print_speed * 1000.0 * opts.dwell_scale).round() as u64;
        (1..=count)
            .map(|i| Command::HopDwell {
                at: if i == count {
                    to
                } else {
                    from.lerp(&to, i as f64 / count as f64)
                },
                dwell_ms,
            })
            .collect()
    }
}

/// Print segments of a filtered path, including the closing edge
fn print_segments(path: &PathEntity) -> Vec<(Point, Point)> {
    let mut segments: Vec<(Point, Point)> =
        path.vertices.windows(2).map(|w| (w[0], w[1])).collect();
    if path.closed && path.vertices.len() > 2 {
        if let (Some(first), Some(last)) = (path.vertices.first(), path.vertices.last()) {
            segments.push((*last, *first));
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(raw: &[(f64, f64)]) -> Vec<Point> {
        raw.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    fn builder(options: BuildOptions) -> RecipeBuilder {
        RecipeBuilder::new(options).unwrap()
    }

    #[test]
    fn test_speed_outside_envelope_is_rejected() {
        let err = RecipeBuilder::new(BuildOptions {
            print_speed: 2.0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidSpeed { ref name, .. } if name == "print_speed"
        ));

        // just inside the three-axis vector limit
        assert!(RecipeBuilder::new(BuildOptions {
            travel_speed: 1.7,
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn test_closed_path_returns_to_start() {
        let square = PathEntity::closed(0, pts(&[(1.0, 1.0), (3.0, 1.0), (3.0, 3.0), (1.0, 3.0)]));
        let output = builder(BuildOptions::default()).build(&[square]).unwrap();
        let commands = output.recipe.commands();
        assert_eq!(commands.len(), 5);
        assert_eq!(commands[4].target(), Some(Point::new(1.0, 1.0)));
        assert_eq!(output.recipe.metadata().vertex_count, 4);
    }

    #[test]
    fn test_travel_between_disjoint_paths_only() {
        let a = PathEntity::open(0, pts(&[(0.0, 0.0), (5.0, 0.0)]));
        let b = PathEntity::open(1, pts(&[(5.0, 0.0), (5.0, 5.0)]));
        let c = PathEntity::open(2, pts(&[(10.0, 10.0), (12.0, 10.0)]));
        let output = builder(BuildOptions::default()).build(&[a, b, c]).unwrap();
        let kinds: Vec<_> = output
            .recipe
            .commands()
            .iter()
            .map(|c| match c {
                Command::Move { kind, .. } => *kind,
                other => panic!("unexpected command {other}"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                MoveKind::Travel,
                MoveKind::Print,
                MoveKind::Print,
                MoveKind::Travel,
                MoveKind::Print
            ]
        );
    }

    #[test]
    fn test_single_vertex_path_is_dropped() {
        let dot = PathEntity::open(7, pts(&[(1.0, 1.0), (1.0, 1.0)]));
        let line = PathEntity::open(8, pts(&[(1.0, 1.0), (2.0, 1.0)]));
        let output = builder(BuildOptions::default()).build(&[dot, line]).unwrap();
        assert_eq!(
            output.warnings,
            vec![GeometryWarning::DegeneratePath {
                sequence_id: 7,
                vertices: 1
            }]
        );
        assert_eq!(output.recipe.len(), 2);
    }

    #[test]
    fn test_nothing_printable_is_an_error() {
        let dot = PathEntity::open(0, pts(&[(1.0, 1.0)]));
        assert_eq!(
            builder(BuildOptions::default()).build(&[dot]),
            Err(ValidationError::EmptyGeometry)
        );
    }

    #[test]
    fn test_hop_spacing_below_minimum_is_rejected() {
        let err = RecipeBuilder::new(BuildOptions {
            stop_and_go: true,
            hop_spacing: 1e-12,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidParameter { ref name, .. } if name == "hop_spacing"
        ));
    }

    #[test]
    fn test_hop_expansion_is_bounded() {
        let wide = depokit_core::AxisLimits::new(0.0, 2000.0);
        let line = PathEntity::open(0, pts(&[(0.0, 0.0), (1500.0, 0.0)]));
        let err = builder(BuildOptions {
            stop_and_go: true,
            hop_spacing: MIN_HOP_SPACING,
            workspace: WorkspaceBounds {
                x: wide,
                y: wide,
                z: wide,
            },
            ..Default::default()
        })
        .build(&[line])
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidParameter { ref name, .. } if name == "hop_spacing"
        ));
    }

    #[test]
    fn test_z_height_is_attached() {
        let line = PathEntity::open(0, pts(&[(1.0, 1.0), (2.0, 1.0)]));
        let output = builder(BuildOptions {
            z_height: Some(4.0),
            ..Default::default()
        })
        .build(&[line])
        .unwrap();
        assert!(output
            .recipe
            .commands()
            .iter()
            .all(|c| c.target().and_then(|p| p.z) == Some(4.0)));
    }

    #[test]
    fn test_compensation_records_offset() {
        let square = PathEntity::closed(0, pts(&[(1.0, 1.0), (9.0, 1.0), (9.0, 9.0), (1.0, 9.0)]));
        let output = builder(BuildOptions {
            compensate: true,
            nozzle_diameter: 1.0,
            ..Default::default()
        })
        .build(&[square])
        .unwrap();
        let bbox = output.recipe.metadata().bounding_box.unwrap();
        assert!((bbox.min_x - 1.5).abs() < 1e-6);
        assert!((bbox.max_y - 8.5).abs() < 1e-6);
        assert_eq!(output.recipe.metadata().nozzle_offset, 0.5);
    }
}
