//! Nozzle compensation
//!
//! Closed paths are offset by half the nozzle diameter with
//! `cavalier_contours`. A positive diameter moves the path inward. Open
//! and self-intersecting paths pass through unchanged with a warning.

use cavalier_contours::polyline::{PlineSource, PlineSourceMut, PlineVertex, Polyline};
use depokit_core::Point;

use crate::builder::GeometryWarning;
use crate::geometry::{self, PathEntity};

const DUPLICATE_TOLERANCE: f64 = 1e-6;

/// Outcome of compensating one path
#[derive(Debug, Clone, PartialEq)]
pub struct Compensated {
    /// Resulting paths; empty if the offset consumed the shape
    pub paths: Vec<PathEntity>,
    /// Warning raised for this path, if any
    pub warning: Option<GeometryWarning>,
}

/// Offset a path by `nozzle_diameter / 2`
pub fn compensate(path: &PathEntity, nozzle_diameter: f64, arc_resolution: f64) -> Compensated {
    let unchanged = |warning| Compensated {
        paths: vec![path.clone()],
        warning,
    };
    let offset = nozzle_diameter / 2.0;
    if offset.abs() <= f64::EPSILON {
        return unchanged(None);
    }
    if !path.closed {
        return unchanged(Some(GeometryWarning::OpenPathNotCompensated {
            sequence_id: path.sequence_id,
        }));
    }

    let ring = ring_vertices(&path.vertices);
    if ring.len() < 3 {
        return unchanged(None);
    }
    if geometry::is_self_intersecting(&ring) {
        return unchanged(Some(GeometryWarning::SelfIntersecting {
            sequence_id: path.sequence_id,
        }));
    }

    let counter_clockwise = geometry::signed_area2(&ring) > 0.0;
    let polyline = clockwise_polyline(&ring, counter_clockwise);
    let offsets = polyline.parallel_offset(-offset);

    let mut paths: Vec<PathEntity> = offsets
        .iter()
        .map(|pline| {
            let mut vertices = flatten(pline, arc_resolution);
            if counter_clockwise {
                vertices.reverse();
            }
            PathEntity::closed(path.sequence_id, vertices)
        })
        .filter(|p| p.vertices.len() >= 3)
        .collect();

    let warning = match paths.len() {
        0 => Some(GeometryWarning::CompensationCollapsed {
            sequence_id: path.sequence_id,
        }),
        1 => None,
        pieces => Some(GeometryWarning::CompensationSplit {
            sequence_id: path.sequence_id,
            pieces,
        }),
    };
    if let Some(z) = path.vertices.first().and_then(|p| p.z) {
        for p in &mut paths {
            for v in &mut p.vertices {
                v.z = Some(z);
            }
        }
    }
    Compensated { paths, warning }
}

/// Vertices of a closed path without a repeated closing vertex
fn ring_vertices(vertices: &[Point]) -> Vec<Point> {
    let mut ring = geometry::dedupe(vertices, DUPLICATE_TOLERANCE);
    if ring.len() > 1 {
        if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
            if first.distance_xy(last) < DUPLICATE_TOLERANCE {
                ring.pop();
            }
        }
    }
    ring
}

fn clockwise_polyline(ring: &[Point], reverse: bool) -> Polyline {
    let mut polyline = Polyline::new();
    let mut push = |p: &Point| polyline.add_vertex(PlineVertex::new(p.x, p.y, 0.0));
    if reverse {
        ring.iter().rev().for_each(&mut push);
    } else {
        ring.iter().for_each(&mut push);
    }
    polyline.set_is_closed(true);
    polyline
}

/// Vertices of an offset result with arc segments broken into chords
fn flatten(pline: &Polyline, arc_resolution: f64) -> Vec<Point> {
    let count = pline.vertex_count();
    let mut points = Vec::with_capacity(count);
    for i in 0..count {
        let v = pline.at(i);
        let start = Point::new(v.x, v.y);
        points.push(start);
        let is_last = i + 1 == count;
        if v.bulge.abs() > 1e-9 && (!is_last || pline.is_closed()) {
            let next = pline.at((i + 1) % count);
            let end = Point::new(next.x, next.y);
            let mut arc = geometry::bulge_points(start, end, v.bulge, arc_resolution);
            // the arc end is the next vertex, pushed on its own turn
            arc.pop();
            points.extend(arc);
        }
    }
    points
}
