//! Planar path geometry
//!
//! Vertex filtering, segment tests and curve flattening shared by the DXF
//! importer and the recipe builder. All coordinates are millimetres.

use depokit_core::Point;
use serde::{Deserialize, Serialize};

/// One drawable sub-path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEntity {
    /// Order of the path in the source drawing
    pub sequence_id: u32,
    /// Vertices in drawing order
    pub vertices: Vec<Point>,
    /// Whether the last vertex connects back to the first
    pub closed: bool,
}

impl PathEntity {
    /// Open path
    pub fn open(sequence_id: u32, vertices: Vec<Point>) -> Self {
        Self {
            sequence_id,
            vertices,
            closed: false,
        }
    }

    /// Closed path
    pub fn closed(sequence_id: u32, vertices: Vec<Point>) -> Self {
        Self {
            sequence_id,
            vertices,
            closed: true,
        }
    }

    /// Planar length, including the closing segment
    pub fn length(&self) -> f64 {
        let mut total = polyline_length(&self.vertices);
        if self.closed {
            if let (Some(first), Some(last)) = (self.vertices.first(), self.vertices.last()) {
                total += last.distance_xy(first);
            }
        }
        total
    }
}

/// Summed segment length of an open vertex chain
pub fn polyline_length(vertices: &[Point]) -> f64 {
    vertices.windows(2).map(|w| w[0].distance_xy(&w[1])).sum()
}

/// Drop vertices closer than `epsilon` to the last kept vertex
pub fn dedupe(vertices: &[Point], epsilon: f64) -> Vec<Point> {
    let mut kept: Vec<Point> = Vec::with_capacity(vertices.len());
    for vertex in vertices {
        match kept.last() {
            Some(last) if last.distance_xy(vertex) < epsilon => {}
            _ => kept.push(*vertex),
        }
    }
    kept
}

/// Remove interior vertices of straight forward runs
///
/// A vertex is dropped when it lies within `tolerance` of the line through
/// its neighbours and between them. Reversals are kept.
pub fn collapse_colinear(vertices: &[Point], tolerance: f64) -> Vec<Point> {
    if vertices.len() < 3 {
        return vertices.to_vec();
    }
    let mut kept: Vec<Point> = Vec::with_capacity(vertices.len());
    kept.push(vertices[0]);
    for window in vertices.windows(2).skip(1) {
        let (current, next) = (window[0], window[1]);
        let anchor = kept[kept.len() - 1];
        if !is_forward_colinear(&anchor, &current, &next, tolerance) {
            kept.push(current);
        }
    }
    kept.push(vertices[vertices.len() - 1]);
    kept
}

fn is_forward_colinear(a: &Point, b: &Point, c: &Point, tolerance: f64) -> bool {
    let (abx, aby) = (b.x - a.x, b.y - a.y);
    let (acx, acy) = (c.x - a.x, c.y - a.y);
    let ac = acx.hypot(acy);
    if ac <= f64::EPSILON {
        return false;
    }
    let deviation = (abx * acy - aby * acx).abs() / ac;
    let along = (abx * acx + aby * acy) / ac;
    deviation <= tolerance && along > 0.0 && along < ac
}

/// Twice the signed area; positive for counter-clockwise
pub fn signed_area2(vertices: &[Point]) -> f64 {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let (p, q) = (vertices[i], vertices[(i + 1) % n]);
            p.x * q.y - q.x * p.y
        })
        .sum()
}

/// Median of a list of values
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

fn orientation(a: &Point, b: &Point, c: &Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn segments_cross(p1: &Point, p2: &Point, q1: &Point, q2: &Point) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// Whether any two non-adjacent edges of a closed ring cross
pub fn is_self_intersecting(ring: &[Point]) -> bool {
    let n = ring.len();
    if n < 4 {
        return false;
    }
    let edge = |i: usize| (ring[i], ring[(i + 1) % n]);
    for i in 0..n {
        let (a1, a2) = edge(i);
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            let (b1, b2) = edge(j);
            if segments_cross(&a1, &a2, &b1, &b2) {
                return true;
            }
        }
    }
    false
}

/// Points along a circular arc, both ends included
///
/// Angles are radians; `sweep` is signed. The chord count follows from
/// `resolution` with a floor of `min_segments`.
pub fn arc_points(
    center: Point,
    radius: f64,
    start_angle: f64,
    sweep: f64,
    resolution: f64,
    min_segments: usize,
) -> Vec<Point> {
    let arc_length = radius.abs() * sweep.abs();
    let segments = ((arc_length / resolution).ceil() as usize).max(min_segments.max(1));
    (0..=segments)
        .map(|i| {
            let angle = start_angle + sweep * i as f64 / segments as f64;
            Point::new(
                center.x + radius * angle.cos(),
                center.y + radius * angle.sin(),
            )
        })
        .collect()
}

/// Flatten a bulged segment into chords, excluding the start point
///
/// `bulge` is the tangent of a quarter of the included angle, positive for
/// counter-clockwise arcs.
pub fn bulge_points(from: Point, to: Point, bulge: f64, resolution: f64) -> Vec<Point> {
    let chord = from.distance_xy(&to);
    if bulge.abs() < 1e-9 || chord <= f64::EPSILON {
        return vec![to];
    }
    let sweep = 4.0 * bulge.atan();
    let radius = chord * (1.0 + bulge * bulge) / (4.0 * bulge.abs());
    let to_center = chord * (1.0 - bulge * bulge) / (4.0 * bulge);
    let (ux, uy) = ((to.x - from.x) / chord, (to.y - from.y) / chord);
    let center = Point::new(
        (from.x + to.x) / 2.0 - uy * to_center,
        (from.y + to.y) / 2.0 + ux * to_center,
    );
    let start_angle = (from.y - center.y).atan2(from.x - center.x);
    let mut points = arc_points(center, radius, start_angle, sweep, resolution, 2);
    points.remove(0);
    if let Some(last) = points.last_mut() {
        *last = to;
    }
    points
}

/// Split a straight segment into steps no longer than `resolution`,
/// excluding the start point
pub fn interpolate(from: Point, to: Point, resolution: f64) -> Vec<Point> {
    let length = from.distance_xy(&to);
    let steps = ((length / resolution).ceil() as usize).max(1);
    (1..=steps)
        .map(|i| from.lerp(&to, i as f64 / steps as f64))
        .collect()
}
