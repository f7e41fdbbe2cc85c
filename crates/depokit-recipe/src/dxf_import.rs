//! DXF import
//!
//! Extracts LINE, LWPOLYLINE, POLYLINE, ARC and CIRCLE entities from the
//! drawing and from its named blocks, converts them to millimetres and
//! normalises the origin. Curves are flattened to chords.

use depokit_core::{BoundingBox, LengthUnit, Point};
use dxf::entities::EntityType;
use dxf::Drawing;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

use crate::error::DxfImportError;
use crate::geometry::{self, PathEntity};

/// Where the imported geometry's origin is moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginMode {
    /// Bounding box minimum becomes (0, 0)
    #[default]
    LowerLeft,
    /// Bounding box centre becomes (0, 0)
    Center,
    /// Drawing coordinates are kept
    None,
}

impl FromStr for OriginMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lower_left" | "lower-left" => Ok(Self::LowerLeft),
            "center" | "centre" => Ok(Self::Center),
            "none" => Ok(Self::None),
            _ => Err(format!("Unknown origin mode: {}", s)),
        }
    }
}

/// Import parameters
#[derive(Debug, Clone, PartialEq)]
pub struct DxfImportOptions {
    /// Unit to assume instead of the drawing header
    pub unit_override: Option<LengthUnit>,
    /// Origin normalisation
    pub origin: OriginMode,
    /// Chord length for arcs and circles, in mm
    pub arc_resolution: f64,
    /// Split LINE entities into chords of `arc_resolution`
    pub interpolate_lines: bool,
    /// Vertices closer than this, in mm, are merged on import
    pub close_threshold: f64,
}

impl Default for DxfImportOptions {
    fn default() -> Self {
        Self {
            unit_override: None,
            origin: OriginMode::LowerLeft,
            arc_resolution: 1.0,
            interpolate_lines: false,
            close_threshold: 5e-5,
        }
    }
}

/// Paths read from a drawing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedGeometry {
    /// Paths in millimetres after origin normalisation
    pub paths: Vec<PathEntity>,
    /// Drawing unit the values were converted from
    pub unit: LengthUnit,
    /// Millimetres per drawing unit
    pub scale_to_mm: f64,
    /// Number of paths
    pub path_count: usize,
    /// Number of vertices over all paths
    pub vertex_count: usize,
    /// Bounding box after normalisation
    pub bounding_box: Option<BoundingBox>,
    /// Total planar length in mm
    pub total_length: f64,
    /// Import findings
    pub warnings: Vec<String>,
}

const MIN_ARC_SEGMENTS: usize = 2;
const MIN_CIRCLE_SEGMENTS: usize = 3;

/// Read and import a DXF file
pub fn import_file(
    path: impl AsRef<Path>,
    options: &DxfImportOptions,
) -> Result<ImportedGeometry, DxfImportError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| DxfImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let drawing = Drawing::load(&mut reader)?;
    tracing::debug!("loaded DXF {}", path.display());
    import_drawing(&drawing, options)
}

/// Import an already parsed drawing
pub fn import_drawing(
    drawing: &Drawing,
    options: &DxfImportOptions,
) -> Result<ImportedGeometry, DxfImportError> {
    if !(options.arc_resolution.is_finite() && options.arc_resolution > 0.0) {
        return Err(DxfImportError::InvalidOption {
            name: "arc_resolution",
            reason: format!("must be positive, got {}", options.arc_resolution),
        });
    }

    let mut warnings = Vec::new();
    let code = drawing.header.default_drawing_units as i16;
    let unit = match options.unit_override {
        Some(unit) => unit,
        None => LengthUnit::from_insunits(code).unwrap_or_else(|| {
            if code != 0 {
                warnings.push(format!("unsupported $INSUNITS {}, assuming mm", code));
            }
            LengthUnit::Millimeter
        }),
    };
    let scale = unit.to_mm();

    let mut extractor = Extractor {
        scale,
        options,
        warnings,
        paths: Vec::new(),
    };
    for entity in drawing.entities() {
        extractor.entity(&entity.specific);
    }
    for block in drawing.blocks() {
        // layout blocks mirror model and paper space
        if block.name.starts_with('*') {
            continue;
        }
        for entity in &block.entities {
            extractor.entity(&entity.specific);
        }
    }
    let Extractor {
        mut paths,
        mut warnings,
        ..
    } = extractor;

    if paths.is_empty() {
        warnings.push("No drawable entities found".into());
    }

    let raw_bounds = BoundingBox::from_points(paths.iter().flat_map(|p| p.vertices.iter()));
    let (dx, dy) = match (options.origin, raw_bounds) {
        (OriginMode::LowerLeft, Some(b)) => (-b.min_x, -b.min_y),
        (OriginMode::Center, Some(b)) => {
            let c = b.center();
            (-c.x, -c.y)
        }
        _ => (0.0, 0.0),
    };
    for path in &mut paths {
        for v in &mut path.vertices {
            *v = v.translated(dx, dy);
        }
    }

    for warning in &warnings {
        tracing::warn!("DXF import: {}", warning);
    }
    let geometry = ImportedGeometry {
        unit,
        scale_to_mm: scale,
        path_count: paths.len(),
        vertex_count: paths.iter().map(|p| p.vertices.len()).sum(),
        bounding_box: BoundingBox::from_points(paths.iter().flat_map(|p| p.vertices.iter())),
        total_length: paths.iter().map(PathEntity::length).sum(),
        warnings,
        paths,
    };
    tracing::info!(
        "imported {} paths, {} vertices, {:.3} mm total length (unit {})",
        geometry.path_count,
        geometry.vertex_count,
        geometry.total_length,
        geometry.unit
    );
    Ok(geometry)
}

struct Extractor<'a> {
    scale: f64,
    options: &'a DxfImportOptions,
    warnings: Vec<String>,
    paths: Vec<PathEntity>,
}

impl Extractor<'_> {
    fn mm(&self, x: f64, y: f64) -> Point {
        Point::new(x * self.scale, y * self.scale)
    }

    fn push(&mut self, vertices: Vec<Point>, closed: bool) {
        let vertices = geometry::dedupe(&vertices, self.options.close_threshold);
        if vertices.len() < 2 {
            return;
        }
        let sequence_id = self.paths.len() as u32;
        self.paths.push(PathEntity {
            sequence_id,
            vertices,
            closed,
        });
    }

    fn entity(&mut self, entity: &EntityType) {
        let resolution = self.options.arc_resolution;
        match entity {
            EntityType::Line(line) => {
                let from = self.mm(line.p1.x, line.p1.y);
                let to = self.mm(line.p2.x, line.p2.y);
                let mut vertices = vec![from];
                if self.options.interpolate_lines {
                    vertices.extend(geometry::interpolate(from, to, resolution));
                } else {
                    vertices.push(to);
                }
                self.push(vertices, false);
            }
            EntityType::Circle(circle) => {
                let center = self.mm(circle.center.x, circle.center.y);
                let radius = circle.radius * self.scale;
                let mut vertices = geometry::arc_points(
                    center,
                    radius,
                    0.0,
                    std::f64::consts::TAU,
                    resolution,
                    MIN_CIRCLE_SEGMENTS,
                );
                vertices.pop();
                self.push(vertices, true);
            }
            EntityType::Arc(arc) => {
                let center = self.mm(arc.center.x, arc.center.y);
                let radius = arc.radius * self.scale;
                let start = arc.start_angle.to_radians();
                let mut sweep = arc.end_angle.to_radians() - start;
                if sweep <= 0.0 {
                    sweep += std::f64::consts::TAU;
                }
                let vertices = geometry::arc_points(
                    center,
                    radius,
                    start,
                    sweep,
                    resolution,
                    MIN_ARC_SEGMENTS,
                );
                self.push(vertices, false);
            }
            EntityType::LwPolyline(polyline) => {
                let closed = polyline.flags & 1 != 0;
                let corners: Vec<(Point, f64)> = polyline
                    .vertices
                    .iter()
                    .map(|v| (self.mm(v.x, v.y), v.bulge))
                    .collect();
                let vertices = self.flatten_bulges(&corners, closed, "LWPOLYLINE");
                self.push(vertices, closed);
            }
            EntityType::Polyline(polyline) => {
                let closed = polyline.flags & 1 != 0;
                let corners: Vec<(Point, f64)> = polyline
                    .vertices()
                    .map(|v| (self.mm(v.location.x, v.location.y), v.bulge))
                    .collect();
                let vertices = self.flatten_bulges(&corners, closed, "POLYLINE");
                self.push(vertices, closed);
            }
            _ => {}
        }
    }

    /// Polyline corners with bulged segments broken into chords
    fn flatten_bulges(&mut self, corners: &[(Point, f64)], closed: bool, kind: &str) -> Vec<Point> {
        let mut vertices = Vec::with_capacity(corners.len());
        let mut flattened = false;
        for (i, &(point, bulge)) in corners.iter().enumerate() {
            vertices.push(point);
            let next = match corners.get(i + 1) {
                Some(&(next, _)) => next,
                None if closed => corners[0].0,
                None => break,
            };
            if bulge.abs() > 1e-9 {
                flattened = true;
                let mut arc =
                    geometry::bulge_points(point, next, bulge, self.options.arc_resolution);
                arc.pop();
                vertices.extend(arc);
            }
        }
        if flattened {
            self.warnings
                .push(format!("{} bulges flattened to chords", kind));
        }
        vertices
    }
}
