//! Recipes and motion commands

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Point;

/// Whether deposition is active during a move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    /// Deposition active.
    Print,
    /// Positioning only.
    Travel,
}

/// One motion command of a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Straight move to a point.
    Move {
        /// Target point
        to: Point,
        /// Print or travel
        kind: MoveKind,
        /// Path speed in mm/s
        speed: f64,
    },
    /// Stop-and-go unit: travel to `at`, then hold.
    HopDwell {
        /// Hop target
        at: Point,
        /// Hold time after arriving
        dwell_ms: u64,
    },
    /// Return all axes to machine zero.
    Home,
}

impl Command {
    /// Point this command moves to, `None` for `Home`
    pub fn target(&self) -> Option<Point> {
        match self {
            Command::Move { to, .. } => Some(*to),
            Command::HopDwell { at, .. } => Some(*at),
            Command::Home => None,
        }
    }

    /// Where the machine is expected to be once this command completed
    pub fn end_position(&self) -> Point {
        self.target().unwrap_or_else(Point::origin)
    }

    /// Whether deposition happens during this command
    pub fn is_print(&self) -> bool {
        matches!(
            self,
            Command::Move {
                kind: MoveKind::Print,
                ..
            } | Command::HopDwell { .. }
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move { to, kind, speed } => {
                let kind = match kind {
                    MoveKind::Print => "print",
                    MoveKind::Travel => "travel",
                };
                write!(f, "{} to {} at {} mm/s", kind, to, speed)
            }
            Command::HopDwell { at, dwell_ms } => {
                write!(f, "hop to {} and dwell {} ms", at, dwell_ms)
            }
            Command::Home => write!(f, "home"),
        }
    }
}

/// Axis-aligned planar bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum X
    pub min_x: f64,
    /// Minimum Y
    pub min_y: f64,
    /// Maximum X
    pub max_x: f64,
    /// Maximum Y
    pub max_y: f64,
}

impl BoundingBox {
    /// Degenerate box around a single point
    pub fn around(point: &Point) -> Self {
        Self {
            min_x: point.x,
            min_y: point.y,
            max_x: point.x,
            max_y: point.y,
        }
    }

    /// Bounding box of a set of points, `None` when empty
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = Self::around(first);
        for point in iter {
            bbox.include(point);
        }
        Some(bbox)
    }

    /// Grow to include a point
    pub fn include(&mut self, point: &Point) {
        self.min_x = self.min_x.min(point.x);
        self.min_y = self.min_y.min(point.y);
        self.max_x = self.max_x.max(point.x);
        self.max_y = self.max_y.max(point.y);
    }

    /// Grow to include another box
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Extent along X
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Extent along Y
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Centre point
    pub fn center(&self) -> Point {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }
}

/// Descriptive data carried alongside a recipe's commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeMetadata {
    /// Source drawing file name
    pub source: Option<String>,
    /// Sub-paths that produced commands
    pub path_count: usize,
    /// Retained vertices across all sub-paths
    pub vertex_count: usize,
    /// Bounding box of every command target
    pub bounding_box: Option<BoundingBox>,
    /// Applied nozzle compensation offset in mm, positive is inward
    pub nozzle_offset: f64,
    /// Print speed in mm/s
    pub print_speed: f64,
    /// Travel speed in mm/s
    pub travel_speed: f64,
    /// Whether print moves were replaced by hop-dwell units
    pub stop_and_go: bool,
}

/// An ordered, immutable sequence of motion commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    commands: Vec<Command>,
    metadata: RecipeMetadata,
}

impl Recipe {
    /// Assemble a recipe from already validated commands
    pub fn new(commands: Vec<Command>, metadata: RecipeMetadata) -> Self {
        Self { commands, metadata }
    }

    /// Commands in execution order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Command at `index`
    pub fn get(&self, index: usize) -> Option<&Command> {
        self.commands.get(index)
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the recipe has no commands
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Metadata
    pub fn metadata(&self) -> &RecipeMetadata {
        &self.metadata
    }

    /// Position of the first command, the positioning target before a run
    pub fn first_position(&self) -> Option<Point> {
        self.commands.first().and_then(Command::target)
    }

    /// Where the machine should stand before dispatching `index`
    ///
    /// For index 0 this is the first command's own position, otherwise
    /// the end position of the command at `index - 1`.
    pub fn expected_position_before(&self, index: usize) -> Option<Point> {
        match index {
            0 => self.first_position(),
            i => self.commands.get(i - 1).map(Command::end_position),
        }
    }

    /// Summed planar path length over all commands, starting at the first target
    pub fn path_length(&self) -> f64 {
        let mut total = 0.0;
        let mut previous: Option<Point> = None;
        for command in &self.commands {
            let end = command.end_position();
            if let Some(prev) = previous {
                total += prev.distance_xy(&end);
            }
            previous = Some(end);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> RecipeMetadata {
        RecipeMetadata {
            source: None,
            path_count: 1,
            vertex_count: 3,
            bounding_box: None,
            nozzle_offset: 0.0,
            print_speed: 0.5,
            travel_speed: 1.0,
            stop_and_go: false,
        }
    }

    fn recipe() -> Recipe {
        Recipe::new(
            vec![
                Command::Move {
                    to: Point::new(1.0, 1.0),
                    kind: MoveKind::Travel,
                    speed: 1.0,
                },
                Command::Move {
                    to: Point::new(4.0, 5.0),
                    kind: MoveKind::Print,
                    speed: 0.5,
                },
                Command::Home,
            ],
            metadata(),
        )
    }

    #[test]
    fn test_expected_position_before() {
        let recipe = recipe();
        assert_eq!(recipe.expected_position_before(0), Some(Point::new(1.0, 1.0)));
        assert_eq!(recipe.expected_position_before(1), Some(Point::new(1.0, 1.0)));
        assert_eq!(recipe.expected_position_before(2), Some(Point::new(4.0, 5.0)));
        assert_eq!(recipe.expected_position_before(3), Some(Point::origin()));
        assert_eq!(recipe.expected_position_before(9), None);
    }

    #[test]
    fn test_path_length() {
        assert_eq!(recipe().path_length(), 5.0 + 41f64.sqrt());
    }

    #[test]
    fn test_command_serialization_is_tagged() {
        let json = serde_json::to_string(&Command::HopDwell {
            at: Point::new(1.0, 2.0),
            dwell_ms: 10,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"hop_dwell\""));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert!(back.is_print());
    }

    #[test]
    fn test_bounding_box() {
        let points = [Point::new(1.0, 4.0), Point::new(-2.0, 3.0), Point::new(0.0, 9.0)];
        let bbox = BoundingBox::from_points(points.iter()).unwrap();
        assert_eq!(bbox.width(), 3.0);
        assert_eq!(bbox.height(), 6.0);
        assert_eq!(bbox.center(), Point::new(-0.5, 6.5));
        assert!(BoundingBox::from_points(std::iter::empty()).is_none());
    }
}
