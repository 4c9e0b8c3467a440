use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Position, map::GridMap};

/// Errors raised while building or validating a world.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("Map string is empty.")]
    EmptyMap,
    #[error("Map has zero width.")]
    ZeroWidth,
    #[error("Inconsistent width at row {row}: expected {expected}, found {found}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Unknown map code '{code}' at position ({x}, {y}).")]
    UnknownCode { code: String, x: usize, y: usize },
    #[error("No start position ('ST') found in map.")]
    MissingStart,
    #[error("Multiple start positions ('ST') found.")]
    MultipleStarts,
    #[error("Multiple rechargers ('RC') found.")]
    MultipleRechargers,
    #[error("{entity} at {position} is out of bounds.")]
    OutOfBounds {
        entity: &'static str,
        position: Position,
    },
    #[error("{entity} at {position} is inside an obstacle.")]
    OnObstacle {
        entity: &'static str,
        position: Position,
    },
    #[error("{position} is used by more than one entity.")]
    Overlap { position: Position },
    #[error("Not enough free cells to place {entity}.")]
    NoFreeCell { entity: &'static str },
    #[error("Invalid generator setting: {0}")]
    InvalidConfig(String),
}

/// Everything an episode starts from: the obstacle map and entity placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    pub map: GridMap,
    pub start: Position,
    pub packages: Vec<Position>,
    pub goals: Vec<Position>,
    pub recharger: Option<Position>,
}

impl World {
    /// Checks that every entity sits on its own walkable cell.
    ///
    /// The start cell may coincide with nothing else; packages, goals and the
    /// recharger must all be distinct.
    pub fn validate(&self) -> Result<(), WorldError> {
        let entities = std::iter::once(("Start", self.start))
            .chain(self.packages.iter().map(|p| ("Package", *p)))
            .chain(self.goals.iter().map(|g| ("Goal", *g)))
            .chain(self.recharger.iter().map(|r| ("Recharger", *r)));

        let mut seen = HashSet::new();
        for (entity, position) in entities {
            if !self.map.in_bounds(position) {
                return Err(WorldError::OutOfBounds { entity, position });
            }
            if self.map.is_obstacle(position) {
                return Err(WorldError::OnObstacle { entity, position });
            }
            if !seen.insert(position) {
                return Err(WorldError::Overlap { position });
            }
        }
        Ok(())
    }
}

/// Loads a world from a string representation of a map.
///
/// Each row is a whitespace-separated list of two-letter codes:
///
/// | code | cell |
/// |------|------|
/// | `ST` | start position (exactly one) |
/// | `BL` | free floor |
/// | `WL` | obstacle |
/// | `PK` | package |
/// | `GL` | delivery goal |
/// | `RC` | recharger (at most one) |
pub fn load_world_from_string(map_string: &str) -> Result<World, WorldError> {
    let lines: Vec<&str> = map_string.trim().lines().collect();
    if lines.is_empty() {
        return Err(WorldError::EmptyMap);
    }

    let height = lines.len();
    let mut width = 0;
    let mut parsed_rows: Vec<Vec<&str>> = Vec::with_capacity(height);

    for (y, line) in lines.iter().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if y == 0 {
            width = tokens.len();
            if width == 0 {
                return Err(WorldError::ZeroWidth);
            }
        } else if tokens.len() != width {
            return Err(WorldError::RaggedRow {
                row: y,
                expected: width,
                found: tokens.len(),
            });
        }
        parsed_rows.push(tokens);
    }

    let mut map = GridMap::new(width, height);
    let mut start: Option<Position> = None;
    let mut packages = Vec::new();
    let mut goals = Vec::new();
    let mut recharger: Option<Position> = None;

    for (y, row_tokens) in parsed_rows.iter().enumerate() {
        for (x, token) in row_tokens.iter().enumerate() {
            let pos = Position { x, y };
            match *token {
                "ST" => {
                    if start.replace(pos).is_some() {
                        return Err(WorldError::MultipleStarts);
                    }
                }
                "BL" => {}
                "WL" => map
                    .set_obstacle(pos)
                    .map_err(|_| WorldError::OutOfBounds {
                        entity: "Wall",
                        position: pos,
                    })?,
                "PK" => packages.push(pos),
                "GL" => goals.push(pos),
                "RC" => {
                    if recharger.replace(pos).is_some() {
                        return Err(WorldError::MultipleRechargers);
                    }
                }
                unknown => {
                    return Err(WorldError::UnknownCode {
                        code: unknown.to_string(),
                        x,
                        y,
                    });
                }
            }
        }
    }

    let world = World {
        map,
        start: start.ok_or(WorldError::MissingStart)?,
        packages,
        goals,
        recharger,
    };
    world.validate()?;
    Ok(world)
}

/// Renders a world back into the map format read by [`load_world_from_string`].
pub fn world_to_string(world: &World) -> String {
    let mut out = String::new();
    for y in 0..world.map.height() {
        let row: Vec<&str> = (0..world.map.width())
            .map(|x| {
                let pos = Position { x, y };
                if pos == world.start {
                    "ST"
                } else if world.map.is_obstacle(pos) {
                    "WL"
                } else if world.recharger == Some(pos) {
                    "RC"
                } else if world.packages.contains(&pos) {
                    "PK"
                } else if world.goals.contains(&pos) {
                    "GL"
                } else {
                    "BL"
                }
            })
            .collect();
        out.push_str(&row.join(" "));
        out.push('\n');
    }
    out
}
