use serde::{Deserialize, Serialize};

pub mod agent;
pub mod generator;
pub mod map;
pub mod pathfinding;
pub mod policy;
pub mod simulation;
pub mod world;

/// Represents a 2D grid coordinate.
///
/// Ordered by `x` first, then `y`. The pathfinder relies on this order to
/// break ties between frontier entries of equal priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub const fn new(x: usize, y: usize) -> Self {
        Position { x, y }
    }

    /// Returns the Manhattan distance between two positions.
    pub fn manhattan_distance(&self, other: &Position) -> usize {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// Returns the position offset by `(dx, dy)`, or `None` on underflow/overflow.
    pub fn offset(&self, dx: isize, dy: isize) -> Option<Position> {
        Some(Position {
            x: self.x.checked_add_signed(dx)?,
            y: self.y.checked_add_signed(dy)?,
        })
    }

    /// Returns true if `other` is exactly one 4-directional step away.
    pub fn is_adjacent(&self, other: &Position) -> bool {
        self.manhattan_distance(other) == 1
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(usize, usize)> for Position {
    fn from((x, y): (usize, usize)) -> Self {
        Position { x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manhattan_distance_is_symmetric() {
        let a = Position::new(1, 7);
        let b = Position::new(4, 2);
        assert_eq!(a.manhattan_distance(&b), 8);
        assert_eq!(b.manhattan_distance(&a), 8);
        assert_eq!(a.manhattan_distance(&a), 0);
    }

    #[test]
    fn offset_rejects_negative_coordinates() {
        let origin = Position::new(0, 0);
        assert_eq!(origin.offset(-1, 0), None);
        assert_eq!(origin.offset(1, 0), Some(Position::new(1, 0)));
    }

    #[test]
    fn ordering_is_x_then_y() {
        assert!(Position::new(0, 9) < Position::new(1, 0));
        assert!(Position::new(2, 1) < Position::new(2, 3));
    }
}
