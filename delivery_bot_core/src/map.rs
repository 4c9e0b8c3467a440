use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::Position;

/// Represents errors that can occur within the grid operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Coordinates ({x}, {y}) are out of bounds for grid size ({width}, {height})")]
    OutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },
}

/// Neighbor offsets in expansion order. Pathfinding results depend on this order.
pub const NEIGHBOR_OFFSETS: [(isize, isize); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// A generic 2D grid structure.
///
/// Stores elements of type `T` in a flat vector using row-major order.
/// Provides methods for accessing and modifying elements via (x, y) coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    /// Creates a new grid with the specified dimensions, filled with default values.
    ///
    /// # Panics
    ///
    /// Panics if `width * height` overflows `usize`.
    pub fn new(width: usize, height: usize) -> Self
    where
        T: Default + Clone,
    {
        let size = width.checked_mul(height).expect("Grid size overflow");
        Grid {
            width,
            height,
            cells: vec![T::default(); size],
        }
    }

    /// Creates a new grid with the specified dimensions, filled by a generator function.
    ///
    /// The generator function `f` takes `(x, y)` coordinates and returns the value for that cell.
    ///
    /// # Panics
    ///
    /// Panics if `width * height` overflows `usize`.
    pub fn from_generator<F>(width: usize, height: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> T,
    {
        let size = width.checked_mul(height).expect("Grid size overflow");
        let mut cells = Vec::with_capacity(size);
        for y in 0..height {
            for x in 0..width {
                cells.push(f(x, y));
            }
        }
        Grid {
            width,
            height,
            cells,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Converts (x, y) coordinates to a flat vector index.
    ///
    /// Returns `None` if the coordinates are out of bounds.
    #[inline]
    pub fn coords_to_index(&self, x: usize, y: usize) -> Option<usize> {
        if self.is_valid(x, y) {
            Some(y * self.width + x)
        } else {
            None
        }
    }

    /// Checks if the given coordinates are within the grid boundaries.
    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }

    /// Gets an immutable reference to the cell at the given coordinates.
    ///
    /// Returns `None` if the coordinates are out of bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        let index = self.coords_to_index(x, y)?;
        self.cells.get(index)
    }

    /// Sets the value of the cell at the given coordinates.
    ///
    /// Returns `Ok(())` on success, or `Err(GridError::OutOfBounds)` if the
    /// coordinates are invalid.
    pub fn set(&mut self, x: usize, y: usize, value: T) -> Result<(), GridError> {
        let index = self.coords_to_index(x, y).ok_or(GridError::OutOfBounds {
            x,
            y,
            width: self.width,
            height: self.height,
        })?;
        self.cells[index] = value;
        Ok(())
    }

    /// Returns an iterator that yields `(Position, &T)` for each cell in row-major order.
    pub fn enumerate(&self) -> impl Iterator<Item = (Position, &T)> {
        let width = self.width;
        self.cells
            .iter()
            .enumerate()
            .map(move |(index, cell)| (Position::new(index % width, index / width), cell))
    }
}

/// Indexing using Position coordinates for access
impl<T> Index<Position> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Position) -> &Self::Output {
        match self.coords_to_index(index.x, index.y) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid size ({}, {})",
                index.x, index.y, self.width, self.height
            ),
        }
    }
}

/// Occupancy grid for one episode. `true` cells are obstacles.
///
/// Built once by a world loader or generator, then only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridMap {
    obstacles: Grid<bool>,
}

impl GridMap {
    /// Creates an obstacle-free map.
    pub fn new(width: usize, height: usize) -> Self {
        GridMap {
            obstacles: Grid::new(width, height),
        }
    }

    /// Creates a map where `is_obstacle(x, y)` decides each cell.
    pub fn from_fn<F>(width: usize, height: usize, is_obstacle: F) -> Self
    where
        F: FnMut(usize, usize) -> bool,
    {
        GridMap {
            obstacles: Grid::from_generator(width, height, is_obstacle),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.obstacles.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.obstacles.height()
    }

    #[inline]
    pub fn in_bounds(&self, position: Position) -> bool {
        self.obstacles.is_valid(position.x, position.y)
    }

    /// Marks a cell as an obstacle.
    pub fn set_obstacle(&mut self, position: Position) -> Result<(), GridError> {
        self.obstacles.set(position.x, position.y, true)
    }

    /// Returns true if the cell is in bounds and blocked.
    #[inline]
    pub fn is_obstacle(&self, position: Position) -> bool {
        matches!(self.obstacles.get(position.x, position.y), Some(true))
    }

    /// Returns true iff the cell is in bounds and not an obstacle.
    #[inline]
    pub fn is_walkable(&self, position: Position) -> bool {
        matches!(self.obstacles.get(position.x, position.y), Some(false))
    }

    /// Walkable 4-neighbors of `position`, in [`NEIGHBOR_OFFSETS`] order.
    pub fn walkable_neighbors(&self, position: Position) -> impl Iterator<Item = Position> + '_ {
        NEIGHBOR_OFFSETS
            .into_iter()
            .filter_map(move |(dx, dy)| position.offset(dx, dy))
            .filter(move |neighbor| self.is_walkable(*neighbor))
    }

    /// Iterates over obstacle cells in row-major order.
    pub fn obstacles(&self) -> impl Iterator<Item = Position> + '_ {
        self.obstacles
            .enumerate()
            .filter_map(|(position, blocked)| blocked.then_some(position))
    }

    /// Number of walkable cells.
    pub fn walkable_count(&self) -> usize {
        self.obstacles.enumerate().filter(|(_, blocked)| !**blocked).count()
    }
}

impl Index<Position> for GridMap {
    type Output = bool;

    #[inline]
    fn index(&self, index: Position) -> &Self::Output {
        &self.obstacles[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_out_of_bounds_is_an_error() {
        let mut grid: Grid<u8> = Grid::new(3, 2);
        assert_eq!(
            grid.set(3, 0, 1),
            Err(GridError::OutOfBounds {
                x: 3,
                y: 0,
                width: 3,
                height: 2
            })
        );
        assert!(grid.set(2, 1, 7).is_ok());
        assert_eq!(grid.get(2, 1), Some(&7));
        assert_eq!(grid[Position::new(2, 1)], 7);
    }

    #[test]
    fn enumerate_is_row_major() {
        let grid = Grid::from_generator(2, 2, |x, y| x + 10 * y);
        let cells: Vec<_> = grid.enumerate().map(|(p, v)| (p.x, p.y, *v)).collect();
        assert_eq!(cells, vec![(0, 0, 0), (1, 0, 1), (0, 1, 10), (1, 1, 11)]);
    }

    #[test]
    fn walkability_respects_bounds_and_obstacles() {
        let mut map = GridMap::new(3, 3);
        map.set_obstacle(Position::new(1, 1)).unwrap();

        assert!(map.is_walkable(Position::new(0, 0)));
        assert!(!map.is_walkable(Position::new(1, 1)));
        assert!(map.is_obstacle(Position::new(1, 1)));
        assert!(!map.is_walkable(Position::new(3, 0)));
        assert!(!map.is_obstacle(Position::new(3, 0)));
        assert!(map[Position::new(1, 1)]);
        assert_eq!(map.walkable_count(), 8);
        assert_eq!(map.obstacles().collect::<Vec<_>>(), vec![Position::new(1, 1)]);
    }

    #[test]
    fn neighbors_follow_offset_order_and_skip_blocked() {
        let map = GridMap::from_fn(3, 3, |x, y| x == 2 && y == 1);
        let neighbors: Vec<_> = map.walkable_neighbors(Position::new(1, 1)).collect();
        assert_eq!(
            neighbors,
            vec![
                Position::new(0, 1),
                Position::new(1, 2),
                Position::new(1, 0),
            ]
        );

        let corner: Vec<_> = map.walkable_neighbors(Position::new(0, 0)).collect();
        assert_eq!(corner, vec![Position::new(1, 0), Position::new(0, 1)]);
    }
}
