//! Seeded random world generation.
//!
//! Produces a square warehouse-like floor: short broken wall segments in both
//! directions plus one solid support block, with packages, goals and the
//! start placed on distinct free cells and a recharger near the center.
//! The caller owns the RNG, so the same seed always yields the same world.

use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    Position,
    map::GridMap,
    world::{World, WorldError},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Side length of the square grid.
    pub size: usize,
    /// Number of goals; packages get `spare_packages` extra.
    pub deliveries: usize,
    pub spare_packages: usize,
    pub horizontal_segments: usize,
    pub vertical_segments: usize,
    /// Probability that a cell on a wall segment is actually blocked.
    pub wall_density: f64,
}

impl GeneratorConfig {
    /// Rejects settings the generator cannot honour.
    pub fn validate(&self) -> Result<(), WorldError> {
        if !(0.0..=1.0).contains(&self.wall_density) {
            return Err(WorldError::InvalidConfig(format!(
                "wall_density must be within [0, 1], got {}",
                self.wall_density
            )));
        }
        if self.size == 0 {
            return Err(WorldError::InvalidConfig("size must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            size: 30,
            deliveries: 4,
            spare_packages: 1,
            horizontal_segments: 7,
            vertical_segments: 7,
            wall_density: 0.7,
        }
    }
}

/// Generates a validated world using `rng`.
pub fn generate_world<R: Rng + ?Sized>(
    config: &GeneratorConfig,
    rng: &mut R,
) -> Result<World, WorldError> {
    config.validate()?;
    let map = generate_obstacles(config, rng);

    let mut free: Vec<Position> = (0..config.size)
        .flat_map(|y| (0..config.size).map(move |x| Position::new(x, y)))
        .filter(|pos| map.is_walkable(*pos))
        .collect();
    free.shuffle(rng);

    let package_count = config.deliveries + config.spare_packages;
    let packages = take_cells(&mut free, package_count, "packages")?;
    let goals = take_cells(&mut free, config.deliveries, "goals")?;
    let start = take_cells(&mut free, 1, "the start position")?[0];

    let recharger = place_recharger(config.size, &map, &packages, &goals, start, rng);
    if recharger.is_none() {
        warn!("no free cell near the center, world has no recharger");
    }

    let world = World {
        map,
        start,
        packages,
        goals,
        recharger,
    };
    world.validate()?;
    debug!(
        size = config.size,
        obstacles = world.map.obstacles().count(),
        "generated world"
    );
    Ok(world)
}

fn take_cells(
    free: &mut Vec<Position>,
    count: usize,
    entity: &'static str,
) -> Result<Vec<Position>, WorldError> {
    if free.len() < count {
        return Err(WorldError::NoFreeCell { entity });
    }
    Ok(free.split_off(free.len() - count))
}

/// Broken horizontal and vertical segments plus one 4x4 or 6x6 block.
fn generate_obstacles<R: Rng + ?Sized>(config: &GeneratorConfig, rng: &mut R) -> GridMap {
    let size = config.size;
    let mut blocked = vec![false; size * size];

    // Segments need room for a 5..=10 run away from the edges
    if size >= 11 {
        for _ in 0..config.horizontal_segments {
            let row = rng.random_range(5..=size - 6);
            let start = rng.random_range(0..=size - 10);
            let length = rng.random_range(5..=10);
            for col in start..(start + length).min(size) {
                if rng.random_bool(config.wall_density) {
                    blocked[row * size + col] = true;
                }
            }
        }

        for _ in 0..config.vertical_segments {
            let col = rng.random_range(5..=size - 6);
            let start = rng.random_range(0..=size - 10);
            let length = rng.random_range(5..=10);
            for row in start..(start + length).min(size) {
                if rng.random_bool(config.wall_density) {
                    blocked[row * size + col] = true;
                }
            }
        }
    }

    let block = if rng.random_bool(0.5) { 4 } else { 6 };
    if size >= block {
        let top = rng.random_range(0..=size - block);
        let left = rng.random_range(0..=size - block);
        for row in top..top + block {
            for col in left..left + block {
                blocked[row * size + col] = true;
            }
        }
    }

    GridMap::from_fn(size, size, |x, y| blocked[y * size + x])
}

/// Picks a free, unoccupied cell in the 3x3 block around the center.
fn place_recharger<R: Rng + ?Sized>(
    size: usize,
    map: &GridMap,
    packages: &[Position],
    goals: &[Position],
    start: Position,
    rng: &mut R,
) -> Option<Position> {
    let center = size / 2;
    let mut candidates: Vec<Position> = (center.saturating_sub(1)..=center + 1)
        .flat_map(|y| (center.saturating_sub(1)..=center + 1).map(move |x| Position::new(x, y)))
        .filter(|pos| {
            map.is_walkable(*pos)
                && *pos != start
                && !packages.contains(pos)
                && !goals.contains(pos)
        })
        .collect();
    candidates.shuffle(rng);
    candidates.pop()
}
