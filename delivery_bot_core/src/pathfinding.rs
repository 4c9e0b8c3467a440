//! Shortest-path search over a [`GridMap`].
//!
//! All searches expand the same 4-neighborhood with unit step cost and differ
//! only in how frontier entries are prioritized:
//!
//! * [`Algorithm::AStar`]: accumulated cost plus Manhattan distance to the goal.
//! * [`Algorithm::Dijkstra`]: accumulated cost only.
//! * [`Algorithm::GreedyBestFirst`]: Manhattan distance only. Fewer expansions,
//!   but the route it returns is not guaranteed to be the shortest.
//!
//! A returned path excludes the start cell and ends at the goal. An empty path
//! means there is nothing to walk: the goal is unreachable, blocked, out of
//! bounds, or equal to the start.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, HashSet},
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{Position, map::GridMap};

/// Ordered cells from (exclusive) start to (inclusive) goal.
pub type Path = Vec<Position>;

/// Selects the frontier ordering used by [`find_path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    AStar,
    Dijkstra,
    #[serde(rename = "greedy")]
    GreedyBestFirst,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [
        Algorithm::AStar,
        Algorithm::Dijkstra,
        Algorithm::GreedyBestFirst,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::AStar => "astar",
            Algorithm::Dijkstra => "dijkstra",
            Algorithm::GreedyBestFirst => "greedy",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pathfinding algorithm '{0}' (expected astar, dijkstra or greedy)")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "astar" | "a*" => Ok(Algorithm::AStar),
            "dijkstra" | "ucs" => Ok(Algorithm::Dijkstra),
            "greedy" | "gbfs" => Ok(Algorithm::GreedyBestFirst),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Frontier entry. Ordered so that `BinaryHeap` pops the lowest priority first,
/// breaking ties by the lowest position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PrioritizedItem {
    priority: usize,
    position: Position,
}

impl Ord for PrioritizedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.position.cmp(&self.position))
    }
}

impl PartialOrd for PrioritizedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Finds a route from `start` to `goal` using the selected algorithm.
///
/// Returns an empty path when no route exists; this is a normal outcome.
pub fn find_path(start: Position, goal: Position, map: &GridMap, algorithm: Algorithm) -> Path {
    if !map.is_walkable(goal) {
        return Vec::new();
    }

    match algorithm {
        Algorithm::AStar => cost_guided_search(start, goal, map, true),
        Algorithm::Dijkstra => cost_guided_search(start, goal, map, false),
        Algorithm::GreedyBestFirst => greedy_best_first(start, goal, map),
    }
}

/// Uniform-cost search, optionally guided by the Manhattan heuristic (A*).
///
/// A cell is re-parented whenever a cheaper route to it is found and is
/// expanded at most once.
fn cost_guided_search(start: Position, goal: Position, map: &GridMap, use_heuristic: bool) -> Path {
    let priority = |cost: usize, position: &Position| {
        if use_heuristic {
            cost + position.manhattan_distance(&goal)
        } else {
            cost
        }
    };

    let mut frontier = BinaryHeap::new();
    let mut came_from: HashMap<Position, Position> = HashMap::new();
    let mut cost_so_far: HashMap<Position, usize> = HashMap::new();
    let mut closed: HashSet<Position> = HashSet::new();

    frontier.push(PrioritizedItem {
        priority: priority(0, &start),
        position: start,
    });
    cost_so_far.insert(start, 0);

    while let Some(PrioritizedItem {
        position: current, ..
    }) = frontier.pop()
    {
        if current == goal {
            return reconstruct_path(&came_from, start, goal);
        }

        // Stale duplicates of an already expanded cell
        if !closed.insert(current) {
            continue;
        }

        let current_cost = cost_so_far[&current];
        for neighbor in map.walkable_neighbors(current) {
            if closed.contains(&neighbor) {
                continue;
            }

            let new_cost = current_cost + 1;
            if cost_so_far
                .get(&neighbor)
                .is_none_or(|&known| new_cost < known)
            {
                cost_so_far.insert(neighbor, new_cost);
                came_from.insert(neighbor, current);
                frontier.push(PrioritizedItem {
                    priority: priority(new_cost, &neighbor),
                    position: neighbor,
                });
            }
        }
    }

    Vec::new()
}

/// Greedy best-first search: always expands the cell closest to the goal.
///
/// A cell's predecessor is fixed when it is first discovered.
fn greedy_best_first(start: Position, goal: Position, map: &GridMap) -> Path {
    let mut frontier = BinaryHeap::new();
    let mut came_from: HashMap<Position, Position> = HashMap::new();
    let mut discovered: HashSet<Position> = HashSet::new();

    frontier.push(PrioritizedItem {
        priority: start.manhattan_distance(&goal),
        position: start,
    });
    discovered.insert(start);

    while let Some(PrioritizedItem {
        position: current, ..
    }) = frontier.pop()
    {
        if current == goal {
            return reconstruct_path(&came_from, start, goal);
        }

        for neighbor in map.walkable_neighbors(current) {
            if discovered.insert(neighbor) {
                came_from.insert(neighbor, current);
                frontier.push(PrioritizedItem {
                    priority: neighbor.manhattan_distance(&goal),
                    position: neighbor,
                });
            }
        }
    }

    Vec::new()
}

/// Walks the predecessor map back from `goal`, excluding `start`.
fn reconstruct_path(
    came_from: &HashMap<Position, Position>,
    start: Position,
    goal: Position,
) -> Path {
    let mut path = Vec::new();
    let mut current = goal;

    while current != start {
        path.push(current);
        match came_from.get(&current) {
            Some(previous) => current = *previous,
            None => return Vec::new(),
        }
    }

    path.reverse();
    path
}

/// Checks that `path` walks from `start` one 4-neighbor step at a time over
/// walkable cells.
pub fn is_valid_walk(start: Position, path: &[Position], map: &GridMap) -> bool {
    let mut current = start;
    for next in path {
        if !current.is_adjacent(next) || !map.is_walkable(*next) {
            return false;
        }
        current = *next;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use proptest::prelude::*;

    use super::*;

    /// Breadth-first reference distance.
    fn bfs_distance(start: Position, goal: Position, map: &GridMap) -> Option<usize> {
        if !map.is_walkable(goal) {
            return None;
        }
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0)]);
        while let Some((current, dist)) = queue.pop_front() {
            if current == goal {
                return Some(dist);
            }
            for neighbor in map.walkable_neighbors(current) {
                if seen.insert(neighbor) {
                    queue.push_back((neighbor, dist + 1));
                }
            }
        }
        None
    }

    /// 5x5 map with a wall in column 2 open only at the bottom row.
    fn walled_map() -> GridMap {
        GridMap::from_fn(5, 5, |x, y| x == 2 && y < 4)
    }

    #[test]
    fn straight_line_on_open_grid() {
        let map = GridMap::new(5, 5);
        for algorithm in Algorithm::ALL {
            let path = find_path(Position::new(0, 0), Position::new(4, 0), &map, algorithm);
            assert_eq!(
                path,
                vec![
                    Position::new(1, 0),
                    Position::new(2, 0),
                    Position::new(3, 0),
                    Position::new(4, 0),
                ],
                "{algorithm}"
            );
        }
    }

    #[test]
    fn routes_around_wall() {
        let map = walled_map();
        let start = Position::new(0, 0);
        let goal = Position::new(4, 0);
        for algorithm in Algorithm::ALL {
            let path = find_path(start, goal, &map, algorithm);
            assert_eq!(path.last(), Some(&goal));
            assert!(is_valid_walk(start, &path, &map));
            assert!(path.contains(&Position::new(2, 4)));
        }
        assert_eq!(find_path(start, goal, &map, Algorithm::AStar).len(), 12);
        assert_eq!(find_path(start, goal, &map, Algorithm::Dijkstra).len(), 12);
    }

    #[test]
    fn unreachable_or_blocked_goal_yields_empty_path() {
        let enclosed = GridMap::from_fn(5, 5, |x, y| (x == 3 && y <= 4) || (x == 4 && y == 3));
        let blocked = walled_map();
        for algorithm in Algorithm::ALL {
            assert!(find_path(Position::new(0, 0), Position::new(4, 4), &enclosed, algorithm).is_empty());
            assert!(find_path(Position::new(0, 0), Position::new(2, 1), &blocked, algorithm).is_empty());
            assert!(find_path(Position::new(0, 0), Position::new(9, 9), &blocked, algorithm).is_empty());
        }
    }

    #[test]
    fn start_equal_to_goal_yields_empty_path() {
        let map = GridMap::new(3, 3);
        for algorithm in Algorithm::ALL {
            assert!(find_path(Position::new(1, 1), Position::new(1, 1), &map, algorithm).is_empty());
        }
    }

    #[test]
    fn greedy_can_be_suboptimal() {
        // A pocket that lures greedy search toward the goal before it has to back out.
        //   . . . . . . .
        //   . # # # # # .
        //   . . . . . # .
        //   S . . . . # G
        let map = GridMap::from_fn(7, 4, |x, y| (y == 1 && (1..=5).contains(&x)) || (x == 5 && y >= 2));
        let start = Position::new(0, 3);
        let goal = Position::new(6, 3);
        let optimal = find_path(start, goal, &map, Algorithm::AStar);
        let greedy = find_path(start, goal, &map, Algorithm::GreedyBestFirst);
        assert_eq!(Some(optimal.len()), bfs_distance(start, goal, &map));
        assert!(greedy.len() >= optimal.len());
        assert!(is_valid_walk(start, &greedy, &map));
        assert_eq!(greedy.last(), Some(&goal));
    }

    #[test]
    fn algorithm_parses_and_displays() {
        for algorithm in Algorithm::ALL {
            assert_eq!(algorithm.to_string().parse::<Algorithm>(), Ok(algorithm));
        }
        assert_eq!("A*".parse::<Algorithm>(), Ok(Algorithm::AStar));
        assert!("bfs".parse::<Algorithm>().is_err());
    }

    #[test]
    fn ties_break_deterministically() {
        let map = GridMap::new(6, 6);
        let start = Position::new(0, 0);
        let goal = Position::new(5, 5);
        for algorithm in Algorithm::ALL {
            let first = find_path(start, goal, &map, algorithm);
            let second = find_path(start, goal, &map, algorithm);
            assert_eq!(first, second);
        }
    }

    fn arb_map() -> impl Strategy<Value = GridMap> {
        (3usize..10, 3usize..10).prop_flat_map(|(w, h)| {
            proptest::collection::vec(proptest::bool::weighted(0.3), w * h)
                .prop_map(move |cells| GridMap::from_fn(w, h, |x, y| cells[y * w + x]))
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn optimal_searches_match_bfs(map in arb_map(), seed in any::<(usize, usize, usize, usize)>()) {
            let start = Position::new(seed.0 % map.width(), seed.1 % map.height());
            let goal = Position::new(seed.2 % map.width(), seed.3 % map.height());
            prop_assume!(map.is_walkable(start));

            let reference = bfs_distance(start, goal, &map);
            let astar = find_path(start, goal, &map, Algorithm::AStar);
            let dijkstra = find_path(start, goal, &map, Algorithm::Dijkstra);
            let greedy = find_path(start, goal, &map, Algorithm::GreedyBestFirst);

            match reference {
                Some(0) | None => {
                    prop_assert!(astar.is_empty());
                    prop_assert!(dijkstra.is_empty());
                    prop_assert!(greedy.is_empty());
                }
                Some(distance) => {
                    prop_assert_eq!(astar.len(), distance);
                    prop_assert_eq!(dijkstra.len(), distance);
                    prop_assert!(greedy.len() >= distance);
                    for path in [&astar, &dijkstra, &greedy] {
                        prop_assert!(is_valid_walk(start, path, &map));
                        prop_assert_eq!(path.last(), Some(&goal));
                    }
                }
            }
        }
    }
}
