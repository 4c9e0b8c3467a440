//! Target selection strategies.
//!
//! A policy looks at the robot and the remaining world entities and names the
//! next cell to travel to. It never moves the robot itself; the simulation
//! walks the route and resolves what happens on arrival, then asks again.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Position, agent::Agent};

/// Read-only view of the entities a policy can choose from.
#[derive(Debug, Clone, Copy)]
pub struct WorldView<'a> {
    pub packages: &'a [Position],
    pub goals: &'a [Position],
    pub recharger: Option<Position>,
}

/// Why a target was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionMode {
    Nearest,
    LastDelivery,
    Emergency,
    CriticalMargin,
    Opportunistic,
    NearbyPackage,
    Deliver,
    Collect,
    Fallback,
    LowBattery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub target: Position,
    pub mode: DecisionMode,
}

impl Decision {
    pub const fn new(target: Position, mode: DecisionMode) -> Self {
        Decision { target, mode }
    }
}

/// Trait defining how the robot picks its next target.
pub trait AgentPolicy: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Maximum number of packages this strategy is willing to carry.
    fn cargo_capacity(&self) -> u32;

    /// Returns the next cell to travel to, or `None` when no action is viable.
    ///
    /// Must only read its inputs: the same state always yields the same decision.
    fn choose_target(&self, agent: &Agent, world: &WorldView<'_>) -> Option<Decision>;
}

/// Selects a policy implementation at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    #[default]
    CostAware,
    Nearest,
}

impl PolicyKind {
    pub fn build(self, config: &PolicyConfig) -> Box<dyn AgentPolicy> {
        match self {
            PolicyKind::CostAware => Box::new(CostAwarePolicy::new(config.clone())),
            PolicyKind::Nearest => Box::new(NearestTargetPolicy),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::CostAware => f.write_str("cost-aware"),
            PolicyKind::Nearest => f.write_str("nearest"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown policy '{0}' (expected cost-aware or nearest)")]
pub struct UnknownPolicy(pub String);

impl FromStr for PolicyKind {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cost-aware" | "smart" => Ok(PolicyKind::CostAware),
            "nearest" | "default" => Ok(PolicyKind::Nearest),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

fn distance(a: Position, b: Position) -> i32 {
    i32::try_from(a.manhattan_distance(&b)).unwrap_or(i32::MAX)
}

/// Nearest cell in `cells`; the first one wins ties.
fn nearest(from: Position, cells: &[Position]) -> Option<Position> {
    cells.iter().copied().min_by_key(|cell| distance(from, *cell))
}

fn nearest_distance(from: Position, cells: &[Position]) -> Option<i32> {
    cells.iter().map(|cell| distance(from, *cell)).min()
}

/// Goes to the nearest package when empty-handed, otherwise to the nearest goal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestTargetPolicy;

impl AgentPolicy for NearestTargetPolicy {
    fn name(&self) -> &'static str {
        "nearest"
    }

    fn cargo_capacity(&self) -> u32 {
        1
    }

    fn choose_target(&self, agent: &Agent, world: &WorldView<'_>) -> Option<Decision> {
        let candidates = if !agent.has_cargo() && !world.packages.is_empty() {
            world.packages
        } else {
            world.goals
        };
        nearest(agent.position, candidates).map(|target| Decision::new(target, DecisionMode::Nearest))
    }
}

/// Default scaling factor applied to the weight-dependent parameters.
pub const DEFAULT_WEIGHT: f64 = 2.8;

/// Tunable parameters of [`CostAwarePolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub cargo_capacity: u32,
    /// Points expected per delivery when valuing targets.
    pub delivery_reward: f64,
    /// Targets this close are always considered reachable.
    pub close_radius: i32,
    /// Extra battery over the recharger distance below which the robot heads home.
    pub critical_margin: i32,
    pub opportunistic_radius: i32,
    pub opportunistic_threshold: i32,
    /// Battery kept in reserve on top of target-plus-return distance.
    pub safety_margin: i32,
    pub min_battery_base: f64,
    pub min_battery_cap: f64,
    pub nearby_package_range: f64,
    pub max_path_deviation: f64,
    /// Estimated extra cost per step walked without battery.
    pub stranded_surcharge: f64,
}

impl PolicyConfig {
    /// Parameters with the weight-dependent values scaled by `weight`.
    pub fn weighted(weight: f64) -> Self {
        let mut config = PolicyConfig {
            cargo_capacity: 4,
            delivery_reward: 50.0,
            close_radius: 3,
            critical_margin: 5,
            opportunistic_radius: 3,
            opportunistic_threshold: 45,
            safety_margin: 5,
            min_battery_base: 0.0,
            min_battery_cap: 40.0,
            nearby_package_range: 0.0,
            max_path_deviation: 0.0,
            stranded_surcharge: 4.0,
        };
        config.apply_weight(weight);
        config
    }

    pub fn apply_weight(&mut self, weight: f64) {
        self.min_battery_base = 15.0 * weight;
        self.nearby_package_range = 5.0 * weight;
        self.max_path_deviation = 3.0 * weight;
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig::weighted(DEFAULT_WEIGHT)
    }
}

/// Battery-aware strategy weighing travel cost and risk against delivery reward.
#[derive(Debug, Clone, Default)]
pub struct CostAwarePolicy {
    config: PolicyConfig,
}

impl CostAwarePolicy {
    pub fn new(config: PolicyConfig) -> Self {
        CostAwarePolicy { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Checks whether `point` lies near the direct route from `start` to `end`.
    pub fn is_on_path(&self, point: Position, start: Position, end: Position) -> bool {
        let deviation = self.config.max_path_deviation;
        let direct = distance(start, end) as f64;
        let detour = (distance(start, point) + distance(point, end)) as f64;

        let (px, py) = (point.x as f64, point.y as f64);
        let min_x = start.x.min(end.x) as f64 - deviation;
        let max_x = start.x.max(end.x) as f64 + deviation;
        let min_y = start.y.min(end.y) as f64 - deviation;
        let max_y = start.y.max(end.y) as f64 + deviation;
        let in_bounds = (min_x..=max_x).contains(&px) && (min_y..=max_y).contains(&py);

        detour <= direct + deviation && in_bounds
    }

    /// Net value of travelling to `target`, then back to the recharger.
    pub fn delivery_value(&self, agent: &Agent, target: Position, recharger: Option<Position>) -> f64 {
        let delivery_distance = distance(agent.position, target);
        let return_distance = recharger.map_or(0, |r| distance(target, r));
        let total_steps = (delivery_distance + return_distance) as f64;

        let mut battery_cost = total_steps;
        if agent.battery < delivery_distance {
            battery_cost += (delivery_distance - agent.battery) as f64 * self.config.stranded_surcharge;
        }

        self.config.delivery_reward - battery_cost - total_steps
    }

    /// Delivery value plus partial credit for packages picked up along the way.
    pub fn path_value(&self, agent: &Agent, target: Position, world: &WorldView<'_>) -> f64 {
        let here = agent.position;
        let base = self.delivery_value(agent, target, world.recharger);
        let mut extra = 0.0;
        let mut spare = agent.cargo_capacity.saturating_sub(agent.cargo);
        let direct = distance(here, target) as f64;

        for &package in world.packages {
            if spare == 0 {
                break;
            }
            if !self.is_on_path(package, here, target) {
                continue;
            }
            let goal_distance = nearest_distance(package, world.goals).unwrap_or(0) as f64;
            let alignment = 1.0 - distance(here, package) as f64 / (direct + 1.0);
            extra += self.config.delivery_reward * alignment - goal_distance * 0.5;
            spare -= 1;
        }

        base + extra
    }

    /// Packages within the nearby range, most valuable first.
    fn nearby_packages(&self, here: Position, world: &WorldView<'_>) -> Vec<(f64, Position)> {
        let mut nearby: Vec<(f64, Position)> = world
            .packages
            .iter()
            .copied()
            .filter(|package| distance(here, *package) as f64 <= self.config.nearby_package_range)
            .map(|package| {
                let goal_distance = nearest_distance(package, world.goals).unwrap_or(0) as f64;
                let value = self.config.delivery_reward
                    - distance(here, package) as f64 * 2.0
                    - goal_distance * 0.5;
                (value, package)
            })
            .collect();
        nearby.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        nearby
    }

    fn min_battery(&self, recharger_distance: i32) -> f64 {
        (self.config.min_battery_base + (recharger_distance / 3) as f64).min(self.config.min_battery_cap)
    }

    fn last_delivery(&self, agent: &Agent, world: &WorldView<'_>, goal: Position) -> Option<Decision> {
        let here = agent.position;
        let goal_distance = distance(here, goal);

        if agent.has_cargo() {
            if agent.battery >= goal_distance {
                return Some(Decision::new(goal, DecisionMode::LastDelivery));
            }
            // The goal is only attempted directly when the battery covers it
            return match world.recharger {
                Some(recharger) if recharger != here => {
                    debug!(battery = agent.battery, "last delivery needs a recharge first");
                    Some(Decision::new(recharger, DecisionMode::LastDelivery))
                }
                _ => {
                    debug!(battery = agent.battery, goal_distance, "last delivery out of reach");
                    None
                }
            };
        }

        if world.packages.is_empty() {
            return None;
        }

        let mut best: Option<(i32, Position)> = None;
        for &package in world.packages {
            let total = distance(here, package) + distance(package, goal);
            if total <= agent.battery && best.is_none_or(|(best_total, _)| total < best_total) {
                best = Some((total, package));
            }
        }
        if let Some((_, package)) = best {
            return Some(Decision::new(package, DecisionMode::LastDelivery));
        }

        match world.recharger {
            Some(recharger) if recharger != here => {
                debug!(battery = agent.battery, "last pickup needs a recharge first");
                Some(Decision::new(recharger, DecisionMode::LastDelivery))
            }
            _ => {
                debug!(battery = agent.battery, "no affordable package for the last delivery");
                None
            }
        }
    }

    fn critical_margin(&self, agent: &Agent, world: &WorldView<'_>, recharger: Position) -> Decision {
        let here = agent.position;
        let within_reach = |cells: &[Position]| {
            cells
                .iter()
                .copied()
                .filter(|cell| distance(here, *cell) <= self.config.close_radius)
                .min_by_key(|cell| distance(here, *cell))
        };

        let close_target = if agent.has_cargo() {
            within_reach(world.goals)
        } else {
            within_reach(world.packages)
        };

        match close_target {
            Some(target) => {
                debug!(battery = agent.battery, %target, "finishing a close task before recharging");
                Decision::new(target, DecisionMode::CriticalMargin)
            }
            None => {
                debug!(battery = agent.battery, "battery critical, heading to recharger");
                Decision::new(recharger, DecisionMode::CriticalMargin)
            }
        }
    }

    /// Highest-valued candidate that is either close or battery-safe.
    fn best_safe_target(
        &self,
        agent: &Agent,
        world: &WorldView<'_>,
        candidates: &[Position],
    ) -> Option<Position> {
        let here = agent.position;
        let mut best: Option<(f64, Position)> = None;

        for &candidate in candidates {
            let direct = distance(here, candidate);
            let return_leg = world.recharger.map_or(0, |r| distance(candidate, r));
            let safe = agent.battery >= direct + return_leg + self.config.safety_margin;
            if direct > self.config.close_radius && !safe {
                continue;
            }
            let value = self.path_value(agent, candidate, world);
            if best.is_none_or(|(best_value, _)| value > best_value) {
                best = Some((value, candidate));
            }
        }

        best.map(|(_, target)| target)
    }

    fn normal_mode(
        &self,
        agent: &Agent,
        world: &WorldView<'_>,
        available_recharger: Option<Position>,
    ) -> Option<Decision> {
        let here = agent.position;

        if agent.has_spare_capacity() {
            for (_, package) in self.nearby_packages(here, world) {
                let package_distance = distance(here, package);
                if agent.battery >= package_distance || package_distance <= self.config.close_radius {
                    return Some(Decision::new(package, DecisionMode::NearbyPackage));
                }
            }
        }

        let fallback = || {
            debug!(battery = agent.battery, "no safe target, falling back to recharger");
            available_recharger.map(|r| Decision::new(r, DecisionMode::Fallback))
        };

        if agent.has_cargo() {
            return match self.best_safe_target(agent, world, world.goals) {
                Some(goal) => Some(Decision::new(goal, DecisionMode::Deliver)),
                None => fallback(),
            };
        }

        if !world.packages.is_empty() {
            return match self.best_safe_target(agent, world, world.packages) {
                Some(package) => Some(Decision::new(package, DecisionMode::Collect)),
                None => fallback(),
            };
        }

        let recharger_distance = world.recharger.map_or(0, |r| distance(here, r));
        match available_recharger {
            Some(recharger) if (agent.battery as f64) < self.min_battery(recharger_distance) => {
                Some(Decision::new(recharger, DecisionMode::LowBattery))
            }
            _ => None,
        }
    }
}

impl AgentPolicy for CostAwarePolicy {
    fn name(&self) -> &'static str {
        "cost-aware"
    }

    fn cargo_capacity(&self) -> u32 {
        self.config.cargo_capacity
    }

    fn choose_target(&self, agent: &Agent, world: &WorldView<'_>) -> Option<Decision> {
        let here = agent.position;

        if let [goal] = world.goals {
            return self.last_delivery(agent, world, *goal);
        }

        // Standing on the recharger already restored the battery
        let available_recharger = world.recharger.filter(|r| *r != here);

        if let Some(recharger) = available_recharger {
            let recharger_distance = distance(here, recharger);

            // Zero margin: leaving the recharge this late is deliberate.
            if agent.battery <= recharger_distance {
                warn!(
                    battery = agent.battery,
                    recharger_distance, "emergency recharge"
                );
                return Some(Decision::new(recharger, DecisionMode::Emergency));
            }

            if agent.battery <= recharger_distance + self.config.critical_margin {
                return Some(self.critical_margin(agent, world, recharger));
            }

            if recharger_distance <= self.config.opportunistic_radius
                && agent.battery < self.config.opportunistic_threshold
            {
                return Some(Decision::new(recharger, DecisionMode::Opportunistic));
            }
        }

        self.normal_mode(agent, world, available_recharger)
    }
}
