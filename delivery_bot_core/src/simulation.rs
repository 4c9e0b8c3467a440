//! Episode driver.
//!
//! Each call to [`Simulation::tick`] performs one unit of work:
//!
//! * `SelectTarget`: ask the policy for a target and plan a route to it.
//! * `Navigate`: walk one cell of the planned route, paying for the step.
//! * `ResolveArrival`: pick up or deliver at the final cell.
//!
//! The episode ends when every goal has been served, when the policy has no
//! viable target, or when a chosen target cannot be reached. Running out of
//! battery is never fatal; it only makes each further step more expensive.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    Position,
    agent::Agent,
    map::GridMap,
    pathfinding::{Algorithm, Path, find_path},
    policy::{AgentPolicy, Decision, WorldView},
    world::{World, WorldError},
};

/// Scoring and battery parameters of an episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub algorithm: Algorithm,
    /// Battery level restored by the recharger.
    pub battery_capacity: i32,
    /// Starting battery; the full capacity when unset.
    pub initial_battery: Option<i32>,
    pub delivery_reward: i64,
    pub step_cost: i64,
    /// Penalty for a step started with an empty battery.
    pub stranded_step_cost: i64,
    /// Host-level safety net on the number of ticks.
    pub max_ticks: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            algorithm: Algorithm::default(),
            battery_capacity: 70,
            initial_battery: None,
            delivery_reward: 50,
            step_cost: 1,
            stranded_step_cost: 5,
            max_ticks: None,
        }
    }
}

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Every goal received a delivery.
    Completed,
    /// The policy found no safe or affordable action.
    NoViableTarget,
    /// The chosen target has no walkable route from the robot.
    UnreachablePath { target: Position },
    TickLimit,
}

impl Termination {
    pub fn is_success(&self) -> bool {
        matches!(self, Termination::Completed)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Completed => f.write_str("all deliveries completed"),
            Termination::NoViableTarget => f.write_str("no viable action"),
            Termination::UnreachablePath { target } => write!(f, "unreachable target {target}"),
            Termination::TickLimit => f.write_str("tick limit reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SelectTarget,
    Navigate,
    ResolveArrival,
    Terminated(Termination),
}

/// Final tallies of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeOutcome {
    pub termination: Termination,
    pub score: i64,
    pub steps: usize,
    pub deliveries: usize,
    pub battery: i32,
    pub cargo: u32,
}

/// Notifications emitted after each committed change, for renderers and logs.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    TargetChosen { decision: Decision },
    PathPlanned { target: Position, length: usize },
    Moved {
        position: Position,
        battery: i32,
        score: i64,
        stranded: bool,
    },
    Pickup { position: Position, cargo: u32 },
    Delivery {
        position: Position,
        cargo: u32,
        score: i64,
    },
    Recharge { position: Position, battery: i32 },
    PathFailure { target: Position },
    EpisodeEnd { outcome: EpisodeOutcome },
}

impl fmt::Display for SimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimEvent::TargetChosen { decision } => {
                write!(f, "target {} ({:?})", decision.target, decision.mode)
            }
            SimEvent::PathPlanned { target, length } => {
                write!(f, "path to {target}: {length} steps")
            }
            SimEvent::Moved {
                position,
                battery,
                stranded,
                ..
            } => {
                if *stranded {
                    write!(f, "moved to {position} without battery ({battery})")
                } else {
                    write!(f, "moved to {position} (battery {battery})")
                }
            }
            SimEvent::Pickup { position, cargo } => {
                write!(f, "package collected at {position}, cargo {cargo}")
            }
            SimEvent::Delivery {
                position,
                cargo,
                score,
            } => write!(
                f,
                "package delivered at {position}, cargo {cargo}, score {score}"
            ),
            SimEvent::Recharge { position, battery } => {
                write!(f, "recharged at {position} to {battery}")
            }
            SimEvent::PathFailure { target } => write!(f, "no path found to {target}"),
            SimEvent::EpisodeEnd { outcome } => write!(
                f,
                "episode over: {} (score {}, steps {})",
                outcome.termination, outcome.score, outcome.steps
            ),
        }
    }
}

/// Owns the mutable state of one episode and drives it to termination.
#[derive(Debug)]
pub struct Simulation {
    map: GridMap,
    agent: Agent,
    packages: Vec<Position>,
    goals: Vec<Position>,
    recharger: Option<Position>,
    policy: Box<dyn AgentPolicy>,
    config: SimulationConfig,
    score: i64,
    steps: usize,
    deliveries: usize,
    ticks: usize,
    target: Option<Decision>,
    path: Path,
    next_index: usize,
    phase: Phase,
}

impl Simulation {
    /// Starts an episode on `world` driven by `policy`.
    pub fn new(
        world: World,
        policy: Box<dyn AgentPolicy>,
        config: SimulationConfig,
    ) -> Result<Self, WorldError> {
        world.validate()?;

        let battery = config.initial_battery.unwrap_or(config.battery_capacity);
        let agent = Agent::new(
            world.start,
            battery,
            config.battery_capacity,
            policy.cargo_capacity(),
        );
        debug!(
            policy = policy.name(),
            algorithm = %config.algorithm,
            packages = world.packages.len(),
            goals = world.goals.len(),
            "episode started"
        );

        Ok(Simulation {
            map: world.map,
            agent,
            packages: world.packages,
            goals: world.goals,
            recharger: world.recharger,
            policy,
            config,
            score: 0,
            steps: 0,
            deliveries: 0,
            ticks: 0,
            target: None,
            path: Vec::new(),
            next_index: 0,
            phase: Phase::SelectTarget,
        })
    }

    pub fn map(&self) -> &GridMap {
        &self.map
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn packages(&self) -> &[Position] {
        &self.packages
    }

    pub fn goals(&self) -> &[Position] {
        &self.goals
    }

    pub fn recharger(&self) -> Option<Position> {
        self.recharger
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn score(&self) -> i64 {
        self.score
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn deliveries(&self) -> usize {
        self.deliveries
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Terminated(_))
    }

    /// The decision currently being executed, if any.
    pub fn current_target(&self) -> Option<Decision> {
        self.target
    }

    /// The most recently planned route.
    pub fn path(&self) -> &[Position] {
        &self.path
    }

    /// Cells of the current route not yet walked.
    pub fn remaining_path(&self) -> &[Position] {
        self.path.get(self.next_index..).unwrap_or(&[])
    }

    /// Why the episode ended, or `None` while it runs.
    pub fn termination(&self) -> Option<Termination> {
        match self.phase {
            Phase::Terminated(reason) => Some(reason),
            _ => None,
        }
    }

    fn outcome_with(&self, termination: Termination) -> EpisodeOutcome {
        EpisodeOutcome {
            termination,
            score: self.score,
            steps: self.steps,
            deliveries: self.deliveries,
            battery: self.agent.battery,
            cargo: self.agent.cargo,
        }
    }

    /// The final outcome, once the episode has ended.
    pub fn outcome(&self) -> Option<EpisodeOutcome> {
        self.termination().map(|reason| self.outcome_with(reason))
    }

    /// Advances the episode by one unit of work and returns what happened.
    pub fn tick(&mut self) -> Vec<SimEvent> {
        let mut events = Vec::new();

        if self.is_terminated() {
            return events;
        }
        if let Some(max_ticks) = self.config.max_ticks {
            if self.ticks >= max_ticks {
                self.terminate(Termination::TickLimit, &mut events);
                return events;
            }
        }
        self.ticks += 1;

        match self.phase {
            Phase::SelectTarget => self.select_target(&mut events),
            Phase::Navigate => self.advance(&mut events),
            Phase::ResolveArrival => self.resolve_arrival(&mut events),
            Phase::Terminated(_) => {}
        }

        events
    }

    /// Ticks until the episode ends.
    pub fn run(&mut self) -> EpisodeOutcome {
        self.run_with(|_| {})
    }

    /// Ticks until the episode ends, passing every event to `observer`.
    pub fn run_with<F>(&mut self, mut observer: F) -> EpisodeOutcome
    where
        F: FnMut(&SimEvent),
    {
        loop {
            for event in self.tick() {
                observer(&event);
            }
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
        }
    }

    fn select_target(&mut self, events: &mut Vec<SimEvent>) {
        if self.goals.is_empty() {
            self.terminate(Termination::Completed, events);
            return;
        }

        let view = WorldView {
            packages: &self.packages,
            goals: &self.goals,
            recharger: self.recharger,
        };
        let Some(decision) = self.policy.choose_target(&self.agent, &view) else {
            info!(
                battery = self.agent.battery,
                cargo = self.agent.cargo,
                "no viable target"
            );
            self.terminate(Termination::NoViableTarget, events);
            return;
        };
        debug!(target = %decision.target, mode = ?decision.mode, "target chosen");
        events.push(SimEvent::TargetChosen { decision });

        let path = find_path(
            self.agent.position,
            decision.target,
            &self.map,
            self.config.algorithm,
        );
        if path.is_empty() {
            warn!(
                from = %self.agent.position,
                target = %decision.target,
                "no path found to target"
            );
            events.push(SimEvent::PathFailure {
                target: decision.target,
            });
            self.terminate(
                Termination::UnreachablePath {
                    target: decision.target,
                },
                events,
            );
            return;
        }

        events.push(SimEvent::PathPlanned {
            target: decision.target,
            length: path.len(),
        });
        self.target = Some(decision);
        self.path = path;
        self.next_index = 0;
        self.phase = Phase::Navigate;
    }

    fn advance(&mut self, events: &mut Vec<SimEvent>) {
        let Some(&next) = self.path.get(self.next_index) else {
            self.phase = Phase::ResolveArrival;
            return;
        };

        let stranded = self.agent.step_to(next);
        self.next_index += 1;
        self.steps += 1;
        self.score -= if stranded {
            self.config.stranded_step_cost
        } else {
            self.config.step_cost
        };
        events.push(SimEvent::Moved {
            position: next,
            battery: self.agent.battery,
            score: self.score,
            stranded,
        });

        if self.recharger == Some(next) {
            self.agent.recharge();
            info!(battery = self.agent.battery, "battery recharged");
            events.push(SimEvent::Recharge {
                position: next,
                battery: self.agent.battery,
            });
        }

        if self.next_index >= self.path.len() {
            self.phase = Phase::ResolveArrival;
        }
    }

    fn resolve_arrival(&mut self, events: &mut Vec<SimEvent>) {
        let here = self.agent.position;

        if let Some(index) = self.packages.iter().position(|p| *p == here) {
            if self.agent.load() {
                self.packages.remove(index);
                info!(at = %here, cargo = self.agent.cargo, "package collected");
                events.push(SimEvent::Pickup {
                    position: here,
                    cargo: self.agent.cargo,
                });
            } else {
                debug!(at = %here, "cargo full, package left in place");
            }
        } else if let Some(index) = self.goals.iter().position(|g| *g == here) {
            if self.agent.unload() {
                self.goals.remove(index);
                self.deliveries += 1;
                self.score += self.config.delivery_reward;
                info!(at = %here, cargo = self.agent.cargo, score = self.score, "package delivered");
                events.push(SimEvent::Delivery {
                    position: here,
                    cargo: self.agent.cargo,
                    score: self.score,
                });
            }
        }

        self.target = None;
        if self.goals.is_empty() {
            self.terminate(Termination::Completed, events);
        } else {
            self.phase = Phase::SelectTarget;
        }
    }

    fn terminate(&mut self, reason: Termination, events: &mut Vec<SimEvent>) {
        self.phase = Phase::Terminated(reason);
        let outcome = self.outcome_with(reason);
        info!(
            reason = %reason,
            score = outcome.score,
            steps = outcome.steps,
            deliveries = outcome.deliveries,
            battery = outcome.battery,
            "episode finished"
        );
        events.push(SimEvent::EpisodeEnd { outcome });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{CostAwarePolicy, DecisionMode, NearestTargetPolicy};

    /// Walks to a fixed list of targets in order, then gives up.
    #[derive(Debug)]
    struct Scripted {
        targets: Vec<Position>,
        capacity: u32,
    }

    impl AgentPolicy for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn cargo_capacity(&self) -> u32 {
            self.capacity
        }

        fn choose_target(&self, agent: &Agent, world: &WorldView<'_>) -> Option<Decision> {
            // Next scripted target that still matters
            self.targets
                .iter()
                .copied()
                .find(|t| {
                    *t != agent.position
                        && (world.packages.contains(t)
                            || world.goals.contains(t)
                            || world.recharger == Some(*t))
                })
                .map(|t| Decision::new(t, DecisionMode::Nearest))
        }
    }

    fn open_world(size: usize) -> World {
        World {
            map: GridMap::new(size, size),
            start: Position::new(0, 0),
            packages: vec![Position::new(4, 0)],
            goals: vec![Position::new(4, 4)],
            recharger: None,
        }
    }

    #[test]
    fn phases_advance_one_unit_per_tick() {
        let mut sim = Simulation::new(
            open_world(5),
            Box::new(NearestTargetPolicy),
            SimulationConfig::default(),
        )
        .unwrap();

        assert_eq!(sim.phase(), Phase::SelectTarget);
        let events = sim.tick();
        assert!(matches!(events[0], SimEvent::TargetChosen { .. }));
        assert_eq!(
            events[1],
            SimEvent::PathPlanned {
                target: Position::new(4, 0),
                length: 4
            }
        );
        assert_eq!(sim.phase(), Phase::Navigate);
        assert_eq!(sim.remaining_path().len(), 4);

        for _ in 0..4 {
            let events = sim.tick();
            assert!(matches!(events[0], SimEvent::Moved { .. }));
        }
        assert_eq!(sim.phase(), Phase::ResolveArrival);
        assert!(sim.remaining_path().is_empty());

        let events = sim.tick();
        assert_eq!(
            events,
            vec![SimEvent::Pickup {
                position: Position::new(4, 0),
                cargo: 1
            }]
        );
        assert_eq!(sim.phase(), Phase::SelectTarget);
    }

    #[test]
    fn stranded_steps_cost_more_and_battery_keeps_draining() {
        let config = SimulationConfig {
            initial_battery: Some(2),
            ..SimulationConfig::default()
        };
        let mut sim = Simulation::new(open_world(5), Box::new(NearestTargetPolicy), config).unwrap();
        let outcome = sim.run();

        // 8 steps: 2 paid from battery, 6 stranded; one delivery
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.steps, 8);
        assert_eq!(outcome.battery, 2 - 8);
        assert_eq!(outcome.score, -2 - 6 * 5 + 50);
    }

    #[test]
    fn recharger_restores_battery_when_stepped_on() {
        let mut world = open_world(5);
        world.recharger = Some(Position::new(2, 0));
        let config = SimulationConfig {
            initial_battery: Some(10),
            battery_capacity: 20,
            ..SimulationConfig::default()
        };
        let mut sim = Simulation::new(world, Box::new(NearestTargetPolicy), config).unwrap();

        let mut recharges = Vec::new();
        let outcome = sim.run_with(|event| {
            if let SimEvent::Recharge { battery, .. } = event {
                recharges.push(*battery);
            }
        });

        assert_eq!(recharges, vec![20]);
        // Recharged on step 2, then 6 more steps
        assert_eq!(outcome.battery, 14);
    }

    #[test]
    fn unreachable_target_terminates_with_path_failure() {
        let mut world = open_world(5);
        world.map = GridMap::from_fn(5, 5, |x, y| (x == 3 && y == 0) || (x == 4 && y == 1));

        let mut sim = Simulation::new(world, Box::new(NearestTargetPolicy), SimulationConfig::default())
            .unwrap();
        let mut failures = 0;
        let outcome = sim.run_with(|event| {
            if matches!(event, SimEvent::PathFailure { .. }) {
                failures += 1;
            }
        });

        assert_eq!(failures, 1);
        assert_eq!(
            outcome.termination,
            Termination::UnreachablePath {
                target: Position::new(4, 0)
            }
        );
        assert_eq!(outcome.steps, 0);
        assert!(sim.tick().is_empty());
    }

    #[test]
    fn delivery_requires_cargo() {
        let world = open_world(5);
        let policy = Scripted {
            targets: vec![Position::new(4, 4), Position::new(4, 0)],
            capacity: 1,
        };
        let mut sim = Simulation::new(world, Box::new(policy), SimulationConfig::default()).unwrap();

        let mut deliveries = Vec::new();
        let outcome = sim.run_with(|event| {
            if let SimEvent::Delivery { position, .. } = event {
                deliveries.push(*position);
            }
        });

        // Visiting the goal empty-handed is a no-op; it is delivered on the second visit
        assert_eq!(deliveries, vec![Position::new(4, 4)]);
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.steps, 8 + 4 + 4);
        assert_eq!(outcome.score, -16 + 50);
    }

    #[test]
    fn pickup_respects_capacity() {
        let world = World {
            map: GridMap::new(6, 1),
            start: Position::new(0, 0),
            packages: vec![Position::new(2, 0), Position::new(3, 0)],
            goals: vec![Position::new(5, 0), Position::new(1, 0)],
            recharger: None,
        };
        let policy = Scripted {
            targets: vec![Position::new(2, 0), Position::new(3, 0)],
            capacity: 1,
        };
        let mut sim = Simulation::new(world, Box::new(policy), SimulationConfig::default()).unwrap();

        let mut max_cargo = 0;
        let outcome = sim.run_with(|event| {
            if let SimEvent::Pickup { cargo, .. } = event {
                max_cargo = max_cargo.max(*cargo);
            }
        });

        // Arriving at the second package while full leaves it in place
        assert_eq!(max_cargo, 1);
        assert_eq!(outcome.cargo, 1);
        assert_eq!(sim.packages(), &[Position::new(3, 0)]);
        assert_eq!(outcome.termination, Termination::NoViableTarget);
    }

    #[test]
    fn tick_limit_stops_the_episode() {
        let config = SimulationConfig {
            max_ticks: Some(3),
            ..SimulationConfig::default()
        };
        let mut sim = Simulation::new(
            open_world(5),
            Box::new(CostAwarePolicy::default()),
            config,
        )
        .unwrap();
        let outcome = sim.run();
        assert_eq!(outcome.termination, Termination::TickLimit);
        assert_eq!(outcome.steps, 2);
    }

    #[test]
    fn invalid_world_is_rejected() {
        let mut world = open_world(5);
        world.goals.push(Position::new(9, 9));
        assert!(
            Simulation::new(world, Box::new(NearestTargetPolicy), SimulationConfig::default())
                .is_err()
        );
    }
}
