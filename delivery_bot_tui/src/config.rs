use std::{fs, path::Path};

use anyhow::{Context, Result};
use delivery_bot_core::{
    generator::GeneratorConfig, policy::PolicyConfig, simulation::SimulationConfig,
};
use serde::{Deserialize, Serialize};

/// Settings read from the optional TOML file. Missing tables and keys keep
/// their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub simulation: SimulationConfig,
    pub policy: PolicyConfig,
    pub generator: GeneratorConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Makes the policy value a delivery at what the simulation actually pays.
    pub fn align_rewards(&mut self) {
        self.policy.delivery_reward = self.simulation.delivery_reward as f64;
    }
}

#[cfg(test)]
mod tests {
    use delivery_bot_core::pathfinding::Algorithm;

    use super::*;

    #[test]
    fn partial_tables_keep_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [simulation]
            algorithm = "dijkstra"
            battery_capacity = 60

            [policy]
            cargo_capacity = 2

            [generator]
            size = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.simulation.algorithm, Algorithm::Dijkstra);
        assert_eq!(config.simulation.battery_capacity, 60);
        assert_eq!(config.simulation.delivery_reward, 50);
        assert_eq!(config.policy.cargo_capacity, 2);
        assert_eq!(config.policy.safety_margin, PolicyConfig::default().safety_margin);
        assert_eq!(config.generator.size, 20);
        assert_eq!(config.generator.deliveries, 4);
    }

    #[test]
    fn policy_follows_simulation_reward() {
        let mut config: AppConfig =
            toml::from_str("[simulation]\ndelivery_reward = 80").unwrap();
        assert_eq!(config.policy.delivery_reward, 50.0);

        config.align_rewards();
        assert_eq!(config.policy.delivery_reward, 80.0);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let result: Result<AppConfig, _> = toml::from_str("[simulation]\nalgorithm = \"bfs\"");
        assert!(result.is_err());
    }
}
