//! Configuration management for the simulator.

use std::env;
use std::str::FromStr;

/// Simulation parameters loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of replicas sharing the hub
    pub replicas: u32,
    /// Number of edit-and-release rounds
    pub rounds: u32,
    /// Local transactions per replica in each round
    pub edits_per_round: u32,
    /// Seed for choosing edits and delivery order
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            replicas: 3,
            rounds: 20,
            edits_per_round: 5,
            seed: 42,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let replicas = parse_var("TANDEM_REPLICAS", defaults.replicas)?;
        if replicas < 2 {
            return Err(ConfigError::TooFewReplicas(replicas));
        }

        Ok(Self {
            replicas,
            rounds: parse_var("TANDEM_ROUNDS", defaults.rounds)?,
            edits_per_round: parse_var("TANDEM_EDITS_PER_ROUND", defaults.edits_per_round)?,
            seed: parse_var("TANDEM_SEED", defaults.seed)?,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {name} value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("TANDEM_REPLICAS must be at least 2, got {0}")]
    TooFewReplicas(u32),
}
