//! Search configuration
//!
//! One engine covers every search variant (with or without caching, depth limit, heuristic or factoring); these
//! structures select the variant. They deserialize from TOML, and any field missing from the input takes its default.
//!
//! ```rust
//! use circuit_game_player::{HeuristicKind, SearchConfig};
//!
//! let config = SearchConfig::from_toml_str(
//!     r#"
//!     max_depth = 12
//!     factor_aware = true
//!     heuristic = "monte_carlo"
//!
//!     [monte_carlo]
//!     samples = 8
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.max_depth, 12);
//! assert!(config.factor_aware);
//! assert!(config.caching);
//! assert_eq!(config.heuristic, HeuristicKind::MonteCarlo);
//! assert_eq!(config.monte_carlo.samples, 8);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings of the iterative-deepening search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Depth limit of the first pass.
    pub initial_depth: u32,
    /// Hard ceiling on the depth limit.
    pub max_depth: u32,
    /// Memoize exact node values in the transposition cache.
    pub caching: bool,
    /// Decompose the game into independent factors when possible.
    pub factor_aware: bool,
    /// Search the factors in parallel.
    pub parallel_factors: bool,
    /// Score states that a latch has made unwinnable as losses without expanding them.
    pub dead_state_pruning: bool,
    /// Time reserved before the deadline for returning the move.
    pub safety_margin_ms: u64,
    /// Depth limit of the short forced-loss search run on each factor before the factored search.
    pub forced_loss_depth: u32,
    /// Seed for move shuffling, the fallback move and the configured heuristic. Decisions are not reproducible without
    /// it.
    pub seed: Option<u64>,
    /// Heuristic built by the engine for states beyond the depth limit.
    pub heuristic: HeuristicKind,
    /// Settings of the Monte Carlo heuristics.
    pub monte_carlo: MonteCarloConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            initial_depth: 1,
            max_depth: 128,
            caching: true,
            factor_aware: false,
            parallel_factors: false,
            dead_state_pruning: false,
            safety_margin_ms: 500,
            forced_loss_depth: 2,
            seed: None,
            heuristic: HeuristicKind::None,
            monte_carlo: MonteCarloConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }
}

/// Which heuristic scores the states beyond the depth limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicKind {
    /// Leave those states unknown.
    #[default]
    None,
    MonteCarlo,
    FocusedMonteCarlo,
    Mobility,
    HybridMobility,
    Focus,
    OpponentMobility,
}

/// Settings of the Monte Carlo heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    /// Rollouts per estimate.
    pub samples: u32,
    /// Rollouts longer than this are abandoned and do not count as samples.
    pub max_depth: Option<u32>,
    /// Prefer joint moves not yet played in a state, until the heuristic is reset.
    pub memory: bool,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            samples: 4,
            max_depth: None,
            memory: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.initial_depth, 1);
        assert_eq!(config.max_depth, 128);
        assert!(config.caching);
        assert!(!config.factor_aware);
        assert_eq!(config.safety_margin(), Duration::from_millis(500));
        assert_eq!(config.heuristic, HeuristicKind::None);
        assert_eq!(
            config.monte_carlo,
            MonteCarloConfig {
                samples: 4,
                max_depth: None,
                memory: false,
            }
        );
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(SearchConfig::from_toml_str("").unwrap(), SearchConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = SearchConfig::from_toml_str(
            r#"
            caching = false
            seed = 42
            heuristic = "focused_monte_carlo"
            [monte_carlo]
            max_depth = 30
            memory = true
            "#,
        )
        .unwrap();
        assert!(!config.caching);
        assert_eq!(config.heuristic, HeuristicKind::FocusedMonteCarlo);
        assert!(config.monte_carlo.memory);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.monte_carlo.samples, 4);
        assert_eq!(config.monte_carlo.max_depth, Some(30));
    }

    #[test]
    fn test_unknown_heuristic_is_rejected() {
        let err = SearchConfig::from_toml_str("heuristic = \"oracle\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_toml() {
        let err = SearchConfig::from_toml_str("max_depth = \"deep\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = SearchConfig {
            parallel_factors: true,
            seed: Some(7),
            heuristic: HeuristicKind::HybridMobility,
            ..SearchConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(SearchConfig::from_toml_str(&text).unwrap(), config);
    }
}
