use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::noise::{Metric, NoiseMode};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Validation(String),
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation(reason.into())
}

/// Fractions of the total zCDP budget for the three phases.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitStrategy(pub [f64; 3]);

impl SplitStrategy {
    const SUM_TOLERANCE: f64 = 1e-6;

    pub fn first_order(&self) -> f64 {
        self.0[0]
    }

    pub fn fixed_order(&self) -> f64 {
        self.0[1]
    }

    pub fn refinement(&self) -> f64 {
        self.0[2]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.0.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid(format!(
                "split strategy entries must be non-negative, got {self}"
            )));
        }
        let sum: f64 = self.0.iter().sum();
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(invalid(format!(
                "split strategy must sum to 1, got {self} (sum {sum})"
            )));
        }
        Ok(())
    }
}

impl Default for SplitStrategy {
    fn default() -> Self {
        Self([1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0])
    }
}

impl fmt::Display for SplitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{},{}]", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for SplitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim_matches(|c| c == '[' || c == ']')
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<f64>()
                    .map_err(|err| format!("bad split entry {part}: {err}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let weights: [f64; 3] = parts
            .try_into()
            .map_err(|parts: Vec<f64>| format!("split strategy needs 3 entries, got {}", parts.len()))?;
        Ok(Self(weights))
    }
}

/// How the fixed higher-order phase picks its marginals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Selection {
    /// Every target-aware marginal of the phase order. Costs no budget.
    #[default]
    Enumerate,
    /// A spanning tree over non-target attributes, one exponential-mechanism
    /// draw per edge, paid from the phase share.
    PrivateTree,
}

impl FromStr for Selection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "enumerate" => Ok(Selection::Enumerate),
            "private-tree" | "tree" | "mst" => Ok(Selection::PrivateTree),
            other => Err(format!("unknown selection {other}, expected enumerate or private-tree")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MechanismConfig {
    pub epsilon: f64,
    pub delta: f64,
    pub targets: Vec<String>,
    pub metric: Metric,
    pub threshold: f64,
    pub split_strategy: SplitStrategy,
    /// Iteration cap for the refinement phase.
    pub refine_rounds: usize,
    /// Smallest charge worth making, as a fraction of the total budget.
    pub min_rho_fraction: f64,
    pub max_order: usize,
    pub max_cells: usize,
    pub target_boost: f64,
    pub selection: Selection,
    /// Part of the fixed-order share spent choosing marginals under
    /// `private-tree` selection.
    pub selection_fraction: f64,
    pub seed: Option<u64>,
    pub noise: NoiseMode,
}

impl Default for MechanismConfig {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            delta: 1e-10,
            targets: Vec::new(),
            metric: Metric::L2,
            threshold: 5.0,
            split_strategy: SplitStrategy::default(),
            refine_rounds: 16,
            min_rho_fraction: 1e-6,
            max_order: 3,
            max_cells: 1 << 20,
            target_boost: 4.0,
            selection: Selection::Enumerate,
            selection_fraction: 0.5,
            seed: None,
            noise: NoiseMode::Calibrated,
        }
    }
}

impl MechanismConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(invalid(format!("epsilon must be > 0, got {}", self.epsilon)));
        }
        if !(0.0..1.0).contains(&self.delta) {
            return Err(invalid(format!("delta must be within [0, 1), got {}", self.delta)));
        }
        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(invalid(format!(
                "threshold must be non-negative, got {}",
                self.threshold
            )));
        }
        self.split_strategy.validate()?;
        if !(self.min_rho_fraction > 0.0 && self.min_rho_fraction < 1.0) {
            return Err(invalid("min-rho-fraction must be within (0, 1)"));
        }
        if self.max_order == 0 {
            return Err(invalid("max-order must be at least 1"));
        }
        if self.max_cells == 0 {
            return Err(invalid("max-cells must be at least 1"));
        }
        if !(self.target_boost.is_finite() && self.target_boost > 0.0) {
            return Err(invalid("target-boost must be positive"));
        }
        if !(self.selection_fraction > 0.0 && self.selection_fraction < 1.0) {
            return Err(invalid("selection-fraction must be within (0, 1)"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for target in &self.targets {
            if !seen.insert(target) {
                return Err(invalid(format!("target {target} listed twice")));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EstimatorConfig {
    pub pgm_iters: usize,
    pub warm_start: bool,
    /// Synthetic row count; defaults to the noisy record-count estimate.
    pub records: Option<usize>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            pgm_iters: 2500,
            warm_start: true,
            records: None,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pgm_iters == 0 {
            return Err(invalid("pgm-iters must be a positive integer"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdagridConfig {
    pub mechanism: MechanismConfig,
    pub estimator: EstimatorConfig,
}

impl AdagridConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mechanism.validate()?;
        self.estimator.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AdagridConfig::default().validate().unwrap();
    }

    #[test]
    fn split_must_sum_to_one() {
        assert!(SplitStrategy([0.1, 0.1, 0.8]).validate().is_ok());
        assert!(SplitStrategy([0.5, 0.5, 0.5]).validate().is_err());
        assert!(SplitStrategy([1.2, -0.1, -0.1]).validate().is_err());
    }

    #[test]
    fn split_parses_from_cli_text() {
        assert_eq!(
            "0.1,0.1,0.8".parse::<SplitStrategy>().unwrap(),
            SplitStrategy([0.1, 0.1, 0.8])
        );
        assert_eq!(
            "[0.2 0.3 0.5]".parse::<SplitStrategy>().unwrap(),
            SplitStrategy([0.2, 0.3, 0.5])
        );
        assert!("0.5,0.5".parse::<SplitStrategy>().is_err());
    }

    #[test]
    fn rejects_out_of_range_privacy_parameters() {
        let mut config = MechanismConfig {
            epsilon: 0.0,
            ..MechanismConfig::default()
        };
        assert!(config.validate().is_err());
        config.epsilon = 1.0;
        config.delta = 1.0;
        assert!(config.validate().is_err());
        config.delta = 0.0;
        assert!(config.validate().is_ok());
        config.threshold = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn selection_parses_and_validates() {
        assert_eq!("private_tree".parse::<Selection>().unwrap(), Selection::PrivateTree);
        assert_eq!("Enumerate".parse::<Selection>().unwrap(), Selection::Enumerate);
        assert!("greedy".parse::<Selection>().is_err());
        let config = MechanismConfig {
            selection: Selection::PrivateTree,
            selection_fraction: 1.0,
            ..MechanismConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_pgm_iters() {
        let config = EstimatorConfig {
            pgm_iters: 0,
            ..EstimatorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
