use std::{fmt, str::FromStr};

use blake3::Hasher;
use rand::{rngs::StdRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Exp, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The single seeded random source of a run.
pub type MechanismRng = ChaCha20Rng;

/// Sensitivity norm, which also selects the noise family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// Laplace noise calibrated to L1 sensitivity.
    L1,
    /// Gaussian noise calibrated to L2 sensitivity.
    L2,
}

impl Metric {
    pub fn distribution(self) -> &'static str {
        match self {
            Metric::L1 => "laplace",
            Metric::L2 => "gaussian",
        }
    }

    /// Per-entry variance of noise drawn at `scale`.
    pub fn variance(self, scale: f64) -> f64 {
        match self {
            Metric::L1 => 2.0 * scale * scale,
            Metric::L2 => scale * scale,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::L1 => f.write_str("L1"),
            Metric::L2 => f.write_str("L2"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L1" | "LAPLACE" => Ok(Metric::L1),
            "L2" | "GAUSSIAN" => Ok(Metric::L2),
            other => Err(format!("unknown metric {other}, expected L1 or L2")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseMode {
    #[default]
    Calibrated,
    /// Adds no noise while still charging the accountant. Test and audit use only.
    Oracle,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NoiseError {
    #[error("noise scale must be positive and finite, got {0}")]
    InvalidScale(f64),
    #[error("sensitivity must be positive and finite, got {0}")]
    InvalidSensitivity(f64),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoiseInjector {
    mode: NoiseMode,
}

impl NoiseInjector {
    pub fn new(mode: NoiseMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> NoiseMode {
        self.mode
    }

    /// Adds i.i.d. noise at `scale` to every entry. Negative results are kept.
    pub fn inject(
        &self,
        rng: &mut MechanismRng,
        counts: &[f64],
        sensitivity: f64,
        scale: f64,
        metric: Metric,
    ) -> Result<Vec<f64>, NoiseError> {
        if !(sensitivity.is_finite() && sensitivity > 0.0) {
            return Err(NoiseError::InvalidSensitivity(sensitivity));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(NoiseError::InvalidScale(scale));
        }
        if self.mode == NoiseMode::Oracle {
            return Ok(counts.to_vec());
        }
        let noisy = match metric {
            Metric::L1 => {
                let exp = Exp::new(1.0 / scale).map_err(|_| NoiseError::InvalidScale(scale))?;
                counts
                    .iter()
                    .map(|count| count + exp.sample(rng) - exp.sample(rng))
                    .collect()
            }
            Metric::L2 => {
                let normal = Normal::new(0.0, scale).map_err(|_| NoiseError::InvalidScale(scale))?;
                counts.iter().map(|count| count + normal.sample(rng)).collect()
            }
        };
        Ok(noisy)
    }
}

/// Expands a run seed into a labelled 32-byte stream seed.
pub fn derive_seed(label: &str, seed: u64) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(label.as_bytes());
    hasher.update(&seed.to_le_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(hasher.finalize().as_bytes());
    out
}

pub fn seeded_rng(label: &str, seed: u64) -> MechanismRng {
    MechanismRng::from_seed(derive_seed(label, seed))
}

pub fn entropy_seed() -> u64 {
    StdRng::from_entropy().next_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_std(xs: &[f64]) -> (f64, f64) {
        let n = xs.len() as f64;
        let mean = xs.iter().sum::<f64>() / n;
        let var = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
        (mean, var.sqrt())
    }

    #[test]
    fn same_seed_same_noise() {
        let injector = NoiseInjector::default();
        let counts = vec![10.0, 20.0, 30.0];
        let a = injector
            .inject(&mut seeded_rng("noise", 7), &counts, 1.0, 3.0, Metric::L2)
            .unwrap();
        let b = injector
            .inject(&mut seeded_rng("noise", 7), &counts, 1.0, 3.0, Metric::L2)
            .unwrap();
        let c = injector
            .inject(&mut seeded_rng("noise", 8), &counts, 1.0, 3.0, Metric::L2)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn empirical_spread_matches_scale() {
        let injector = NoiseInjector::default();
        let zeros = vec![0.0; 20_000];
        let mut rng = seeded_rng("spread", 1);
        for metric in [Metric::L1, Metric::L2] {
            let noisy = injector.inject(&mut rng, &zeros, 1.0, 2.0, metric).unwrap();
            let (mean, std) = mean_std(&noisy);
            let expected = metric.variance(2.0).sqrt();
            assert!(mean.abs() < 0.1, "{metric} mean {mean}");
            assert!((std - expected).abs() < 0.05 * expected, "{metric} std {std}");
        }
    }

    #[test]
    fn keeps_negative_counts() {
        let injector = NoiseInjector::default();
        let zeros = vec![0.0; 500];
        let noisy = injector
            .inject(&mut seeded_rng("neg", 3), &zeros, 1.0, 5.0, Metric::L1)
            .unwrap();
        assert!(noisy.iter().any(|v| *v < 0.0));
        assert!(noisy.iter().any(|v| v.fract() != 0.0));
    }

    #[test]
    fn oracle_is_exact() {
        let injector = NoiseInjector::new(NoiseMode::Oracle);
        let counts = vec![4.0, 0.0, 9.0];
        let out = injector
            .inject(&mut seeded_rng("oracle", 0), &counts, 1.0, 1.0, Metric::L2)
            .unwrap();
        assert_eq!(out, counts);
    }

    #[test]
    fn rejects_bad_scale() {
        let injector = NoiseInjector::default();
        let err = injector
            .inject(&mut seeded_rng("bad", 0), &[1.0], 1.0, f64::INFINITY, Metric::L2)
            .unwrap_err();
        assert_eq!(err, NoiseError::InvalidScale(f64::INFINITY));
    }

    #[test]
    fn metric_parses_case_insensitively() {
        assert_eq!("l1".parse::<Metric>().unwrap(), Metric::L1);
        assert_eq!("Gaussian".parse::<Metric>().unwrap(), Metric::L2);
        assert!("l3".parse::<Metric>().is_err());
    }
}
