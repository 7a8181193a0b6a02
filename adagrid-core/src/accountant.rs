use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::noise::Metric;

/// Bisection depth for the zCDP conversions; f64 precision is exhausted well
/// before this.
const BISECTION_STEPS: usize = 100;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BudgetError {
    #[error("zCDP budget exceeded: requested rho {requested:.3e}, remaining {remaining:.3e}")]
    Exceeded { requested: f64, remaining: f64 },
    #[error("rho must be positive and finite, got {0}")]
    InvalidRho(f64),
    #[error("sensitivity must be positive and finite, got {0}")]
    InvalidSensitivity(f64),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BudgetSnapshot {
    pub epsilon: f64,
    pub delta: f64,
    pub rho_total: f64,
    pub rho_spent: f64,
    pub measurements: u32,
}

/// Sequential-composition zCDP accountant. The only writer of `rho_spent`.
#[derive(Clone, Debug)]
pub struct PrivacyAccountant {
    epsilon: f64,
    delta: f64,
    rho_total: f64,
    rho_spent: f64,
    measurements: u32,
}

impl PrivacyAccountant {
    pub fn new(epsilon: f64, delta: f64) -> Self {
        Self::with_rho(epsilon, delta, cdp_rho(epsilon, delta))
    }

    pub(crate) fn with_rho(epsilon: f64, delta: f64, rho_total: f64) -> Self {
        Self {
            epsilon,
            delta,
            rho_total,
            rho_spent: 0.0,
            measurements: 0,
        }
    }

    pub fn rho_total(&self) -> f64 {
        self.rho_total
    }

    pub fn rho_spent(&self) -> f64 {
        self.rho_spent
    }

    pub fn remaining(&self) -> f64 {
        (self.rho_total - self.rho_spent).max(0.0)
    }

    /// Charges `rho` for one measurement of the given sensitivity and returns
    /// the noise scale that makes it cost exactly `rho`. Nothing is charged on
    /// error.
    pub fn allocate(&mut self, rho: f64, sensitivity: f64, metric: Metric) -> Result<f64, BudgetError> {
        if !(sensitivity.is_finite() && sensitivity > 0.0) {
            return Err(BudgetError::InvalidSensitivity(sensitivity));
        }
        self.charge(rho)?;
        self.measurements += 1;
        Ok(noise_scale(rho, sensitivity, metric))
    }

    /// Charges `rho` for one exponential-mechanism draw and returns the
    /// epsilon it buys. An `eps`-DP exponential mechanism is `eps²/8`-zCDP.
    pub fn allocate_selection(&mut self, rho: f64) -> Result<f64, BudgetError> {
        self.charge(rho)?;
        Ok((8.0 * rho).sqrt())
    }

    fn charge(&mut self, rho: f64) -> Result<(), BudgetError> {
        if !(rho.is_finite() && rho > 0.0) {
            return Err(BudgetError::InvalidRho(rho));
        }
        let remaining = self.remaining();
        if rho > remaining {
            return Err(BudgetError::Exceeded {
                requested: rho,
                remaining,
            });
        }
        self.rho_spent = (self.rho_spent + rho).min(self.rho_total);
        Ok(())
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            epsilon: self.epsilon,
            delta: self.delta,
            rho_total: self.rho_total,
            rho_spent: self.rho_spent,
            measurements: self.measurements,
        }
    }
}

/// Laplace scale (L1) or Gaussian sigma (L2) costing `rho` zCDP. Both reduce
/// to `sensitivity / sqrt(2 rho)`: Gaussian has `rho = Δ²/2σ²`, Laplace is
/// `Δ/b`-DP and therefore `(Δ/b)²/2`-zCDP.
pub fn noise_scale(rho: f64, sensitivity: f64, metric: Metric) -> f64 {
    match metric {
        Metric::L1 | Metric::L2 => sensitivity / (2.0 * rho).sqrt(),
    }
}

/// Smallest delta such that `rho`-zCDP implies `(eps, delta)`-DP.
pub fn cdp_delta(rho: f64, eps: f64) -> f64 {
    if rho <= 0.0 {
        return 0.0;
    }
    let mut amin = 1.01;
    let mut amax = (eps + 1.0) / (2.0 * rho) + 2.0;
    let mut alpha = amin;
    for _ in 0..BISECTION_STEPS {
        alpha = (amin + amax) / 2.0;
        let derivative = (2.0 * alpha - 1.0) * rho - eps + (-1.0 / alpha).ln_1p();
        if derivative < 0.0 {
            amin = alpha;
        } else {
            amax = alpha;
        }
    }
    let log_delta = (alpha - 1.0) * (alpha * rho - eps) + alpha * (-1.0 / alpha).ln_1p();
    (log_delta.exp() / (alpha - 1.0)).min(1.0)
}

/// Smallest epsilon such that `rho`-zCDP implies `(epsilon, delta)`-DP.
pub fn cdp_eps(rho: f64, delta: f64) -> f64 {
    if delta >= 1.0 || rho <= 0.0 || delta <= 0.0 {
        return if rho > 0.0 && delta <= 0.0 { f64::INFINITY } else { 0.0 };
    }
    let mut lo = 0.0;
    let mut hi = rho + 2.0 * (rho * (1.0 / delta).ln()).sqrt();
    for _ in 0..BISECTION_STEPS {
        let eps = (lo + hi) / 2.0;
        if cdp_delta(rho, eps) <= delta {
            hi = eps;
        } else {
            lo = eps;
        }
    }
    hi
}

/// Largest rho whose conversion lands at `(epsilon, delta)`. `delta == 0`
/// admits no positive rho.
pub fn cdp_rho(epsilon: f64, delta: f64) -> f64 {
    if delta >= 1.0 {
        return 0.0;
    }
    if delta <= 0.0 || epsilon <= 0.0 || !epsilon.is_finite() {
        return 0.0;
    }
    let mut lo = 0.0;
    let mut hi = epsilon + 1.0;
    for _ in 0..BISECTION_STEPS {
        let rho = (lo + hi) / 2.0;
        if cdp_eps(rho, delta) <= epsilon {
            lo = rho;
        } else {
            hi = rho;
        }
    }
    lo
}
