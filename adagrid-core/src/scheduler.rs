//! Three-phase measurement schedule: first-order, fixed higher-order, then
//! adaptive refinement, all charged against one zCDP accountant.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    accountant::{BudgetSnapshot, PrivacyAccountant},
    config::{ConfigError, MechanismConfig, Selection},
    domain::{Dataset, Domain, Marginal},
    errors::AdagridResult,
    grid::GridAdapter,
    measurement::{Measurement, MeasurementLog, Phase},
    noise::{entropy_seed, seeded_rng, MechanismRng, NoiseInjector},
    selection::TreeSelector,
    workload::{attribute_signal, candidates, rank, PriorityContext, PriorityPolicy, SignalStrengthPolicy},
};

/// Histogram queries: one record moves one cell by one.
const SENSITIVITY: f64 = 1.0;

const NOISE_STREAM: &str = "adagrid/noise";

/// Terminal state of a run, handed to output assembly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MechanismOutcome {
    /// Original cardinalities with the final partitions.
    pub domain: Domain,
    pub log: MeasurementLog,
    pub budget: BudgetSnapshot,
    pub seed: u64,
}

pub struct RoundScheduler<'a, P: PriorityPolicy = SignalStrengthPolicy> {
    config: &'a MechanismConfig,
    data: &'a Dataset,
    domain: Domain,
    accountant: PrivacyAccountant,
    injector: NoiseInjector,
    rng: MechanismRng,
    grid: GridAdapter,
    policy: P,
    log: MeasurementLog,
    phase: Phase,
    seed: u64,
}

impl<'a> RoundScheduler<'a, SignalStrengthPolicy> {
    pub fn new(config: &'a MechanismConfig, data: &'a Dataset) -> AdagridResult<Self> {
        let policy = SignalStrengthPolicy {
            target_boost: config.target_boost,
        };
        Self::with_policy(config, data, policy)
    }
}

impl<'a, P: PriorityPolicy> RoundScheduler<'a, P> {
    /// Validates everything that can fail before a single unit of budget is
    /// spent.
    pub fn with_policy(config: &'a MechanismConfig, data: &'a Dataset, policy: P) -> AdagridResult<Self> {
        config.validate()?;
        data.domain().check_targets(&config.targets)?;
        let accountant = PrivacyAccountant::new(config.epsilon, config.delta);
        if accountant.rho_total() <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "epsilon {} and delta {} admit no zCDP budget",
                config.epsilon, config.delta
            ))
            .into());
        }
        let seed = config.seed.unwrap_or_else(entropy_seed);
        if config.seed.is_none() {
            info!(seed, "no seed configured, drew one from entropy");
        }
        Ok(Self {
            config,
            data,
            domain: data.domain().clone(),
            accountant,
            injector: NoiseInjector::new(config.noise),
            rng: seeded_rng(NOISE_STREAM, seed),
            grid: GridAdapter::new(config.threshold),
            policy,
            log: MeasurementLog::new(),
            phase: Phase::FirstOrder,
            seed,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn log(&self) -> &MeasurementLog {
        &self.log
    }

    pub fn accountant(&self) -> &PrivacyAccountant {
        &self.accountant
    }

    /// Runs the current phase and moves to the next one. Idempotent once
    /// assembled.
    pub fn step(&mut self) -> AdagridResult<Phase> {
        let next = match self.phase {
            Phase::FirstOrder => {
                self.first_order()?;
                Phase::FixedOrder
            }
            Phase::FixedOrder => {
                self.fixed_order()?;
                Phase::Refinement
            }
            Phase::Refinement => {
                self.refinement()?;
                Phase::Assembled
            }
            Phase::Assembled => return Ok(Phase::Assembled),
        };
        debug_assert!(next > self.phase);
        self.phase = next;
        Ok(next)
    }

    pub fn run(mut self) -> AdagridResult<MechanismOutcome> {
        while self.step()? != Phase::Assembled {}
        let budget = self.accountant.snapshot();
        info!(
            measurements = self.log.len(),
            rho_spent = budget.rho_spent,
            rho_total = budget.rho_total,
            digest = %self.log.digest(),
            "measurement log assembled"
        );
        Ok(MechanismOutcome {
            domain: self.domain,
            log: self.log,
            budget,
            seed: self.seed,
        })
    }

    fn min_increment(&self) -> f64 {
        self.accountant.rho_total() * self.config.min_rho_fraction
    }

    fn first_order(&mut self) -> AdagridResult<()> {
        for attr in self.domain.attributes() {
            if attr.partition.is_collapsed() {
                debug!(attribute = %attr.name, "single-valued attribute, nothing to measure");
            }
        }
        let singles = candidates(&self.domain, &self.config.targets, 1);
        let budget = self.config.split_strategy.first_order() * self.accountant.rho_total();
        if !self.spend_evenly(&singles, budget, Phase::FirstOrder)? {
            return Ok(());
        }
        for marginal in &singles {
            self.grid
                .refine(&mut self.domain, &self.log, &marginal.attributes()[0])?;
        }
        Ok(())
    }

    fn fixed_order(&mut self) -> AdagridResult<()> {
        let mut budget = self.config.split_strategy.fixed_order() * self.accountant.rho_total();
        let mut workload = Vec::new();
        if self.config.selection == Selection::PrivateTree {
            let before = self.accountant.rho_spent();
            let selector = TreeSelector {
                targets: &self.config.targets,
                max_order: self.config.max_order,
                max_cells: self.config.max_cells,
                min_rho: self.min_increment(),
            };
            workload = selector.select(
                self.data,
                &self.domain,
                &self.log,
                budget * self.config.selection_fraction,
                &mut self.accountant,
                &mut self.rng,
            )?;
            budget -= self.accountant.rho_spent() - before;
            if workload.is_empty() {
                debug!("tree selection chose nothing, enumerating instead");
            }
        }
        if workload.is_empty() {
            workload = self.fixed_workload();
        }
        self.spend_evenly(&workload, budget, Phase::FixedOrder)?;
        Ok(())
    }

    fn refinement(&mut self) -> AdagridResult<()> {
        let rounds = self.config.refine_rounds;
        let min_increment = self.min_increment();
        info!(
            phase = Phase::Refinement.as_str(),
            rounds,
            rho = self.accountant.remaining(),
            "phase started"
        );
        for round in 0..rounds {
            let remaining = self.accountant.remaining();
            if remaining < min_increment {
                debug!(round, remaining, "budget below minimum increment");
                break;
            }
            let pool = self.refinement_pool();
            if pool.is_empty() {
                warn!(round, remaining, "no refinement candidates left, budget unspent");
                break;
            }
            let top = {
                let signal = attribute_signal(&self.domain, &self.log);
                let ctx = PriorityContext {
                    domain: &self.domain,
                    targets: &self.config.targets,
                    log: &self.log,
                    signal: &signal,
                };
                let ranked = rank(&self.policy, pool, &ctx);
                ranked[0].marginal.clone()
            };
            let slice = (remaining / (rounds - round) as f64)
                .max(min_increment)
                .min(remaining);
            self.measure(&top, slice, Phase::Refinement)?;
            if top.order() == 1 {
                self.grid.refine(&mut self.domain, &self.log, &top.attributes()[0])?;
            }
        }
        if rounds == 0 {
            warn!("refinement disabled, remaining budget unspent");
        }
        Ok(())
    }

    /// Splits `budget` evenly over `workload`. Returns false when the phase
    /// was skipped.
    fn spend_evenly(&mut self, workload: &[Marginal], budget: f64, phase: Phase) -> AdagridResult<bool> {
        let budget = budget.min(self.accountant.remaining());
        if workload.is_empty() {
            warn!(phase = phase.as_str(), "no candidates, phase skipped");
            return Ok(false);
        }
        let share = budget / workload.len() as f64;
        if share < self.min_increment() {
            warn!(phase = phase.as_str(), share, "share below minimum increment, phase skipped");
            return Ok(false);
        }
        info!(
            phase = phase.as_str(),
            marginals = workload.len(),
            rho = budget,
            "phase started"
        );
        for marginal in workload {
            self.measure(marginal, share, phase)?;
        }
        Ok(true)
    }

    fn live_attributes(&self) -> usize {
        self.domain
            .attributes()
            .iter()
            .filter(|attr| !attr.partition.is_collapsed())
            .count()
    }

    /// Order of the fixed second phase: pairs, or target-aware
    /// `(k+1)`-way marginals for `k` targets. Capped by `max_order` and by
    /// the number of live attributes.
    fn fixed_order_size(&self) -> Option<usize> {
        let wanted = if self.config.targets.is_empty() {
            2
        } else {
            (self.config.targets.len() + 1).max(2)
        };
        let order = wanted.min(self.config.max_order).min(self.live_attributes());
        (order >= 2).then_some(order)
    }

    /// Enumerated second-phase workload. Falls back to target-touching pairs
    /// when no marginal of the phase order is affordable, and to plain pairs
    /// once every target has collapsed.
    fn fixed_workload(&self) -> Vec<Marginal> {
        let Some(order) = self.fixed_order_size() else {
            return Vec::new();
        };
        let targets = &self.config.targets;
        let mut workload = self.affordable(candidates(&self.domain, targets, order));
        if workload.is_empty() && order > 2 {
            workload = self.affordable(candidates(&self.domain, targets, 2));
        }
        if workload.is_empty() && !targets.is_empty() {
            debug!("no live target marginal, falling back to plain pairs");
            workload = self.affordable(candidates(&self.domain, &[], 2));
        }
        workload
    }

    /// Singles, the second-phase set and the next order up, plus whatever the
    /// second phase actually measured. Marginals over collapsed attributes
    /// are dropped.
    fn refinement_pool(&self) -> Vec<Marginal> {
        let targets = &self.config.targets;
        let mut pool = candidates(&self.domain, targets, 1);
        let fixed = self.fixed_workload();
        if let Some(order) = fixed.iter().map(Marginal::order).max() {
            pool.extend(fixed);
            if order < self.config.max_order {
                pool.extend(candidates(&self.domain, targets, order + 1));
            }
        }
        pool.extend(
            self.log
                .in_phase(Phase::FixedOrder)
                .map(|entry| entry.marginal().clone()),
        );
        let mut seen = BTreeSet::new();
        pool.retain(|marginal| {
            let live = marginal
                .attributes()
                .iter()
                .all(|name| matches!(self.domain.is_collapsed(name), Ok(false)));
            live && seen.insert(marginal.clone())
        });
        self.affordable(pool)
    }

    fn affordable(&self, marginals: Vec<Marginal>) -> Vec<Marginal> {
        marginals
            .into_iter()
            .filter(|marginal| match self.domain.cells(marginal) {
                Ok(Some(cells)) if cells <= self.config.max_cells => true,
                _ => {
                    debug!(%marginal, "marginal exceeds max-cells, not enumerated");
                    false
                }
            })
            .collect()
    }

    /// Charges the accountant, then draws noise, then appends. Nothing is
    /// drawn or logged if the charge is refused.
    fn measure(&mut self, marginal: &Marginal, rho: f64, phase: Phase) -> AdagridResult<()> {
        // Float slack only; never more than what is left.
        let rho = rho.min(self.accountant.remaining());
        let counts = self.data.project(marginal, &self.domain)?;
        let partitions = marginal
            .attributes()
            .iter()
            .map(|name| self.domain.partition(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let metric = self.config.metric;
        let scale = self.accountant.allocate(rho, SENSITIVITY, metric)?;
        let noisy = self
            .injector
            .inject(&mut self.rng, &counts, SENSITIVITY, scale, metric)?;
        let entry = self.log.push(Measurement::new(
            marginal.clone(),
            partitions,
            noisy,
            SENSITIVITY,
            metric,
            scale,
            rho,
            phase,
        ));
        debug!(
            phase = phase.as_str(),
            marginal = %entry.marginal(),
            cells = entry.noisy().len(),
            rho,
            scale,
            "measured"
        );
        Ok(())
    }
}
