//! Portfolio runner for batches of scenarios
//!
//! Each scenario is simulated with its own seed, then per-year losses are
//! combined according to the portfolio semantics. In sampled control-state
//! mode every control is drawn up or down once per year, shared by all
//! scenarios that declare it.

use chrono::Utc;
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::controls::{ControlDetail, ControlScaling, ControlStateSampler};
use crate::currency::FxTable;
use crate::error::{RiskEngineError, RiskResult, SimulationWarning};
use crate::metrics::{DistributionArtifact, MetricsAggregator, RiskMetrics};
use crate::model::{DependencySpec, RiskModel};
use crate::simulation::{SimulationConfig, SimulationEngine, ENGINE_VERSION};

/// Seed offset between consecutive scenarios
pub const SCENARIO_SEED_STRIDE: u64 = 1_000;

/// RNG stream used to pick scenarios under mixture semantics
const SELECTION_STREAM: u64 = u64::MAX;

/// RNG stream used to draw per-year control states
const CONTROL_STATE_STREAM: u64 = u64::MAX - 1;

/// How control reliability enters a portfolio run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStateMode {
    /// Reliability is folded into each control's expected reduction
    #[default]
    Expected,
    /// Each control is up with probability `reliability` in every year
    Sampled,
}

/// How scenario losses combine into one portfolio year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationSemantics {
    /// Losses add up
    #[default]
    Sum,
    /// Worst scenario in each year
    Max,
    /// One scenario per year, drawn by weight
    Mixture,
    /// Same as mixture
    ChooseOne,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioScenario {
    pub id: String,
    pub model: RiskModel,
    #[serde(default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub semantics: AggregationSemantics,
    pub scenarios: Vec<PortfolioScenario>,

    #[serde(default)]
    pub control_state: ControlStateMode,

    /// Gaussian copula over `control:<id>:state` targets (sampled mode only)
    #[serde(default)]
    pub dependency: Option<DependencySpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    pub id: String,
    pub seed: u64,
    /// Normalized selection weight under mixture semantics
    pub weight: Option<f64>,
    pub metrics: RiskMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetadata {
    pub name: String,
    pub semantics: AggregationSemantics,
    pub control_state: ControlStateMode,
    pub runs: usize,
    pub seed: u64,
    pub runtime_ms: u128,
    pub completed_at: chrono::DateTime<Utc>,
    pub engine_version: String,
    pub currency_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioResult {
    pub metrics: RiskMetrics,
    pub distribution: Option<DistributionArtifact>,
    pub scenarios: Vec<ScenarioMetrics>,
    pub warnings: Vec<SimulationWarning>,
    pub metadata: PortfolioMetadata,
}

/// Normalized weights; equal weights when any is missing or the sum is not
/// positive
pub fn normalize_weights(weights: &[Option<f64>]) -> RiskResult<Vec<f64>> {
    let n = weights.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    for (i, w) in weights.iter().enumerate() {
        if let Some(w) = w {
            if !w.is_finite() || *w < 0.0 {
                return Err(RiskEngineError::config(
                    format!("scenarios[{}].weight", i),
                    format!("must be >= 0, got {}", w),
                ));
            }
        }
    }

    let given: Option<Vec<f64>> = weights.iter().cloned().collect();
    match given {
        Some(values) if values.iter().sum::<f64>() > 0.0 => {
            let total: f64 = values.iter().sum();
            Ok(values.into_iter().map(|w| w / total).collect())
        }
        _ => Ok(vec![1.0 / n as f64; n]),
    }
}

/// Control states for every simulated year, stored row by row
struct ControlStates {
    sampler: ControlStateSampler,
    years: usize,
    rows: Vec<bool>,
}

impl ControlStates {
    fn sample(portfolio: &Portfolio, years: usize, master: u64) -> RiskResult<Option<Self>> {
        let copula = portfolio.dependency.as_ref().and_then(|d| d.copula.as_ref());
        match portfolio.control_state {
            ControlStateMode::Expected if copula.is_some() => {
                return Err(RiskEngineError::config(
                    "dependency.copula",
                    "control state correlation requires control_state: sampled",
                ));
            }
            ControlStateMode::Expected => return Ok(None),
            ControlStateMode::Sampled => {}
        }

        let controls = portfolio
            .scenarios
            .iter()
            .filter_map(|s| s.model.controls.as_ref())
            .flat_map(|set| set.iter_controls().map(|(_, c)| c));
        let sampler = ControlStateSampler::new(controls, copula)?;

        let width = sampler.len();
        let mut rng = ChaCha20Rng::seed_from_u64(master);
        rng.set_stream(CONTROL_STATE_STREAM);
        let mut uniforms = vec![0.0; sampler.copula_dim()];
        let mut row = vec![true; width];
        let mut rows = Vec::with_capacity(years * width);
        for _ in 0..years {
            sampler.sample(&mut rng, &mut uniforms, &mut row);
            rows.extend_from_slice(&row);
        }

        debug!(
            "Sampled {} control state(s) over {} years ({} correlated)",
            width,
            years,
            sampler.copula_dim()
        );
        Ok(Some(Self { sampler, years, rows }))
    }

    /// One scaling per year for a scenario's controls
    fn scaling(&self, details: &[ControlDetail]) -> Vec<ControlScaling> {
        let width = self.sampler.len();
        if width == 0 {
            return vec![ControlScaling::NONE; self.years];
        }
        self.rows
            .chunks(width)
            .map(|states| ControlScaling::from_states(details, self.sampler.index(), states))
            .collect()
    }
}

/// Runs every scenario of a portfolio with one engine configuration
///
/// Scenario `i` uses seed `master + 1000 × i`.
pub struct PortfolioRunner {
    config: SimulationConfig,
    fx: FxTable,
}

impl PortfolioRunner {
    pub fn new(config: SimulationConfig, fx: FxTable) -> Self {
        Self { config, fx }
    }

    pub fn run(&self, portfolio: &Portfolio) -> RiskResult<PortfolioResult> {
        let started = Instant::now();
        if portfolio.scenarios.is_empty() {
            return Err(RiskEngineError::config("scenarios", "portfolio has no scenarios"));
        }
        self.config.validate()?;
        let aggregator = MetricsAggregator::new(&self.config.quantiles)?;
        let master = self.config.seed.unwrap_or_else(rand::random);
        let weights = normalize_weights(&portfolio.scenarios.iter().map(|s| s.weight).collect::<Vec<_>>())?;

        // Scenario-level config: no MCMC, no artifacts, explicit seed set per scenario
        let scenario_config = SimulationConfig {
            mcmc: None,
            histogram: None,
            raw_sample_limit: None,
            ..self.config.clone()
        };
        let engine = SimulationEngine::new(scenario_config, self.fx.clone());
        let states = ControlStates::sample(portfolio, self.config.runs, master)?;

        info!(
            "Portfolio '{}': {} scenario(s), {:?}, {:?} controls, {} years, seed {}",
            portfolio.name,
            portfolio.scenarios.len(),
            portfolio.semantics,
            portfolio.control_state,
            self.config.runs,
            master
        );

        let runs = portfolio
            .scenarios
            .par_iter()
            .enumerate()
            .map(|(i, scenario)| {
                let seed = master.wrapping_add(SCENARIO_SEED_STRIDE.wrapping_mul(i as u64));
                let (plan, run) = match &states {
                    Some(states) => engine.run_losses_per_year(&scenario.model, seed, |plan| {
                        states.scaling(&plan.control_effect.details)
                    })?,
                    None => engine.run_losses(&scenario.model, seed)?,
                };
                Ok((seed, plan.warnings, run.annual_losses))
            })
            .collect::<RiskResult<Vec<_>>>()?;

        let years = self.config.runs;
        let combined: Vec<f64> = match portfolio.semantics {
            AggregationSemantics::Sum => (0..years).map(|y| runs.iter().map(|r| r.2[y]).sum()).collect(),
            AggregationSemantics::Max => (0..years)
                .map(|y| runs.iter().map(|r| r.2[y]).fold(0.0, f64::max))
                .collect(),
            AggregationSemantics::Mixture | AggregationSemantics::ChooseOne => {
                let mut rng = ChaCha20Rng::seed_from_u64(master);
                rng.set_stream(SELECTION_STREAM);
                (0..years)
                    .map(|y| {
                        let pick = select_index(&weights, rng.gen::<f64>());
                        runs[pick].2[y]
                    })
                    .collect()
            }
        };

        let mut scenarios = Vec::with_capacity(runs.len());
        let mut warnings = Vec::new();
        for ((scenario, (seed, scenario_warnings, losses)), weight) in
            portfolio.scenarios.iter().zip(&runs).zip(&weights)
        {
            scenarios.push(ScenarioMetrics {
                id: scenario.id.clone(),
                seed: *seed,
                weight: match portfolio.semantics {
                    AggregationSemantics::Mixture | AggregationSemantics::ChooseOne => Some(*weight),
                    AggregationSemantics::Sum | AggregationSemantics::Max => None,
                },
                metrics: aggregator.aggregate(losses)?,
            });
            warnings.extend(scenario_warnings.iter().cloned());
        }

        let metrics = aggregator.aggregate(&combined)?;
        let histogram = match &self.config.histogram {
            Some(spec) => Some(aggregator.histogram(&combined, spec)?),
            None => None,
        };
        let raw_samples = self
            .config
            .raw_sample_limit
            .map(|limit| combined.iter().take(limit).cloned().collect());
        let distribution = if histogram.is_some() || raw_samples.is_some() {
            Some(DistributionArtifact { histogram, raw_samples })
        } else {
            None
        };

        Ok(PortfolioResult {
            metrics,
            distribution,
            scenarios,
            warnings,
            metadata: PortfolioMetadata {
                name: portfolio.name.clone(),
                semantics: portfolio.semantics,
                control_state: portfolio.control_state,
                runs: years,
                seed: master,
                runtime_ms: started.elapsed().as_millis(),
                completed_at: Utc::now(),
                engine_version: ENGINE_VERSION.to_string(),
                currency_code: self.fx.output_currency.clone(),
            },
        })
    }
}

fn select_index(weights: &[f64], u: f64) -> usize {
    let mut running = 0.0;
    for (i, w) in weights.iter().enumerate() {
        running += w;
        if u < running {
            return i;
        }
    }
    weights.len() - 1
}
