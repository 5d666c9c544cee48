//! Simulation orchestration
//!
//! Resolves the model into a plan, runs the Monte Carlo estimator (and the
//! MCMC estimator when configured and evidence is present), then aggregates.

use chrono::Utc;
use log::{info, warn};
use std::time::Instant;

use super::cancel::CancellationToken;
use super::config::SimulationConfig;
use super::estimator::{Estimator, MonteCarloEstimator};
use super::mcmc::McmcEstimator;
use super::plan::{ControlApplication, SimulationPlan};
use super::result::{RunMetadata, SimulationResult, SimulationRun};
use crate::controls::ControlScaling;
use crate::currency::FxTable;
use crate::error::RiskResult;
use crate::metrics::{DistributionArtifact, MetricsAggregator};
use crate::model::RiskModel;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main simulation engine
pub struct SimulationEngine {
    config: SimulationConfig,
    fx: FxTable,
    cancel: CancellationToken,
}

impl SimulationEngine {
    /// Create an engine with the given run configuration and rate table
    pub fn new(config: SimulationConfig, fx: FxTable) -> Self {
        Self {
            config,
            fx,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally controlled cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn fx(&self) -> &FxTable {
        &self.fx
    }

    /// Seed for this run: configured, or fresh entropy
    pub fn resolve_seed(&self) -> u64 {
        self.config.seed.unwrap_or_else(rand::random)
    }

    fn token(&self) -> CancellationToken {
        match self.config.timeout {
            Some(timeout) => self.cancel.with_timeout(timeout),
            None => self.cancel.clone(),
        }
    }

    /// Resolve `model` without simulating
    ///
    /// With MCMC configured, the evidence is checked against the model here
    /// so incompatibilities surface before the first simulated year.
    pub fn plan(&self, model: &RiskModel) -> RiskResult<SimulationPlan> {
        self.plan_with(model, ControlApplication::Expected)
    }

    pub fn plan_with(&self, model: &RiskModel, application: ControlApplication) -> RiskResult<SimulationPlan> {
        self.config.validate()?;
        let plan = SimulationPlan::build_with(model, &self.fx, application)?;
        if let (Some(mcmc), Some(inputs)) = (&self.config.mcmc, &plan.posterior) {
            McmcEstimator::new(mcmc.clone()).check(inputs)?;
        }
        Ok(plan)
    }

    /// Resolve and run the Monte Carlo estimator only
    pub fn run_losses(&self, model: &RiskModel, seed: u64) -> RiskResult<(SimulationPlan, SimulationRun)> {
        let plan = self.plan(model)?;
        let run = MonteCarloEstimator::new(self.config.runs, self.config.chunks).estimate(&plan, seed, &self.token())?;
        Ok((plan, run))
    }

    /// Resolve with baseline samplers, then run with one control scaling per
    /// year as computed by `scaling` from the resolved plan
    pub fn run_losses_per_year<F>(
        &self,
        model: &RiskModel,
        seed: u64,
        scaling: F,
    ) -> RiskResult<(SimulationPlan, SimulationRun)>
    where
        F: FnOnce(&SimulationPlan) -> Vec<ControlScaling>,
    {
        let plan = self.plan_with(model, ControlApplication::PerYear)?;
        let run = MonteCarloEstimator::new(self.config.runs, self.config.chunks)
            .with_scaling(scaling(&plan))
            .estimate(&plan, seed, &self.token())?;
        Ok((plan, run))
    }

    /// Full run: metrics, distribution artifacts, control summary, posterior
    pub fn simulate(&self, model: &RiskModel) -> RiskResult<SimulationResult> {
        let started = Instant::now();
        let seed = self.resolve_seed();
        let aggregator = MetricsAggregator::new(&self.config.quantiles)?;
        let plan = self.plan(model)?;
        let token = self.token();

        info!(
            "Simulating '{}': {} years, seed {}, {} chunk(s)",
            plan.model_name, self.config.runs, seed, self.config.chunks
        );

        let estimator = MonteCarloEstimator::new(self.config.runs, self.config.chunks);
        let run = estimator.estimate(&plan, seed, &token)?;

        let posterior = match (&self.config.mcmc, &plan.posterior) {
            (Some(mcmc), Some(_)) => Some(McmcEstimator::new(mcmc.clone()).estimate(&plan, seed, &token)?),
            (Some(_), None) => {
                warn!("MCMC requested but the model carries no evidence; skipping");
                None
            }
            (None, _) => None,
        };

        let metrics = aggregator.aggregate(&run.annual_losses)?;
        let histogram = match &self.config.histogram {
            Some(spec) => Some(aggregator.histogram(&run.annual_losses, spec)?),
            None => None,
        };
        let raw_samples = self
            .config
            .raw_sample_limit
            .map(|limit| run.annual_losses.iter().take(limit).cloned().collect());
        let distribution = if histogram.is_some() || raw_samples.is_some() {
            Some(DistributionArtifact { histogram, raw_samples })
        } else {
            None
        };

        for warning in &plan.warnings {
            warn!("{}", warning);
        }

        let runtime_ms = started.elapsed().as_millis();
        info!(
            "Completed '{}' in {} ms: EAL {}{:.2}",
            plan.model_name, runtime_ms, plan.output_symbol, metrics.eal
        );

        Ok(SimulationResult {
            metrics,
            controls: plan.control_summary(),
            distribution,
            posterior,
            warnings: plan.warnings.clone(),
            metadata: RunMetadata {
                model_name: plan.model_name.clone(),
                runs: run.runs(),
                seed,
                chunks: run.chunks,
                runtime_ms,
                completed_at: Utc::now(),
                engine_version: ENGINE_VERSION.to_string(),
                base_currency: plan.base_currency.clone(),
                currency_code: plan.output_currency.clone(),
                currency_symbol: plan.output_symbol.clone(),
                total_events: run.total_events(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RiskEngineError;
    use crate::metrics::HistogramSpec;
    use crate::model::{
        Asset, AssetModel, Basis, Control, ControlSet, CopulaSpec, CopulaStructure, Evidence, FrequencyKind,
        FrequencySpec, ParamValue, RawParameters, SeveritySpec,
    };
    use crate::simulation::McmcConfig;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn base_model() -> RiskModel {
        RiskModel::new("base", FrequencySpec::poisson(0.5), SeveritySpec::lognormal_median(100_000.0, 1.0))
    }

    fn engine(runs: usize, seed: u64) -> SimulationEngine {
        SimulationEngine::new(SimulationConfig::default().with_runs(runs).with_seed(seed), FxTable::default())
    }

    #[test]
    fn test_deterministic_for_seed() {
        let a = engine(5_000, 42).simulate(&base_model()).unwrap();
        let b = engine(5_000, 42).simulate(&base_model()).unwrap();
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.metadata.seed, 42);
        assert_eq!(a.metadata.runs, 5_000);
    }

    #[test]
    fn test_eal_close_to_analytic() {
        let model = base_model();
        let engine = engine(50_000, 1);
        let expected = engine.plan(&model).unwrap().expected_annual_loss();
        // 0.5 * 100k * e^{0.5}
        assert_relative_eq!(expected, 0.5 * 100_000.0 * 0.5f64.exp(), epsilon = 1e-6);
        let result = engine.simulate(&model).unwrap();
        assert!((result.eal() / expected - 1.0).abs() < 0.05, "eal {}", result.eal());
    }

    #[test]
    fn test_zero_lambda_zero_losses() {
        let model = RiskModel::new("zero", FrequencySpec::poisson(0.0), SeveritySpec::lognormal_median(1_000.0, 1.0));
        let result = engine(1_000, 3).simulate(&model).unwrap();
        assert_eq!(result.metrics.eal, 0.0);
        assert_eq!(result.metrics.max, 0.0);
        assert!(result.metrics.var.iter().all(|q| q.value == 0.0));
        assert_eq!(result.metadata.total_events, 0);
    }

    #[test]
    fn test_controls_scale_eal() {
        let controlled = base_model().with_controls(ControlSet::single_layer(vec![Control::new("mfa", 0.5)]));
        let engine = engine(40_000, 5);
        let baseline = engine.simulate(&base_model()).unwrap();
        let reduced = engine.simulate(&controlled).unwrap();
        let ratio = reduced.eal() / baseline.eal();
        assert!((ratio - 0.5).abs() < 0.08, "ratio {}", ratio);
        let summary = reduced.controls.unwrap();
        assert_relative_eq!(summary.effective_lambda, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_output_currency_conversion() {
        let fx = FxTable::single("USD").with_rate("EUR", 1.25).with_output_currency("EUR");
        let config = SimulationConfig::default().with_runs(2_000).with_seed(9);
        let in_usd = SimulationEngine::new(config.clone(), FxTable::default().with_rate("EUR", 1.25))
            .simulate(&base_model())
            .unwrap();
        let in_eur = SimulationEngine::new(config, fx).simulate(&base_model()).unwrap();
        assert_relative_eq!(in_eur.eal(), in_usd.eal() * 0.8, max_relative = 1e-9);
        assert_eq!(in_eur.metadata.currency_code, "EUR");
        assert_eq!(in_eur.metadata.currency_symbol, "€");
    }

    #[test]
    fn test_distribution_artifacts() {
        let mut config = SimulationConfig::default().with_runs(1_000).with_seed(11);
        config.histogram = Some(HistogramSpec::FixedWidth { bins: 20 });
        config.raw_sample_limit = Some(25);
        let result = SimulationEngine::new(config, FxTable::default()).simulate(&base_model()).unwrap();
        let distribution = result.distribution.unwrap();
        let histogram = distribution.histogram.unwrap();
        assert_eq!(histogram.bins.len(), 20);
        assert_eq!(histogram.bins.iter().map(|b| b.count).sum::<u64>(), 1_000);
        assert_eq!(distribution.raw_samples.unwrap().len(), 25);
    }

    #[test]
    fn test_configuration_error_before_simulation() {
        let err = engine(0, 1).simulate(&base_model()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_timeout_cancels() {
        let mut config = SimulationConfig::default().with_runs(1_000).with_seed(1);
        config.timeout = Some(Duration::ZERO);
        let err = SimulationEngine::new(config, FxTable::default())
            .simulate(&base_model())
            .unwrap_err();
        assert!(matches!(err, RiskEngineError::Cancelled { .. }));
    }

    #[test]
    fn test_copula_increases_tail() {
        let component = |asset: &str| AssetModel {
            asset: asset.to_string(),
            frequency: FrequencySpec::poisson(0.3),
            severity: None,
        };
        let assets: Vec<Asset> = ["a", "b", "c", "d"].iter().map(|n| Asset::new(n, 1)).collect();
        let independent = RiskModel {
            frequency: None,
            ..base_model()
        }
        .with_assets(assets)
        .with_components(["a", "b", "c", "d"].iter().map(|n| component(n)).collect());
        let correlated = independent.clone().with_copula(CopulaSpec {
            family: Default::default(),
            targets: vec!["asset:a".into(), "asset:b".into(), "asset:c".into(), "asset:d".into()],
            structure: Some(CopulaStructure::Toeplitz),
            rho: Some(0.95),
            matrix: None,
        });

        let engine = engine(40_000, 21);
        let ind = engine.simulate(&independent).unwrap();
        let cor = engine.simulate(&correlated).unwrap();
        // Marginal counts unchanged, so EAL stays put while the tail fattens
        assert!((cor.eal() / ind.eal() - 1.0).abs() < 0.1);
        assert!(cor.metrics.var_at(99.0).unwrap() > ind.metrics.var_at(99.0).unwrap());
    }

    #[test]
    fn test_tiny_rates_simulate() {
        let tiny = RiskModel::new("tiny", FrequencySpec::poisson(1e-17), SeveritySpec::lognormal_median(1_000.0, 1.0));
        let result = engine(10_000, 6).simulate(&tiny).unwrap();
        assert_eq!(result.metadata.total_events, 0);

        let mut parameters = RawParameters::new();
        parameters.insert("alpha".into(), ParamValue::Number(0.05));
        parameters.insert("beta".into(), ParamValue::Number(1.0));
        let frequency = FrequencySpec {
            model: FrequencyKind::GammaPoisson,
            basis: Basis::PerOrganization,
            parameters,
        };
        let sparse = RiskModel::new("sparse", frequency, SeveritySpec::lognormal_median(1_000.0, 1.0));
        assert!(engine(10_000, 7).simulate(&sparse).is_ok());
    }

    #[test]
    fn test_incompatible_evidence_rejected_before_simulation() {
        let mut parameters = RawParameters::new();
        parameters.insert("alpha".into(), ParamValue::Number(2.0));
        parameters.insert("beta".into(), ParamValue::Number(1.0));
        let frequency = FrequencySpec {
            model: FrequencyKind::GammaPoisson,
            basis: Basis::PerOrganization,
            parameters,
        };
        let model = RiskModel::new("gp", frequency, SeveritySpec::lognormal_median(1_000.0, 1.0)).with_evidence(Evidence {
            annual_event_counts: vec![1, 0, 2],
            ..Evidence::default()
        });
        // A zero timeout would cancel the first year, so only a check made
        // while planning can report the configuration error
        let mut config = SimulationConfig::default()
            .with_runs(1_000)
            .with_seed(2)
            .with_mcmc(McmcConfig::default());
        config.timeout = Some(Duration::ZERO);
        let err = SimulationEngine::new(config, FxTable::default()).simulate(&model).unwrap_err();
        assert!(err.is_configuration(), "{}", err);

        let one_loss = base_model().with_evidence(Evidence {
            loss_amounts: vec![50_000.0],
            ..Evidence::default()
        });
        let config = SimulationConfig::default().with_runs(100).with_mcmc(McmcConfig::default());
        let err = SimulationEngine::new(config, FxTable::default()).plan(&one_loss).unwrap_err();
        assert!(err.is_configuration(), "{}", err);
    }

    #[test]
    fn test_mcmc_attached_when_configured() {
        let model = base_model().with_evidence(Evidence {
            annual_event_counts: vec![0, 1, 0, 2, 1],
            ..Evidence::default()
        });
        let config = SimulationConfig::default()
            .with_runs(500)
            .with_seed(4)
            .with_mcmc(McmcConfig { iterations: 400, burn_in: 100, chains: 2, ..McmcConfig::default() });
        let result = SimulationEngine::new(config, FxTable::default()).simulate(&model).unwrap();
        let posterior = result.posterior.unwrap();
        assert_eq!(posterior.chains, 2);
        assert!(posterior.parameter("lambda").is_some());
    }
}
