//! Random-walk Metropolis-Hastings over observed evidence
//!
//! Samples the Poisson rate (on the log scale) from annual event counts and
//! the lognormal `mu` / `log sigma` from observed losses. Priors are normal,
//! centred on the resolved model parameters.

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::cancel::CancellationToken;
use super::config::McmcConfig;
use super::estimator::Estimator;
use super::plan::{PosteriorInputs, SimulationPlan};
use crate::error::{RiskEngineError, RiskResult};
use crate::metrics::percentile_sorted;
use crate::sampling::{FrequencyModel, SeverityDistribution, SeverityModel};

/// First RNG stream used by MCMC chains; Monte Carlo chunks use 0..chunks
const CHAIN_STREAM_BASE: u64 = 1 << 32;

/// Starting points are spread by this fraction of the prior sd
const START_DISPERSION: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Param {
    LogLambda,
    Mu,
    LogSigma,
}

impl Param {
    fn name(&self) -> &'static str {
        match self {
            Param::LogLambda => "lambda",
            Param::Mu => "mu",
            Param::LogSigma => "sigma",
        }
    }

    /// Sampling scale to reported scale
    fn natural(&self, value: f64) -> f64 {
        match self {
            Param::LogLambda | Param::LogSigma => value.exp(),
            Param::Mu => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorParameter {
    pub name: String,
    pub prior_center: f64,
    pub mean: f64,
    pub sd: f64,
    pub q05: f64,
    pub q50: f64,
    pub q95: f64,
    /// Split potential scale reduction factor
    pub r_hat: f64,
    /// Effective sample size summed over chains
    pub ess: f64,
    /// Kept draws per chain, truncated to the trace limit
    pub trace: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSummary {
    pub chains: usize,
    pub iterations: usize,
    pub burn_in: usize,
    pub thinning: usize,
    pub acceptance_rate: f64,
    pub parameters: Vec<PosteriorParameter>,
}

impl PosteriorSummary {
    pub fn parameter(&self, name: &str) -> Option<&PosteriorParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Log-posterior over the parameters the evidence informs
struct Target {
    params: Vec<Param>,
    center: Vec<f64>,
    prior_sd: f64,
    step: Vec<f64>,
    count_total: f64,
    years: f64,
    exposure: f64,
    log_losses: Vec<f64>,
}

impl Target {
    fn from_inputs(inputs: &PosteriorInputs, config: &McmcConfig) -> RiskResult<Self> {
        let mut params = Vec::new();
        let mut center = Vec::new();
        let mut step = Vec::new();

        let count_total: f64 = inputs.annual_event_counts.iter().map(|&k| k as f64).sum();
        let years = inputs.annual_event_counts.len() as f64;

        if !inputs.annual_event_counts.is_empty() {
            let lambda = match &inputs.frequency {
                Some(FrequencyModel::Poisson { lambda }) => *lambda,
                Some(other) => {
                    return Err(RiskEngineError::config(
                        "evidence.annual_event_counts",
                        format!("posterior estimation supports poisson frequency, not {}", other.kind().label()),
                    ));
                }
                None => {
                    return Err(RiskEngineError::config(
                        "evidence.annual_event_counts",
                        "posterior estimation needs a model-level frequency",
                    ));
                }
            };
            if inputs.exposure <= 0.0 {
                return Err(RiskEngineError::config(
                    "evidence.annual_event_counts",
                    "model exposure is zero",
                ));
            }
            let start = if lambda > 0.0 {
                lambda
            } else {
                (count_total / years + 0.5) / inputs.exposure
            };
            params.push(Param::LogLambda);
            center.push(start.ln());
            step.push(1.0 / (count_total + 1.0).sqrt());
        }

        let log_losses: Vec<f64> = inputs.loss_amounts.iter().map(|x| x.ln()).collect();
        if !log_losses.is_empty() {
            let (mu, sigma) = match &inputs.severity {
                SeverityModel::Single(SeverityDistribution::Lognormal { mu, sigma }) => (*mu, *sigma),
                _ => {
                    return Err(RiskEngineError::config(
                        "evidence.loss_amounts",
                        "posterior estimation supports a single lognormal severity only",
                    ));
                }
            };
            if log_losses.len() < 2 {
                return Err(RiskEngineError::config(
                    "evidence.loss_amounts",
                    "at least two observed losses are required",
                ));
            }
            let n = log_losses.len() as f64;
            params.push(Param::Mu);
            center.push(mu);
            step.push(sigma / n.sqrt());
            params.push(Param::LogSigma);
            center.push(sigma.ln());
            step.push(1.0 / (2.0 * n).sqrt());
        }

        if params.is_empty() {
            return Err(RiskEngineError::config("evidence", "no observations to estimate from"));
        }

        Ok(Self {
            params,
            center,
            prior_sd: config.prior_scale,
            step: step.into_iter().map(|s| s * config.proposal_scale).collect(),
            count_total,
            years,
            exposure: inputs.exposure,
            log_losses,
        })
    }

    fn log_posterior(&self, theta: &[f64]) -> f64 {
        let mut lp: f64 = theta
            .iter()
            .zip(&self.center)
            .map(|(t, c)| -0.5 * ((t - c) / self.prior_sd).powi(2))
            .sum();

        for (i, param) in self.params.iter().enumerate() {
            match param {
                Param::LogLambda => {
                    let log_lambda = theta[i];
                    lp += self.count_total * log_lambda - self.years * self.exposure * log_lambda.exp();
                }
                Param::Mu => {
                    let mu = theta[i];
                    let log_sigma = theta[i + 1];
                    let sigma = log_sigma.exp();
                    let n = self.log_losses.len() as f64;
                    let sq: f64 = self.log_losses.iter().map(|l| (l - mu).powi(2)).sum();
                    lp += -n * log_sigma - sq / (2.0 * sigma * sigma);
                }
                Param::LogSigma => {}
            }
        }
        lp
    }
}

struct ChainOutput {
    /// draws[param][k]
    draws: Vec<Vec<f64>>,
    accepted: usize,
    proposed: usize,
}

/// Posterior estimator over `RiskModel` evidence
#[derive(Debug, Clone)]
pub struct McmcEstimator {
    config: McmcConfig,
}

impl McmcEstimator {
    pub fn new(config: McmcConfig) -> Self {
        Self { config }
    }

    /// Check that the evidence can be fitted against the resolved model
    /// without running any chain
    pub fn check(&self, inputs: &PosteriorInputs) -> RiskResult<()> {
        self.config.validate()?;
        Target::from_inputs(inputs, &self.config).map(|_| ())
    }

    fn run_chain(
        &self,
        target: &Target,
        seed: u64,
        chain: usize,
        cancel: &CancellationToken,
    ) -> RiskResult<ChainOutput> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        rng.set_stream(CHAIN_STREAM_BASE + chain as u64);

        let dim = target.params.len();
        let mut theta: Vec<f64> = target
            .center
            .iter()
            .map(|c| {
                let z: f64 = rng.sample(StandardNormal);
                c + START_DISPERSION * target.prior_sd * z
            })
            .collect();
        let mut current = target.log_posterior(&theta);

        let total = self.config.burn_in + self.config.iterations;
        let mut draws = vec![Vec::with_capacity(self.config.kept_per_chain()); dim];
        let mut accepted = 0;
        let mut proposal = vec![0.0; dim];

        for iter in 0..total {
            if cancel.is_cancelled() {
                return Err(RiskEngineError::Cancelled {
                    completed: iter,
                    requested: total,
                });
            }

            for ((p, t), s) in proposal.iter_mut().zip(&theta).zip(&target.step) {
                let z: f64 = rng.sample(StandardNormal);
                *p = t + s * z;
            }
            let candidate = target.log_posterior(&proposal);
            let u: f64 = rng.gen();
            let accept = candidate.is_finite() && u.ln() < candidate - current;
            if accept {
                theta.copy_from_slice(&proposal);
                current = candidate;
            }

            if iter >= self.config.burn_in {
                if accept {
                    accepted += 1;
                }
                if (iter - self.config.burn_in) % self.config.thinning == 0 {
                    for (param_draws, (param, value)) in draws.iter_mut().zip(target.params.iter().zip(&theta)) {
                        param_draws.push(param.natural(*value));
                    }
                }
            }
        }

        Ok(ChainOutput {
            draws,
            accepted,
            proposed: self.config.iterations,
        })
    }
}

impl Estimator for McmcEstimator {
    type Output = PosteriorSummary;

    fn name(&self) -> &'static str {
        "mcmc"
    }

    fn estimate(&self, plan: &SimulationPlan, seed: u64, cancel: &CancellationToken) -> RiskResult<PosteriorSummary> {
        self.config.validate()?;
        let inputs = plan
            .posterior
            .as_ref()
            .ok_or_else(|| RiskEngineError::config("evidence", "posterior estimation requires evidence"))?;
        let target = Target::from_inputs(inputs, &self.config)?;

        info!(
            "MCMC: {} chain(s) x {} iterations (+{} burn-in) over {:?}",
            self.config.chains,
            self.config.iterations,
            self.config.burn_in,
            target.params.iter().map(|p| p.name()).collect::<Vec<_>>()
        );

        let chains: Vec<ChainOutput> = (0..self.config.chains)
            .into_par_iter()
            .map(|chain| self.run_chain(&target, seed, chain, cancel))
            .collect::<RiskResult<Vec<_>>>()?;

        let accepted: usize = chains.iter().map(|c| c.accepted).sum();
        let proposed: usize = chains.iter().map(|c| c.proposed).sum();
        let acceptance_rate = if proposed > 0 {
            accepted as f64 / proposed as f64
        } else {
            0.0
        };

        let parameters = target
            .params
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let per_chain: Vec<Vec<f64>> = chains.iter().map(|c| c.draws[i].clone()).collect();
                summarize(param.name(), param.natural(target.center[i]), per_chain, self.config.trace_limit)
            })
            .collect::<Vec<_>>();

        for p in &parameters {
            debug!(
                "Posterior {}: mean {:.4} sd {:.4} r_hat {:.3} ess {:.0}",
                p.name, p.mean, p.sd, p.r_hat, p.ess
            );
        }

        Ok(PosteriorSummary {
            chains: self.config.chains,
            iterations: self.config.iterations,
            burn_in: self.config.burn_in,
            thinning: self.config.thinning,
            acceptance_rate,
            parameters,
        })
    }
}

fn summarize(name: &str, prior_center: f64, chains: Vec<Vec<f64>>, trace_limit: usize) -> PosteriorParameter {
    let mut pooled: Vec<f64> = chains.iter().flatten().cloned().collect();
    pooled.sort_by(|a, b| a.total_cmp(b));
    let n = pooled.len() as f64;
    let mean = pooled.iter().sum::<f64>() / n;
    let sd = (pooled.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0)).sqrt();

    PosteriorParameter {
        name: name.to_string(),
        prior_center,
        mean,
        sd,
        q05: percentile_sorted(&pooled, 5.0),
        q50: percentile_sorted(&pooled, 50.0),
        q95: percentile_sorted(&pooled, 95.0),
        r_hat: split_r_hat(&chains),
        ess: chains.iter().map(|c| effective_sample_size(c)).sum(),
        trace: chains
            .into_iter()
            .map(|c| c.into_iter().take(trace_limit).collect())
            .collect(),
    }
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

/// Split-chain R-hat: every chain is halved, then the usual between/within
/// variance ratio is taken over the halves
pub fn split_r_hat(chains: &[Vec<f64>]) -> f64 {
    let half = chains.iter().map(|c| c.len()).min().unwrap_or(0) / 2;
    if half < 2 {
        return f64::NAN;
    }

    let halves: Vec<&[f64]> = chains
        .iter()
        .flat_map(|c| [&c[..half], &c[c.len() - half..]])
        .collect();
    let stats: Vec<(f64, f64)> = halves.iter().map(|h| mean_and_variance(h)).collect();

    let m = stats.len() as f64;
    let h = half as f64;
    let within = stats.iter().map(|(_, v)| v).sum::<f64>() / m;
    let grand = stats.iter().map(|(mean, _)| mean).sum::<f64>() / m;
    let between = h * stats.iter().map(|(mean, _)| (mean - grand).powi(2)).sum::<f64>() / (m - 1.0);

    if within <= 0.0 {
        return if between <= 0.0 { 1.0 } else { f64::INFINITY };
    }
    let var_plus = (h - 1.0) / h * within + between / h;
    (var_plus / within).sqrt()
}

/// Lag-`lag` autocorrelation
pub fn autocorrelation(values: &[f64], lag: usize) -> f64 {
    let n = values.len();
    if lag >= n {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance: f64 = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    if variance < 1e-15 {
        return 0.0;
    }
    let covariance: f64 = values[..n - lag]
        .iter()
        .zip(&values[lag..])
        .map(|(x, y)| (x - mean) * (y - mean))
        .sum::<f64>()
        / n as f64;
    covariance / variance
}

/// `n / (1 + 2 Σ rho_k)`, summing until the autocorrelation is negligible
pub fn effective_sample_size(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 4 {
        return n as f64;
    }
    let max_lag = (n / 2).min(100);
    let mut sum_rho = 0.0;
    for lag in 1..max_lag {
        let rho = autocorrelation(values, lag);
        if rho < 0.05 {
            break;
        }
        sum_rho += rho;
    }
    let tau = 1.0 + 2.0 * sum_rho;
    (n as f64 / tau).min(n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::FxTable;
    use crate::model::{Evidence, FrequencySpec, RiskModel, SeveritySpec};

    fn plan_with(evidence: Evidence, lambda: f64) -> SimulationPlan {
        let model = RiskModel::new(
            "evidence",
            FrequencySpec::poisson(lambda),
            SeveritySpec::lognormal_median(10_000.0, 1.0),
        )
        .with_evidence(evidence);
        SimulationPlan::build(&model, &FxTable::default()).unwrap()
    }

    fn quick_config() -> McmcConfig {
        McmcConfig {
            iterations: 2_000,
            burn_in: 500,
            chains: 3,
            ..McmcConfig::default()
        }
    }

    #[test]
    fn test_poisson_posterior_tracks_counts() {
        let plan = plan_with(
            Evidence {
                annual_event_counts: vec![3, 5, 4, 6, 2, 4, 5, 3, 4, 4],
                ..Evidence::default()
            },
            1.0,
        );
        let summary = McmcEstimator::new(quick_config())
            .estimate(&plan, 42, &CancellationToken::new())
            .unwrap();
        let lambda = summary.parameter("lambda").unwrap();
        assert!(lambda.mean > 3.3 && lambda.mean < 4.5, "mean {}", lambda.mean);
        assert!(lambda.q05 < lambda.q50 && lambda.q50 < lambda.q95);
        assert!(lambda.r_hat < 1.1, "r_hat {}", lambda.r_hat);
        assert!(summary.acceptance_rate > 0.1 && summary.acceptance_rate < 0.95);
        assert_eq!(lambda.trace.len(), 3);
        assert_eq!(lambda.trace[0].len(), 200);
    }

    #[test]
    fn test_lognormal_posterior_tracks_losses() {
        // log losses: ln(20 000) + {-1, -0.5, 0, 0.5, 1} repeated
        let base = 20_000f64.ln();
        let losses: Vec<f64> = (0..30)
            .map(|i| (base + (i % 5) as f64 * 0.5 - 1.0).exp())
            .collect();
        let plan = plan_with(
            Evidence {
                loss_amounts: losses,
                ..Evidence::default()
            },
            1.0,
        );
        let summary = McmcEstimator::new(quick_config())
            .estimate(&plan, 7, &CancellationToken::new())
            .unwrap();
        let mu = summary.parameter("mu").unwrap();
        let sigma = summary.parameter("sigma").unwrap();
        assert!((mu.mean - base).abs() < 0.3, "mu {}", mu.mean);
        assert!(sigma.mean > 0.5 && sigma.mean < 1.1, "sigma {}", sigma.mean);
        assert!(summary.parameter("lambda").is_none());
    }

    #[test]
    fn test_deterministic_for_seed() {
        let evidence = Evidence {
            annual_event_counts: vec![1, 0, 2, 1],
            ..Evidence::default()
        };
        let plan = plan_with(evidence, 0.8);
        let estimator = McmcEstimator::new(quick_config());
        let a = estimator.estimate(&plan, 99, &CancellationToken::new()).unwrap();
        let b = estimator.estimate(&plan, 99, &CancellationToken::new()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_evidence_is_configuration_error() {
        let model = RiskModel::new("m", FrequencySpec::poisson(1.0), SeveritySpec::lognormal_median(1_000.0, 1.0));
        let plan = SimulationPlan::build(&model, &FxTable::default()).unwrap();
        let err = McmcEstimator::new(quick_config())
            .estimate(&plan, 1, &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_cancelled_chain() {
        let plan = plan_with(
            Evidence {
                annual_event_counts: vec![1, 2],
                ..Evidence::default()
            },
            1.0,
        );
        let token = CancellationToken::new();
        token.cancel();
        let err = McmcEstimator::new(quick_config()).estimate(&plan, 1, &token).unwrap_err();
        assert!(matches!(err, RiskEngineError::Cancelled { .. }));
    }

    #[test]
    fn test_r_hat_and_ess_on_iid_draws() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let chains: Vec<Vec<f64>> = (0..4)
            .map(|_| (0..1_000).map(|_| rng.sample::<f64, _>(StandardNormal)).collect())
            .collect();
        let r_hat = split_r_hat(&chains);
        assert!((r_hat - 1.0).abs() < 0.02, "r_hat {}", r_hat);
        let ess = effective_sample_size(&chains[0]);
        assert!(ess > 800.0, "ess {}", ess);

        let shifted = vec![vec![0.0, 0.1, 0.0, 0.1, 0.0, 0.1], vec![5.0, 5.1, 5.0, 5.1, 5.0, 5.1]];
        assert!(split_r_hat(&shifted) > 2.0);
    }
}
