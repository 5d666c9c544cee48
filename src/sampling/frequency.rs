//! Annual event-count sampling
//!
//! Poisson, Gamma-Poisson (negative binomial marginal), and the hierarchical
//! variant that redraws its Gamma parameters from hyperpriors every year.

use rand::Rng;
use rand_distr::{Distribution, Gamma, Poisson};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Gamma as GammaDist};
use statrs::function::gamma::gamma_ur;

use crate::error::{RiskEngineError, RiskResult};
use crate::model::FrequencyKind;

/// Gamma hyperprior on a frequency parameter (shape/scale convention)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaPrior {
    pub shape: f64,
    pub scale: f64,
}

/// Canonical frequency parameters
///
/// `beta` is a scale parameter throughout, so the mean annual rate of the
/// Gamma variants is `alpha * beta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum FrequencyModel {
    Poisson {
        lambda: f64,
    },
    GammaPoisson {
        alpha: f64,
        beta: f64,
    },
    HierarchicalGammaPoisson {
        alpha: f64,
        beta: f64,
        alpha_prior: Option<GammaPrior>,
        beta_prior: Option<GammaPrior>,
    },
}

impl FrequencyModel {
    pub fn kind(&self) -> FrequencyKind {
        match self {
            FrequencyModel::Poisson { .. } => FrequencyKind::Poisson,
            FrequencyModel::GammaPoisson { .. } => FrequencyKind::GammaPoisson,
            FrequencyModel::HierarchicalGammaPoisson { .. } => FrequencyKind::HierarchicalGammaPoisson,
        }
    }

    /// Expected events per year before exposure scaling
    pub fn mean_rate(&self) -> f64 {
        match self {
            FrequencyModel::Poisson { lambda } => *lambda,
            FrequencyModel::GammaPoisson { alpha, beta } => alpha * beta,
            FrequencyModel::HierarchicalGammaPoisson { alpha, beta, alpha_prior, beta_prior } => {
                let a = alpha_prior.map(|p| p.shape * p.scale).unwrap_or(*alpha);
                let b = beta_prior.map(|p| p.shape * p.scale).unwrap_or(*beta);
                a * b
            }
        }
    }
}

/// Smallest `k` with `P(X <= k) >= u` for `X ~ Poisson(lambda)`
///
/// Uses `P(X <= k) = Q(k + 1, lambda)`, the regularized upper incomplete
/// gamma function, with an exponential bracket and bisection.
pub fn poisson_quantile(u: f64, lambda: f64) -> u64 {
    if lambda <= 0.0 || u <= 0.0 {
        return 0;
    }
    let u = u.min(1.0 - 1e-15);
    let cdf = |k: u64| gamma_ur(k as f64 + 1.0, lambda);

    if cdf(0) >= u {
        return 0;
    }
    let mut lo = 0u64;
    let mut hi = (lambda + 10.0 * lambda.sqrt() + 10.0).ceil() as u64;
    while cdf(hi) < u {
        lo = hi;
        hi *= 2;
    }
    // cdf(lo) < u <= cdf(hi)
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if cdf(mid) >= u {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

/// Inverse CDF of Gamma(shape, scale)
pub fn gamma_quantile(u: f64, shape: f64, scale: f64) -> RiskResult<f64> {
    let dist = GammaDist::new(shape, 1.0 / scale)
        .map_err(|e| RiskEngineError::Domain(format!("invalid gamma parameters: {}", e)))?;
    Ok(dist.inverse_cdf(u.clamp(1e-15, 1.0 - 1e-15)))
}

/// Stateless event-count sampler for one component
///
/// `exposure` multiplies the annual rate (asset cardinality for per-asset
/// bases, 1 otherwise).
#[derive(Debug, Clone)]
pub struct FrequencySampler {
    model: FrequencyModel,
    exposure: f64,
}

impl FrequencySampler {
    pub fn new(model: FrequencyModel, exposure: f64) -> Self {
        Self { model, exposure }
    }

    pub fn model(&self) -> &FrequencyModel {
        &self.model
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    /// Expected events per simulated year
    pub fn expected_events(&self) -> f64 {
        self.model.mean_rate() * self.exposure
    }

    /// Independent draw of this year's event count
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> RiskResult<u64> {
        self.sample_scaled(1.0, rng)
    }

    /// Independent draw with this year's rate multiplied by `scale`
    pub fn sample_scaled<R: Rng + ?Sized>(&self, scale: f64, rng: &mut R) -> RiskResult<u64> {
        let exposure = self.exposure * scale;
        match &self.model {
            FrequencyModel::Poisson { lambda } => draw_poisson(lambda * exposure, rng),
            FrequencyModel::GammaPoisson { alpha, beta } => {
                let rate = draw_gamma(*alpha, *beta, rng)?;
                draw_poisson(rate * exposure, rng)
            }
            FrequencyModel::HierarchicalGammaPoisson { .. } => {
                let (alpha, beta) = self.year_parameters(rng)?;
                let rate = draw_gamma(alpha, beta, rng)?;
                draw_poisson(rate * exposure, rng)
            }
        }
    }

    /// Event count driven by a copula uniform
    ///
    /// Poisson counts come straight from the quantile function. For the Gamma
    /// variants the uniform fixes the year's rate through the Gamma quantile
    /// and the count is then drawn conditionally on that rate.
    pub fn sample_with_uniform<R: Rng + ?Sized>(&self, u: f64, rng: &mut R) -> RiskResult<u64> {
        self.sample_with_uniform_scaled(u, 1.0, rng)
    }

    pub fn sample_with_uniform_scaled<R: Rng + ?Sized>(&self, u: f64, scale: f64, rng: &mut R) -> RiskResult<u64> {
        let exposure = self.exposure * scale;
        match &self.model {
            FrequencyModel::Poisson { lambda } => Ok(poisson_quantile(u, lambda * exposure)),
            FrequencyModel::GammaPoisson { alpha, beta } => {
                if *alpha <= 0.0 || *beta <= 0.0 {
                    return Ok(0);
                }
                let rate = gamma_quantile(u, *alpha, *beta)?;
                draw_poisson(rate * exposure, rng)
            }
            FrequencyModel::HierarchicalGammaPoisson { .. } => {
                let (alpha, beta) = self.year_parameters(rng)?;
                if alpha <= 0.0 || beta <= 0.0 {
                    return Ok(0);
                }
                let rate = gamma_quantile(u, alpha, beta)?;
                draw_poisson(rate * exposure, rng)
            }
        }
    }

    /// Hierarchical alpha/beta for the current year
    fn year_parameters<R: Rng + ?Sized>(&self, rng: &mut R) -> RiskResult<(f64, f64)> {
        match &self.model {
            FrequencyModel::HierarchicalGammaPoisson { alpha, beta, alpha_prior, beta_prior } => {
                let alpha = match alpha_prior {
                    Some(p) => draw_gamma(p.shape, p.scale, rng)?,
                    None => *alpha,
                };
                let beta = match beta_prior {
                    Some(p) => draw_gamma(p.shape, p.scale, rng)?,
                    None => *beta,
                };
                Ok((alpha, beta))
            }
            FrequencyModel::Poisson { .. } | FrequencyModel::GammaPoisson { .. } => {
                Err(RiskEngineError::Domain("hyperpriors requested for a non-hierarchical model".into()))
            }
        }
    }
}

/// Rates below this go through the quantile function
const TINY_RATE: f64 = 1e-12;

fn draw_poisson<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> RiskResult<u64> {
    if rate <= 0.0 {
        return Ok(0);
    }
    // rand_distr's small-mean sampler yields -1 once exp(-rate) rounds to 1
    if rate < TINY_RATE || (-rate).exp() >= 1.0 {
        return Ok(poisson_quantile(rng.gen(), rate));
    }
    let poisson = Poisson::new(rate)
        .map_err(|e| RiskEngineError::Domain(format!("invalid Poisson rate {}: {}", rate, e)))?;
    let draw: f64 = poisson.sample(rng);
    if !draw.is_finite() || draw < 0.0 {
        return Err(RiskEngineError::Domain(format!("Poisson draw {} is not a valid count", draw)));
    }
    Ok(draw as u64)
}

fn draw_gamma<R: Rng + ?Sized>(shape: f64, scale: f64, rng: &mut R) -> RiskResult<f64> {
    if shape <= 0.0 || scale <= 0.0 {
        return Ok(0.0);
    }
    let gamma = Gamma::new(shape, scale)
        .map_err(|e| RiskEngineError::Domain(format!("invalid gamma({}, {}): {}", shape, scale, e)))?;
    Ok(gamma.sample(rng))
}
