//! Per-event loss sampling
//!
//! Distributions are resolved to base currency before they reach this
//! module. A draw that is negative or non-finite is a domain error.

use rand::Rng;
use rand_distr::{Distribution, Gamma, LogNormal};
use serde::{Deserialize, Serialize};

use crate::error::{RiskEngineError, RiskResult};

/// Canonical single-distribution severity parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SeverityDistribution {
    /// `mu` and `sigma` on the natural-log scale of base-currency losses
    Lognormal { mu: f64, sigma: f64 },
    /// `scale` in base currency
    Gamma { shape: f64, scale: f64 },
}

impl SeverityDistribution {
    pub fn mean(&self) -> f64 {
        match self {
            SeverityDistribution::Lognormal { mu, sigma } => (mu + 0.5 * sigma * sigma).exp(),
            SeverityDistribution::Gamma { shape, scale } => shape * scale,
        }
    }

    /// Rejects parameters the sampler constructors would let through
    /// (`LogNormal::new` accepts a negative sigma)
    pub fn validate(&self) -> RiskResult<()> {
        match *self {
            SeverityDistribution::Lognormal { mu, sigma } => {
                if !mu.is_finite() || !sigma.is_finite() || sigma <= 0.0 {
                    return Err(RiskEngineError::Domain(format!(
                        "lognormal({}, {}): mu must be finite and sigma positive",
                        mu, sigma
                    )));
                }
            }
            SeverityDistribution::Gamma { shape, scale } => {
                if !shape.is_finite() || !scale.is_finite() || shape <= 0.0 || scale <= 0.0 {
                    return Err(RiskEngineError::Domain(format!(
                        "gamma({}, {}): shape and scale must be positive",
                        shape, scale
                    )));
                }
            }
        }
        Ok(())
    }

    fn prepare(&self) -> RiskResult<PreparedDistribution> {
        self.validate()?;
        match *self {
            SeverityDistribution::Lognormal { mu, sigma } => LogNormal::new(mu, sigma)
                .map(PreparedDistribution::Lognormal)
                .map_err(|e| RiskEngineError::Domain(format!("lognormal({}, {}): {}", mu, sigma, e))),
            SeverityDistribution::Gamma { shape, scale } => Gamma::new(shape, scale)
                .map(PreparedDistribution::Gamma)
                .map_err(|e| RiskEngineError::Domain(format!("gamma({}, {}): {}", shape, scale, e))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureComponent {
    pub weight: f64,
    pub distribution: SeverityDistribution,
}

/// Resolved severity: one distribution or an ordered weighted mixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityModel {
    Single(SeverityDistribution),
    Mixture(Vec<MixtureComponent>),
}

impl SeverityModel {
    pub fn mean(&self) -> f64 {
        match self {
            SeverityModel::Single(dist) => dist.mean(),
            SeverityModel::Mixture(components) => {
                components.iter().map(|c| c.weight * c.distribution.mean()).sum()
            }
        }
    }
}

#[derive(Debug, Clone)]
enum PreparedDistribution {
    Lognormal(LogNormal<f64>),
    Gamma(Gamma<f64>),
}

impl PreparedDistribution {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            PreparedDistribution::Lognormal(d) => d.sample(rng),
            PreparedDistribution::Gamma(d) => d.sample(rng),
        }
    }
}

/// Loss sampler for one component
///
/// Mixtures select a component with one uniform draw per event, walking the
/// cumulative weights in declaration order.
#[derive(Debug, Clone)]
pub struct SeveritySampler {
    model: SeverityModel,
    prepared: Vec<PreparedDistribution>,
    cumulative: Vec<f64>,
    /// Surviving fraction after severity-reducing controls
    factor: f64,
}

impl SeveritySampler {
    pub fn new(model: SeverityModel, factor: f64) -> RiskResult<Self> {
        let (prepared, cumulative) = match &model {
            SeverityModel::Single(dist) => (vec![dist.prepare()?], vec![1.0]),
            SeverityModel::Mixture(components) => {
                if components.is_empty() {
                    return Err(RiskEngineError::Domain("mixture with no components".into()));
                }
                let prepared = components
                    .iter()
                    .map(|c| c.distribution.prepare())
                    .collect::<RiskResult<Vec<_>>>()?;
                let mut running = 0.0;
                let cumulative = components
                    .iter()
                    .map(|c| {
                        running += c.weight;
                        running
                    })
                    .collect();
                (prepared, cumulative)
            }
        };

        Ok(Self {
            model,
            prepared,
            cumulative,
            factor,
        })
    }

    pub fn model(&self) -> &SeverityModel {
        &self.model
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Expected loss per event after control reduction
    pub fn expected_loss(&self) -> f64 {
        self.model.mean() * self.factor
    }

    /// One event's loss in base currency
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> RiskResult<f64> {
        let index = if self.prepared.len() == 1 {
            0
        } else {
            let u: f64 = rng.gen();
            self.cumulative
                .iter()
                .position(|c| u < *c)
                .unwrap_or(self.prepared.len() - 1)
        };

        let loss = self.prepared[index].sample(rng);
        if !loss.is_finite() || loss < 0.0 {
            return Err(RiskEngineError::Domain(format!(
                "severity draw {} is not a valid loss",
                loss
            )));
        }
        Ok(loss * self.factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn sample_mean(sampler: &SeveritySampler, n: usize, seed: u64) -> f64 {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        (0..n).map(|_| sampler.sample(&mut rng).unwrap()).sum::<f64>() / n as f64
    }

    #[test]
    fn test_lognormal_median() {
        let mu = 100_000f64.ln();
        let sampler = SeveritySampler::new(
            SeverityModel::Single(SeverityDistribution::Lognormal { mu, sigma: 1.0 }),
            1.0,
        )
        .unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let mut draws: Vec<f64> = (0..20_001).map(|_| sampler.sample(&mut rng).unwrap()).collect();
        draws.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = draws[10_000];
        assert!((median / 100_000.0 - 1.0).abs() < 0.05, "median {}", median);
    }

    #[test]
    fn test_gamma_mean() {
        let sampler = SeveritySampler::new(
            SeverityModel::Single(SeverityDistribution::Gamma { shape: 2.0, scale: 5_000.0 }),
            1.0,
        )
        .unwrap();
        let mean = sample_mean(&sampler, 40_000, 8);
        assert!((mean / 10_000.0 - 1.0).abs() < 0.03, "mean {}", mean);
    }

    #[test]
    fn test_mixture_weights() {
        // Narrow components far apart so each draw reveals its component
        let model = SeverityModel::Mixture(vec![
            MixtureComponent {
                weight: 0.7,
                distribution: SeverityDistribution::Lognormal { mu: 10f64.ln(), sigma: 0.01 },
            },
            MixtureComponent {
                weight: 0.3,
                distribution: SeverityDistribution::Lognormal { mu: 1_000_000f64.ln(), sigma: 0.01 },
            },
        ]);
        let sampler = SeveritySampler::new(model, 1.0).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let n = 20_000;
        let large = (0..n).filter(|_| sampler.sample(&mut rng).unwrap() > 1_000.0).count();
        let share = large as f64 / n as f64;
        assert!((share - 0.3).abs() < 0.015, "share {}", share);
    }

    #[test]
    fn test_control_factor_scales_losses() {
        let dist = SeverityDistribution::Gamma { shape: 3.0, scale: 1_000.0 };
        let full = SeveritySampler::new(SeverityModel::Single(dist), 1.0).unwrap();
        let reduced = SeveritySampler::new(SeverityModel::Single(dist), 0.25).unwrap();
        let a = sample_mean(&full, 5_000, 10);
        let b = sample_mean(&reduced, 5_000, 10);
        assert!((b - 0.25 * a).abs() < 1e-6 * a);
        assert!((reduced.expected_loss() - 750.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let bad = SeverityModel::Single(SeverityDistribution::Lognormal { mu: 0.0, sigma: -1.0 });
        assert!(SeveritySampler::new(bad, 1.0).is_err());
    }

    #[test]
    fn test_degenerate_parameters_rejected() {
        let cases = [
            SeverityDistribution::Lognormal { mu: 1.0, sigma: 0.0 },
            SeverityDistribution::Lognormal { mu: f64::NAN, sigma: 1.0 },
            SeverityDistribution::Lognormal { mu: 1.0, sigma: f64::INFINITY },
            SeverityDistribution::Gamma { shape: 0.0, scale: 1.0 },
            SeverityDistribution::Gamma { shape: 2.0, scale: -5.0 },
        ];
        for dist in cases {
            let err = SeveritySampler::new(SeverityModel::Single(dist), 1.0).unwrap_err();
            assert!(matches!(err, RiskEngineError::Domain(_)), "{:?}", dist);
        }

        // A bad component poisons the whole mixture
        let mixture = SeverityModel::Mixture(vec![
            MixtureComponent {
                weight: 0.5,
                distribution: SeverityDistribution::Lognormal { mu: 5.0, sigma: 1.0 },
            },
            MixtureComponent {
                weight: 0.5,
                distribution: SeverityDistribution::Lognormal { mu: 5.0, sigma: -0.5 },
            },
        ]);
        assert!(SeveritySampler::new(mixture, 1.0).is_err());
    }
}
