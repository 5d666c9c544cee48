//! Run configuration for the simulation engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RiskEngineError, RiskResult};
use crate::metrics::{HistogramSpec, DEFAULT_QUANTILES};

/// Configuration for a simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of simulated years
    pub runs: usize,

    /// Master seed; drawn from entropy when absent and reported back
    pub seed: Option<u64>,

    /// Percentiles in [0, 100] reported as VaR
    pub quantiles: Vec<f64>,

    /// Histogram binning; no histogram when absent
    pub histogram: Option<HistogramSpec>,

    /// Keep the first N annual losses in the result
    pub raw_sample_limit: Option<usize>,

    /// Independent RNG streams run in parallel
    /// 1 keeps the single-stream sequence
    pub chunks: usize,

    /// Wall-clock budget, checked between simulated years
    #[serde(with = "optional_seconds")]
    pub timeout: Option<Duration>,

    /// Posterior estimation from evidence; skipped when absent
    pub mcmc: Option<McmcConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            runs: 10_000,
            seed: None,
            quantiles: DEFAULT_QUANTILES.to_vec(),
            histogram: Some(HistogramSpec::default()),
            raw_sample_limit: None,
            chunks: 1,
            timeout: None,
            mcmc: None,
        }
    }
}

impl SimulationConfig {
    pub fn with_runs(mut self, runs: usize) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_mcmc(mut self, mcmc: McmcConfig) -> Self {
        self.mcmc = Some(mcmc);
        self
    }

    /// Reject settings that cannot produce a run
    pub fn validate(&self) -> RiskResult<()> {
        if self.runs == 0 {
            return Err(RiskEngineError::config("runs", "must be at least 1"));
        }
        if self.chunks == 0 {
            return Err(RiskEngineError::config("chunks", "must be at least 1"));
        }
        for q in &self.quantiles {
            if !q.is_finite() || !(0.0..=100.0).contains(q) {
                return Err(RiskEngineError::config(
                    "quantiles",
                    format!("quantile {} is outside [0, 100]", q),
                ));
            }
        }
        if let Some(histogram) = &self.histogram {
            histogram.validate()?;
        }
        if let Some(mcmc) = &self.mcmc {
            mcmc.validate()?;
        }
        Ok(())
    }
}

/// Metropolis-Hastings settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McmcConfig {
    /// Retained-phase iterations per chain (before thinning)
    pub iterations: usize,

    /// Discarded warm-up iterations per chain
    pub burn_in: usize,

    /// Keep every n-th retained iteration
    pub thinning: usize,

    pub chains: usize,

    /// Multiplier on the random-walk step size
    pub proposal_scale: f64,

    /// Standard deviation of the normal priors on the log scale
    pub prior_scale: f64,

    /// Max kept draws per chain in the reported trace
    pub trace_limit: usize,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            iterations: 2_000,
            burn_in: 500,
            thinning: 1,
            chains: 4,
            proposal_scale: 1.0,
            prior_scale: 1.0,
            trace_limit: 200,
        }
    }
}

impl McmcConfig {
    pub fn validate(&self) -> RiskResult<()> {
        if self.chains == 0 {
            return Err(RiskEngineError::config("mcmc.chains", "must be at least 1"));
        }
        if self.thinning == 0 {
            return Err(RiskEngineError::config("mcmc.thinning", "must be at least 1"));
        }
        if self.iterations / self.thinning < 4 {
            return Err(RiskEngineError::config(
                "mcmc.iterations",
                "need at least 4 kept draws per chain after thinning",
            ));
        }
        for (field, value) in [
            ("mcmc.proposal_scale", self.proposal_scale),
            ("mcmc.prior_scale", self.prior_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(RiskEngineError::config(field, format!("must be > 0, got {}", value)));
            }
        }
        Ok(())
    }

    /// Draws kept per chain after thinning
    pub fn kept_per_chain(&self) -> usize {
        self.iterations / self.thinning
    }
}

mod optional_seconds {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        match secs {
            Some(s) => Duration::try_from_secs_f64(s)
                .map(Some)
                .map_err(|e| serde::de::Error::custom(format!("invalid timeout {}: {}", s, e))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.runs, 10_000);
        assert_eq!(config.chunks, 1);
        assert_eq!(config.histogram, Some(HistogramSpec::FixedWidth { bins: 50 }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_runs_rejected() {
        let err = SimulationConfig::default().with_runs(0).validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{"runs": 500, "seed": 42, "timeout": 1.5}"#).unwrap();
        assert_eq!(config.runs, 500);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.quantiles, DEFAULT_QUANTILES.to_vec());
    }

    #[test]
    fn test_unrepresentable_timeout_rejected() {
        for body in [r#"{"timeout": 1e300}"#, r#"{"timeout": -1}"#] {
            assert!(serde_json::from_str::<SimulationConfig>(body).is_err(), "{}", body);
        }
    }

    #[test]
    fn test_mcmc_validation() {
        let bad = McmcConfig { thinning: 0, ..McmcConfig::default() };
        assert!(bad.validate().is_err());
        let short = McmcConfig { iterations: 10, thinning: 5, ..McmcConfig::default() };
        assert!(short.validate().is_err());
        assert_eq!(McmcConfig::default().kept_per_chain(), 2_000);
    }
}
