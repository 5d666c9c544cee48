//! Error taxonomy and non-fatal warnings for the risk engine

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by model resolution and simulation
///
/// Configuration errors are always raised before the first simulated year.
/// Domain errors mean a sampler produced a value that breaks an invariant.
#[derive(Debug, Error)]
pub enum RiskEngineError {
    #[error("Configuration error: {field}: {reason}")]
    Configuration { field: String, reason: String },

    #[error("Domain error: {0}")]
    Domain(String),

    #[error("Simulation cancelled after {completed} of {requested} years")]
    Cancelled { completed: usize, requested: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl RiskEngineError {
    /// Shorthand for a configuration error on a named field
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        RiskEngineError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, RiskEngineError::Configuration { .. })
    }
}

pub type RiskResult<T> = Result<T, RiskEngineError>;

/// Non-fatal findings attached to a simulation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimulationWarning {
    /// Aggregate control reduction above the sanity threshold
    HighRiskReduction { reduction_pct: f64, threshold_pct: f64 },

    /// Lognormal calibrated from only a handful of observed losses
    SmallCalibrationSample { field: String, samples: usize },
}

impl fmt::Display for SimulationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationWarning::HighRiskReduction { reduction_pct, threshold_pct } => write!(
                f,
                "aggregate control risk reduction of {:.2}% exceeds {:.0}%; check control inputs",
                reduction_pct, threshold_pct
            ),
            SimulationWarning::SmallCalibrationSample { field, samples } => write!(
                f,
                "{} calibrated from only {} observed losses",
                field, samples
            ),
        }
    }
}
