//! Security control modelling
//!
//! Controls reduce the Poisson event rate, the per-event loss, or both,
//! either by their expected reduction or by per-year sampled availability.

mod effectiveness;
mod state;

pub use effectiveness::{
    ControlDetail,
    ControlEffect,
    ControlEffectivenessCalculator,
    HIGH_REDUCTION_THRESHOLD_PCT,
};
pub use state::{ControlScaling, ControlStateSampler};

use serde::{Deserialize, Serialize};

use crate::error::{RiskEngineError, RiskResult};
use crate::sampling::FrequencyModel;

/// Baseline and control-adjusted frequency for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveFrequency {
    pub baseline: FrequencyModel,
    pub effective: FrequencyModel,
    pub risk_reduction_pct: f64,
}

impl ControlEffect {
    /// Apply the frequency survival to a resolved frequency model
    ///
    /// Only Poisson rates can be reduced. Any non-empty control set on a
    /// Gamma-Poisson variant is rejected, whatever the controls affect.
    pub fn apply_to_frequency(&self, baseline: &FrequencyModel, field: &str) -> RiskResult<EffectiveFrequency> {
        if self.details.is_empty() {
            return Ok(EffectiveFrequency {
                baseline: baseline.clone(),
                effective: baseline.clone(),
                risk_reduction_pct: 0.0,
            });
        }

        match baseline {
            FrequencyModel::Poisson { lambda } => Ok(EffectiveFrequency {
                baseline: baseline.clone(),
                effective: FrequencyModel::Poisson {
                    lambda: lambda * self.frequency_survival,
                },
                risk_reduction_pct: self.frequency_reduction_pct(),
            }),
            other => Err(RiskEngineError::config(
                field,
                format!(
                    "controls are only supported with poisson frequency, not {}",
                    other.kind().label()
                ),
            )),
        }
    }
}
