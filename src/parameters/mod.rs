//! Parameter resolution
//!
//! Turns raw, possibly currency-tagged parameter blocks into canonical
//! distribution parameters in base currency.

pub mod frequency;
pub mod numberish;
pub mod severity;

pub use frequency::{resolve_frequency, HIERARCHICAL_DEFAULT_BASE};
pub use numberish::{parse_number, parse_number_list, FieldKind, ParamReader};
pub use severity::{calibrate_lognormal, resolve_severity, LognormalCalibration, SMALL_SAMPLE_THRESHOLD};

use crate::currency::CurrencyNormalizer;
use crate::error::{RiskResult, SimulationWarning};
use crate::model::{FrequencySpec, SeveritySpec};
use crate::sampling::{FrequencyModel, SeverityModel};

/// Resolves frequency and severity blocks against one currency context
///
/// Calibration warnings accumulate on the resolver and are handed to the
/// result by the caller.
pub struct ParameterResolver<'a> {
    currency: &'a CurrencyNormalizer<'a>,
    warnings: Vec<SimulationWarning>,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(currency: &'a CurrencyNormalizer<'a>) -> Self {
        Self {
            currency,
            warnings: Vec::new(),
        }
    }

    pub fn frequency(&self, spec: &FrequencySpec, path: &str) -> RiskResult<FrequencyModel> {
        resolve_frequency(spec, path)
    }

    pub fn severity(&mut self, spec: &SeveritySpec, path: &str) -> RiskResult<SeverityModel> {
        resolve_severity(spec, self.currency, path, &mut self.warnings)
    }

    pub fn currency(&self) -> &CurrencyNormalizer<'a> {
        self.currency
    }

    pub fn into_warnings(self) -> Vec<SimulationWarning> {
        self.warnings
    }
}
