//! Severity parameter resolution and lognormal calibration
//!
//! Everything monetary is converted into base currency here, so the
//! samplers never see a declared currency.

use log::debug;

use super::numberish::{FieldKind, ParamReader};
use crate::currency::CurrencyNormalizer;
use crate::error::{RiskEngineError, RiskResult, SimulationWarning};
use crate::model::{RawParameters, SeverityKind, SeveritySpec};
use crate::sampling::{MixtureComponent, SeverityDistribution, SeverityModel};

/// Below this many observed losses a calibration warning is attached
pub const SMALL_SAMPLE_THRESHOLD: usize = 5;

const WEIGHT_TOL: f64 = 1e-6;

/// Lognormal parameters fitted to observed losses
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LognormalCalibration {
    pub median: f64,
    pub mu: f64,
    pub sigma: f64,
}

/// Fit `mu = ln(median)` and `sigma` as the population standard deviation
/// of the log losses
pub fn calibrate_lognormal(losses: &[f64]) -> LognormalCalibration {
    let mut sorted = losses.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let median = if n == 0 {
        f64::NAN
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    };

    let logs: Vec<f64> = losses.iter().map(|x| x.ln()).collect();
    let mean = logs.iter().sum::<f64>() / n as f64;
    let variance = logs.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n as f64;

    LognormalCalibration {
        median,
        mu: median.ln(),
        sigma: variance.sqrt(),
    }
}

/// Resolve a severity block into a base-currency severity model
pub fn resolve_severity(
    spec: &SeveritySpec,
    currency: &CurrencyNormalizer<'_>,
    path: &str,
    warnings: &mut Vec<SimulationWarning>,
) -> RiskResult<SeverityModel> {
    match spec.model {
        SeverityKind::Mixture => {
            if !spec.parameters.is_empty() {
                return Err(RiskEngineError::config(
                    format!("{}.parameters", path),
                    "mixture parameters belong to its components",
                ));
            }
            resolve_mixture(spec, currency, path, warnings)
        }
        kind => {
            if !spec.components.is_empty() {
                return Err(RiskEngineError::config(
                    format!("{}.components", path),
                    format!("components are only valid for mixture, not {}", kind.label()),
                ));
            }
            let dist = resolve_distribution(kind, &spec.parameters, currency, path, warnings)?;
            Ok(SeverityModel::Single(dist))
        }
    }
}

fn resolve_mixture(
    spec: &SeveritySpec,
    currency: &CurrencyNormalizer<'_>,
    path: &str,
    warnings: &mut Vec<SimulationWarning>,
) -> RiskResult<SeverityModel> {
    if spec.components.is_empty() {
        return Err(RiskEngineError::config(
            format!("{}.components", path),
            "mixture needs at least one component",
        ));
    }

    let mut components = Vec::with_capacity(spec.components.len());
    for (i, component) in spec.components.iter().enumerate() {
        let component_path = format!("{}.components[{}]", path, i);
        if !component.weight.is_finite() || !(0.0..=1.0).contains(&component.weight) {
            return Err(RiskEngineError::config(
                format!("{}.weight", component_path),
                format!("weight must be in [0, 1], got {}", component.weight),
            ));
        }
        let distribution = resolve_distribution(
            component.model,
            &component.parameters,
            currency,
            &format!("{}.parameters", component_path),
            warnings,
        )?;
        components.push(MixtureComponent {
            weight: component.weight,
            distribution,
        });
    }

    let total: f64 = components.iter().map(|c| c.weight).sum();
    if (total - 1.0).abs() > WEIGHT_TOL {
        return Err(RiskEngineError::config(
            format!("{}.components", path),
            format!("mixture weights sum to {}, expected 1", total),
        ));
    }

    Ok(SeverityModel::Mixture(components))
}

fn resolve_distribution(
    kind: SeverityKind,
    params: &RawParameters,
    currency: &CurrencyNormalizer<'_>,
    path: &str,
    warnings: &mut Vec<SimulationWarning>,
) -> RiskResult<SeverityDistribution> {
    let reader = ParamReader::new(params, path);
    match kind {
        SeverityKind::Lognormal => resolve_lognormal(&reader, currency, warnings),
        SeverityKind::Gamma => resolve_gamma(&reader, currency),
        SeverityKind::Mixture => Err(RiskEngineError::config(
            path,
            "nested mixtures are not supported",
        )),
    }
}

fn resolve_lognormal(
    reader: &ParamReader<'_>,
    currency: &CurrencyNormalizer<'_>,
    warnings: &mut Vec<SimulationWarning>,
) -> RiskResult<SeverityDistribution> {
    reader.deny_unknown(&["median", "mu", "sigma", "single_losses", "currency"])?;
    let rate = currency.rate_to_base(reader.optional_text("currency")?, &reader.field("currency"))?;

    if let Some(losses) = reader.optional_list("single_losses", FieldKind::Monetary)? {
        for conflicting in ["median", "mu", "sigma"] {
            if reader.has(conflicting) {
                return Err(RiskEngineError::config(
                    reader.field(conflicting),
                    "cannot be combined with single_losses",
                ));
            }
        }
        return calibrate_from_losses(reader, &losses, rate, warnings);
    }

    let sigma = reader.required("sigma", FieldKind::Factor)?;
    if sigma <= 0.0 {
        return Err(RiskEngineError::config(
            reader.field("sigma"),
            format!("must be > 0, got {}", sigma),
        ));
    }

    let median = reader.optional("median", FieldKind::Monetary)?;
    let mu = reader.optional("mu", FieldKind::Factor)?;
    let mu = match (median, mu) {
        (Some(_), Some(_)) => {
            return Err(RiskEngineError::config(
                reader.field("mu"),
                "give either median or mu, not both",
            ));
        }
        (Some(median), None) => {
            if median <= 0.0 {
                return Err(RiskEngineError::config(
                    reader.field("median"),
                    format!("must be > 0, got {}", median),
                ));
            }
            (median * rate).ln()
        }
        (None, Some(mu)) => mu + rate.ln(),
        (None, None) => {
            return Err(RiskEngineError::config(
                reader.field("median"),
                "lognormal needs median, mu, or single_losses",
            ));
        }
    };

    Ok(SeverityDistribution::Lognormal { mu, sigma })
}

fn calibrate_from_losses(
    reader: &ParamReader<'_>,
    losses: &[f64],
    rate: f64,
    warnings: &mut Vec<SimulationWarning>,
) -> RiskResult<SeverityDistribution> {
    let field = reader.field("single_losses");
    if losses.len() < 2 {
        return Err(RiskEngineError::config(&field, "at least two losses are required"));
    }
    if let Some(bad) = losses.iter().find(|x| **x <= 0.0) {
        return Err(RiskEngineError::config(
            &field,
            format!("losses must be > 0, got {}", bad),
        ));
    }

    let converted: Vec<f64> = losses.iter().map(|x| x * rate).collect();
    let fit = calibrate_lognormal(&converted);
    if fit.sigma <= 0.0 {
        return Err(RiskEngineError::config(
            &field,
            "identical losses give zero dispersion; provide median and sigma instead",
        ));
    }

    if losses.len() < SMALL_SAMPLE_THRESHOLD {
        warnings.push(SimulationWarning::SmallCalibrationSample {
            field: field.clone(),
            samples: losses.len(),
        });
    }
    debug!(
        "{}: calibrated median={:.2} mu={:.4} sigma={:.4} from {} losses",
        field,
        fit.median,
        fit.mu,
        fit.sigma,
        losses.len()
    );

    Ok(SeverityDistribution::Lognormal {
        mu: fit.mu,
        sigma: fit.sigma,
    })
}

fn resolve_gamma(reader: &ParamReader<'_>, currency: &CurrencyNormalizer<'_>) -> RiskResult<SeverityDistribution> {
    reader.deny_unknown(&["shape", "scale", "currency"])?;
    let rate = currency.rate_to_base(reader.optional_text("currency")?, &reader.field("currency"))?;

    let shape = reader.required("shape", FieldKind::Factor)?;
    let scale = reader.required("scale", FieldKind::Monetary)?;
    for (key, value) in [("shape", shape), ("scale", scale)] {
        if value <= 0.0 {
            return Err(RiskEngineError::config(
                reader.field(key),
                format!("must be > 0, got {}", value),
            ));
        }
    }

    Ok(SeverityDistribution::Gamma {
        shape,
        scale: scale * rate,
    })
}
