//! Frequency parameter resolution

use super::numberish::{FieldKind, ParamReader};
use crate::error::{RiskEngineError, RiskResult};
use crate::model::{FrequencyKind, FrequencySpec};
use crate::sampling::{FrequencyModel, GammaPrior};

/// Default `alpha_base` / `beta_base` for the hierarchical model
pub const HIERARCHICAL_DEFAULT_BASE: f64 = 1.5;

/// Resolve a frequency block into canonical parameters
///
/// Rates of zero are accepted and produce zero events.
pub fn resolve_frequency(spec: &FrequencySpec, path: &str) -> RiskResult<FrequencyModel> {
    let reader = ParamReader::new(&spec.parameters, path);

    match spec.model {
        FrequencyKind::Poisson => {
            reader.deny_unknown(&["lambda"])?;
            let lambda = non_negative(&reader, "lambda", reader.required("lambda", FieldKind::Factor)?)?;
            Ok(FrequencyModel::Poisson { lambda })
        }
        FrequencyKind::GammaPoisson => {
            reader.deny_unknown(&["alpha", "beta"])?;
            let alpha = non_negative(&reader, "alpha", reader.required("alpha", FieldKind::Factor)?)?;
            let beta = non_negative(&reader, "beta", reader.required("beta", FieldKind::Factor)?)?;
            Ok(FrequencyModel::GammaPoisson { alpha, beta })
        }
        FrequencyKind::HierarchicalGammaPoisson => {
            reader.deny_unknown(&[
                "alpha_base",
                "beta_base",
                "alpha_hyper_shape",
                "alpha_hyper_scale",
                "beta_hyper_shape",
                "beta_hyper_scale",
            ])?;
            let alpha = reader
                .optional("alpha_base", FieldKind::Factor)?
                .unwrap_or(HIERARCHICAL_DEFAULT_BASE);
            let beta = reader
                .optional("beta_base", FieldKind::Factor)?
                .unwrap_or(HIERARCHICAL_DEFAULT_BASE);
            Ok(FrequencyModel::HierarchicalGammaPoisson {
                alpha: non_negative(&reader, "alpha_base", alpha)?,
                beta: non_negative(&reader, "beta_base", beta)?,
                alpha_prior: hyperprior(&reader, "alpha")?,
                beta_prior: hyperprior(&reader, "beta")?,
            })
        }
    }
}

fn non_negative(reader: &ParamReader<'_>, key: &str, value: f64) -> RiskResult<f64> {
    if value < 0.0 {
        return Err(RiskEngineError::config(
            reader.field(key),
            format!("must be >= 0, got {}", value),
        ));
    }
    Ok(value)
}

/// `<prefix>_hyper_shape` and `<prefix>_hyper_scale`, both or neither
fn hyperprior(reader: &ParamReader<'_>, prefix: &str) -> RiskResult<Option<GammaPrior>> {
    let shape_key = format!("{}_hyper_shape", prefix);
    let scale_key = format!("{}_hyper_scale", prefix);
    let shape = reader.optional(&shape_key, FieldKind::Factor)?;
    let scale = reader.optional(&scale_key, FieldKind::Factor)?;

    match (shape, scale) {
        (None, None) => Ok(None),
        (Some(shape), Some(scale)) => {
            for (key, value) in [(&shape_key, shape), (&scale_key, scale)] {
                if value <= 0.0 {
                    return Err(RiskEngineError::config(
                        reader.field(key),
                        format!("hyperprior parameters must be > 0, got {}", value),
                    ));
                }
            }
            Ok(Some(GammaPrior { shape, scale }))
        }
        (Some(_), None) => Err(RiskEngineError::config(
            reader.field(&scale_key),
            format!("required when {} is set", shape_key),
        )),
        (None, Some(_)) => Err(RiskEngineError::config(
            reader.field(&shape_key),
            format!("required when {} is set", scale_key),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Basis, ParamValue, RawParameters};

    fn spec(model: FrequencyKind, params: &[(&str, ParamValue)]) -> FrequencySpec {
        let parameters: RawParameters = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        FrequencySpec { model, basis: Basis::PerOrganization, parameters }
    }

    #[test]
    fn test_poisson() {
        let resolved = resolve_frequency(&FrequencySpec::poisson(0.3), "frequency").unwrap();
        assert_eq!(resolved, FrequencyModel::Poisson { lambda: 0.3 });
    }

    #[test]
    fn test_negative_lambda_rejected() {
        let err = resolve_frequency(&FrequencySpec::poisson(-0.1), "frequency").unwrap_err();
        assert!(err.to_string().contains("frequency.lambda"));
    }

    #[test]
    fn test_grouped_lambda_rejected() {
        let s = spec(FrequencyKind::Poisson, &[("lambda", "1 000".into())]);
        assert!(resolve_frequency(&s, "frequency").unwrap_err().is_configuration());
    }

    #[test]
    fn test_gamma_poisson_requires_both() {
        let s = spec(FrequencyKind::GammaPoisson, &[("alpha", 2.0.into())]);
        let err = resolve_frequency(&s, "frequency").unwrap_err();
        assert!(err.to_string().contains("frequency.beta"));
    }

    #[test]
    fn test_hierarchical_defaults() {
        let s = spec(FrequencyKind::HierarchicalGammaPoisson, &[]);
        let resolved = resolve_frequency(&s, "frequency").unwrap();
        assert_eq!(
            resolved,
            FrequencyModel::HierarchicalGammaPoisson {
                alpha: 1.5,
                beta: 1.5,
                alpha_prior: None,
                beta_prior: None,
            }
        );
    }

    #[test]
    fn test_hyperprior_pairs() {
        let s = spec(
            FrequencyKind::HierarchicalGammaPoisson,
            &[("alpha_hyper_shape", 2.0.into()), ("alpha_hyper_scale", 0.5.into())],
        );
        match resolve_frequency(&s, "frequency").unwrap() {
            FrequencyModel::HierarchicalGammaPoisson { alpha_prior, .. } => {
                assert_eq!(alpha_prior, Some(GammaPrior { shape: 2.0, scale: 0.5 }));
            }
            other => panic!("unexpected {:?}", other),
        }

        let half = spec(FrequencyKind::HierarchicalGammaPoisson, &[("beta_hyper_shape", 2.0.into())]);
        let err = resolve_frequency(&half, "frequency").unwrap_err();
        assert!(err.to_string().contains("beta_hyper_scale"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let s = spec(FrequencyKind::Poisson, &[("lambda", 1.0.into()), ("rate", 2.0.into())]);
        assert!(resolve_frequency(&s, "frequency").is_err());
    }
}
