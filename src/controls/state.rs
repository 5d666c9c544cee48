//! Per-year control availability
//!
//! In sampled mode each control is up or down in every simulated year, with
//! `P(up) = reliability`. States may be correlated through a Gaussian copula
//! over `control:<id>:state` targets. A control that is up removes
//! `effectiveness × coverage` of what it affects; a control that is down
//! removes nothing.

use rand::Rng;
use std::collections::{HashMap, HashSet};

use super::effectiveness::ControlDetail;
use crate::error::{RiskEngineError, RiskResult};
use crate::model::{Control, CopulaSpec};
use crate::sampling::{build_copula, GaussianCopula};

const STATE_TARGET_PREFIX: &str = "control:";
const STATE_TARGET_SUFFIX: &str = ":state";

/// Multipliers applied to one simulated year
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlScaling {
    /// Multiplies the annual event rate
    pub frequency: f64,
    /// Multiplies every loss of the year
    pub severity: f64,
}

impl ControlScaling {
    pub const NONE: ControlScaling = ControlScaling {
        frequency: 1.0,
        severity: 1.0,
    };

    /// Scaling for one scenario's controls given the year's states
    ///
    /// Controls absent from `index` count as up.
    pub fn from_states(details: &[ControlDetail], index: &HashMap<String, usize>, states: &[bool]) -> Self {
        let mut scaling = Self::NONE;
        for detail in details {
            let up = index.get(&detail.id).map(|&i| states[i]).unwrap_or(true);
            if !up {
                continue;
            }
            let survival = 1.0 - detail.effectiveness * detail.coverage;
            if detail.affects.reduces_frequency() {
                scaling.frequency *= survival;
            }
            if detail.affects.reduces_severity() {
                scaling.severity *= survival;
            }
        }
        scaling
    }
}

/// Draws every control's up/down state for a year
#[derive(Debug, Clone)]
pub struct ControlStateSampler {
    ids: Vec<String>,
    reliabilities: Vec<f64>,
    index: HashMap<String, usize>,
    copula: Option<GaussianCopula>,
    /// Control index for each copula dimension
    targets: Vec<usize>,
    /// Controls drawn independently, in catalog order
    independent: Vec<usize>,
}

impl ControlStateSampler {
    /// Catalog the controls (first declaration of an id wins) and attach the
    /// optional state copula
    pub fn new<'a>(controls: impl IntoIterator<Item = &'a Control>, copula: Option<&CopulaSpec>) -> RiskResult<Self> {
        let mut ids = Vec::new();
        let mut reliabilities = Vec::new();
        let mut index = HashMap::new();
        for control in controls {
            if index.contains_key(&control.id) {
                continue;
            }
            index.insert(control.id.clone(), ids.len());
            ids.push(control.id.clone());
            reliabilities.push(control.reliability);
        }

        let (copula, targets) = match copula {
            Some(spec) => {
                let targets = state_targets(spec, &index)?;
                (Some(build_copula(spec, "dependency.copula")?), targets)
            }
            None => (None, Vec::new()),
        };

        let targeted: HashSet<usize> = targets.iter().copied().collect();
        let independent = (0..ids.len()).filter(|i| !targeted.contains(i)).collect();

        Ok(Self {
            ids,
            reliabilities,
            index,
            copula,
            targets,
            independent,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn index(&self) -> &HashMap<String, usize> {
        &self.index
    }

    pub fn copula_dim(&self) -> usize {
        self.targets.len()
    }

    /// Fill `states` (one slot per control) for one year
    ///
    /// Copula uniforms are drawn first, then one uniform per untargeted
    /// control in catalog order.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, uniforms: &mut [f64], states: &mut [bool]) {
        if let Some(copula) = &self.copula {
            copula.sample_uniforms(rng, uniforms);
            for (slot, &i) in self.targets.iter().enumerate() {
                states[i] = uniforms[slot] <= self.reliabilities[i];
            }
        }
        for &i in &self.independent {
            states[i] = rng.gen::<f64>() <= self.reliabilities[i];
        }
    }
}

fn state_targets(spec: &CopulaSpec, index: &HashMap<String, usize>) -> RiskResult<Vec<usize>> {
    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(spec.targets.len());
    for (i, target) in spec.targets.iter().enumerate() {
        let field = format!("dependency.copula.targets[{}]", i);
        let id = target
            .strip_prefix(STATE_TARGET_PREFIX)
            .and_then(|rest| rest.strip_suffix(STATE_TARGET_SUFFIX))
            .ok_or_else(|| {
                RiskEngineError::config(&field, format!("unsupported target '{}'; expected control:<id>:state", target))
            })?;
        let control = *index
            .get(id)
            .ok_or_else(|| RiskEngineError::config(&field, format!("unknown control id '{}'", id)))?;
        if !seen.insert(control) {
            return Err(RiskEngineError::config(&field, format!("duplicate target '{}'", target)));
        }
        targets.push(control);
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::ControlEffectivenessCalculator;
    use crate::model::{Affects, ControlSet, CopulaStructure};
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn state_copula(ids: &[&str], rho: f64) -> CopulaSpec {
        CopulaSpec {
            family: Default::default(),
            targets: ids.iter().map(|id| format!("control:{}:state", id)).collect(),
            structure: Some(CopulaStructure::Toeplitz),
            rho: Some(rho),
            matrix: None,
        }
    }

    fn up_rate(sampler: &ControlStateSampler, years: usize, seed: u64) -> Vec<f64> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut uniforms = vec![0.0; sampler.copula_dim()];
        let mut states = vec![true; sampler.len()];
        let mut up = vec![0usize; sampler.len()];
        for _ in 0..years {
            sampler.sample(&mut rng, &mut uniforms, &mut states);
            for (count, state) in up.iter_mut().zip(&states) {
                *count += usize::from(*state);
            }
        }
        up.into_iter().map(|c| c as f64 / years as f64).collect()
    }

    #[test]
    fn test_up_rate_matches_reliability() {
        let controls = [
            Control::new("mfa", 0.8).with_reliability(0.9),
            Control::new("edr", 0.6).with_reliability(0.5),
        ];
        let sampler = ControlStateSampler::new(&controls, None).unwrap();
        let rates = up_rate(&sampler, 20_000, 1);
        assert!((rates[0] - 0.9).abs() < 0.01, "{:?}", rates);
        assert!((rates[1] - 0.5).abs() < 0.015, "{:?}", rates);
    }

    #[test]
    fn test_first_declaration_wins() {
        let controls = [
            Control::new("mfa", 0.8).with_reliability(0.9),
            Control::new("mfa", 0.8).with_reliability(0.1),
        ];
        let sampler = ControlStateSampler::new(&controls, None).unwrap();
        assert_eq!(sampler.len(), 1);
        assert_eq!(sampler.reliabilities, vec![0.9]);
    }

    #[test]
    fn test_correlated_states_fail_together() {
        let controls = [
            Control::new("a", 0.5).with_reliability(0.7),
            Control::new("b", 0.5).with_reliability(0.7),
        ];
        let copula = state_copula(&["a", "b"], 1.0);
        let sampler = ControlStateSampler::new(&controls, Some(&copula)).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let mut uniforms = vec![0.0; 2];
        let mut states = vec![true; 2];
        for _ in 0..2_000 {
            sampler.sample(&mut rng, &mut uniforms, &mut states);
            assert_eq!(states[0], states[1]);
        }
        let rates = up_rate(&sampler, 20_000, 3);
        assert!((rates[0] - 0.7).abs() < 0.015, "{:?}", rates);
    }

    #[test]
    fn test_state_target_errors() {
        let controls = [Control::new("a", 0.5), Control::new("b", 0.5)];
        for spec in [
            state_copula(&["a", "ghost"], 0.5),
            state_copula(&["a", "a"], 0.5),
            CopulaSpec {
                targets: vec!["asset:web".into(), "control:a:state".into()],
                ..state_copula(&[], 0.5)
            },
        ] {
            let err = ControlStateSampler::new(&controls, Some(&spec)).unwrap_err();
            assert!(err.is_configuration(), "{}", err);
        }
    }

    #[test]
    fn test_scaling_from_states() {
        let set = ControlSet::single_layer(vec![
            Control::new("mfa", 0.8).with_coverage(0.5),
            Control {
                affects: Affects::Severity,
                ..Control::new("backup", 0.6)
            },
        ]);
        let effect = ControlEffectivenessCalculator::new().evaluate(&set).unwrap();
        let sampler = ControlStateSampler::new(set.iter_controls().map(|(_, c)| c), None).unwrap();

        let up = ControlScaling::from_states(&effect.details, sampler.index(), &[true, true]);
        assert_relative_eq!(up.frequency, 0.6, epsilon = 1e-12);
        assert_relative_eq!(up.severity, 0.4, epsilon = 1e-12);

        let down = ControlScaling::from_states(&effect.details, sampler.index(), &[false, false]);
        assert_eq!(down, ControlScaling::NONE);
    }
}
