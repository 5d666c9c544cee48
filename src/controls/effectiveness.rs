//! Control effectiveness aggregation
//!
//! Each control removes `effectiveness × coverage × reliability` of the
//! events (or loss) it sees. Independent controls compound multiplicatively.
//! A dependency group of correlated controls blends between independence and
//! the single strongest member:
//!
//! ```text
//! survival_group = (1 - c) × Π(1 - r_i) + c × min(1 - r_i)
//! ```

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{RiskEngineError, RiskResult, SimulationWarning};
use crate::model::{Affects, Control, ControlSet, ControlType};

/// Aggregate reduction above which a warning is attached
pub const HIGH_REDUCTION_THRESHOLD_PCT: f64 = 99.0;

/// Per-control breakdown reported alongside results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDetail {
    pub id: String,
    pub layer: String,
    pub control_type: Option<ControlType>,
    pub affects: Affects,
    pub effectiveness: f64,
    pub coverage: f64,
    pub reliability: f64,
    /// `effectiveness × coverage × reliability`
    pub reduction: f64,
    pub cost: Option<f64>,
}

/// Surviving fractions after all controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEffect {
    pub frequency_survival: f64,
    pub severity_survival: f64,
    pub details: Vec<ControlDetail>,
    pub warnings: Vec<SimulationWarning>,
}

impl ControlEffect {
    /// No controls: nothing is reduced
    pub fn none() -> Self {
        Self {
            frequency_survival: 1.0,
            severity_survival: 1.0,
            details: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn frequency_reduction_pct(&self) -> f64 {
        (1.0 - self.frequency_survival) * 100.0
    }

    pub fn severity_reduction_pct(&self) -> f64 {
        (1.0 - self.severity_survival) * 100.0
    }

    pub fn reduces_frequency(&self) -> bool {
        self.details.iter().any(|d| d.affects.reduces_frequency())
    }

    pub fn reduces_severity(&self) -> bool {
        self.details.iter().any(|d| d.affects.reduces_severity())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Frequency,
    Severity,
}

impl Target {
    fn applies(&self, affects: Affects) -> bool {
        match self {
            Target::Frequency => affects.reduces_frequency(),
            Target::Severity => affects.reduces_severity(),
        }
    }
}

/// Validates control sets and computes their combined effect
#[derive(Debug, Clone)]
pub struct ControlEffectivenessCalculator {
    threshold_pct: f64,
}

impl Default for ControlEffectivenessCalculator {
    fn default() -> Self {
        Self {
            threshold_pct: HIGH_REDUCTION_THRESHOLD_PCT,
        }
    }
}

impl ControlEffectivenessCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(threshold_pct: f64) -> Self {
        Self { threshold_pct }
    }

    /// Validate `set` and compute frequency and severity survival
    pub fn evaluate(&self, set: &ControlSet) -> RiskResult<ControlEffect> {
        let details = validate_controls(set)?;
        let reductions: HashMap<&str, (f64, Affects)> = details
            .iter()
            .map(|d| (d.id.as_str(), (d.reduction, d.affects)))
            .collect();
        validate_dependencies(set, &reductions)?;

        let frequency_survival = survival(set, &reductions, Target::Frequency);
        let severity_survival = survival(set, &reductions, Target::Severity);

        let mut effect = ControlEffect {
            frequency_survival,
            severity_survival,
            details,
            warnings: Vec::new(),
        };

        for reduction_pct in [effect.frequency_reduction_pct(), effect.severity_reduction_pct()] {
            if reduction_pct > self.threshold_pct {
                warn!(
                    "Control reduction of {:.2}% exceeds {:.0}% threshold",
                    reduction_pct, self.threshold_pct
                );
                effect.warnings.push(SimulationWarning::HighRiskReduction {
                    reduction_pct,
                    threshold_pct: self.threshold_pct,
                });
            }
        }

        debug!(
            "Controls: {} evaluated, frequency survival {:.4}, severity survival {:.4}",
            effect.details.len(),
            effect.frequency_survival,
            effect.severity_survival
        );
        Ok(effect)
    }
}

fn unit_interval(control: &Control, name: &str, value: f64) -> RiskResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(RiskEngineError::config(
            format!("controls.{}.{}", control.id, name),
            format!("must be in [0, 1], got {}", value),
        ));
    }
    Ok(())
}

fn validate_controls(set: &ControlSet) -> RiskResult<Vec<ControlDetail>> {
    let mut seen = HashSet::new();
    let mut details = Vec::new();

    for (layer, control) in set.iter_controls() {
        if control.id.trim().is_empty() {
            return Err(RiskEngineError::config(
                format!("controls.{}", layer),
                "control id must not be empty",
            ));
        }
        if !seen.insert(control.id.as_str()) {
            return Err(RiskEngineError::config(
                format!("controls.{}", control.id),
                "duplicate control id",
            ));
        }
        unit_interval(control, "effectiveness", control.effectiveness)?;
        unit_interval(control, "coverage", control.coverage)?;
        unit_interval(control, "reliability", control.reliability)?;
        if let Some(cost) = control.cost {
            if !cost.is_finite() || cost < 0.0 {
                return Err(RiskEngineError::config(
                    format!("controls.{}.cost", control.id),
                    format!("must be >= 0, got {}", cost),
                ));
            }
        }

        details.push(ControlDetail {
            id: control.id.clone(),
            layer: layer.to_string(),
            control_type: control.control_type,
            affects: control.affects,
            effectiveness: control.effectiveness,
            coverage: control.coverage,
            reliability: control.reliability,
            reduction: control.effectiveness * control.coverage * control.reliability,
            cost: control.cost,
        });
    }

    Ok(details)
}

fn validate_dependencies(set: &ControlSet, known: &HashMap<&str, (f64, Affects)>) -> RiskResult<()> {
    let mut grouped: HashSet<&str> = HashSet::new();

    for (i, dependency) in set.dependencies.iter().enumerate() {
        let field = format!("controls.dependencies[{}]", i);
        if !dependency.correlation.is_finite() || !(0.0..=1.0).contains(&dependency.correlation) {
            return Err(RiskEngineError::config(
                format!("{}.correlation", field),
                format!("must be in [0, 1], got {}", dependency.correlation),
            ));
        }

        let members: HashSet<&str> = dependency.controls.iter().map(|c| c.as_str()).collect();
        if members.len() < 2 || members.len() != dependency.controls.len() {
            return Err(RiskEngineError::config(
                format!("{}.controls", field),
                "a dependency needs at least two distinct control ids",
            ));
        }
        for id in &dependency.controls {
            if !known.contains_key(id.as_str()) {
                return Err(RiskEngineError::config(
                    format!("{}.controls", field),
                    format!("unknown control id '{}'", id),
                ));
            }
            if !grouped.insert(id.as_str()) {
                return Err(RiskEngineError::config(
                    format!("{}.controls", field),
                    format!("control '{}' already belongs to another dependency", id),
                ));
            }
        }
    }

    Ok(())
}

fn survival(set: &ControlSet, reductions: &HashMap<&str, (f64, Affects)>, target: Target) -> f64 {
    let grouped: HashSet<&str> = set
        .dependencies
        .iter()
        .flat_map(|d| d.controls.iter().map(|c| c.as_str()))
        .collect();

    let independent: f64 = set
        .iter_controls()
        .filter(|(_, c)| !grouped.contains(c.id.as_str()) && target.applies(c.affects))
        .map(|(_, c)| 1.0 - reductions[c.id.as_str()].0)
        .product();

    let correlated: f64 = set
        .dependencies
        .iter()
        .map(|dependency| {
            let survivals: Vec<f64> = dependency
                .controls
                .iter()
                .filter_map(|id| reductions.get(id.as_str()))
                .filter(|(_, affects)| target.applies(*affects))
                .map(|(r, _)| 1.0 - r)
                .collect();
            if survivals.is_empty() {
                return 1.0;
            }
            let product: f64 = survivals.iter().product();
            let strongest = survivals.iter().cloned().fold(f64::INFINITY, f64::min);
            (1.0 - dependency.correlation) * product + dependency.correlation * strongest
        })
        .product();

    (independent * correlated).clamp(0.0, 1.0)
}
