//! In-memory risk model document structures
//!
//! These mirror the validated scenario document. Parameter blocks stay as raw
//! key/value maps here; `parameters::ParameterResolver` turns them into
//! canonical distribution parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw parameter block as it appears in the document
pub type RawParameters = BTreeMap<String, ParamValue>;

fn default_cardinality() -> u64 {
    1
}

fn default_unit_interval() -> f64 {
    1.0
}

/// A single raw parameter value
///
/// Numbers may arrive as plain JSON numbers or as strings such as `"100 000"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
    List(Vec<ParamValue>),
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        ParamValue::List(v.into_iter().map(ParamValue::Number).collect())
    }
}

/// An exposed asset group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,

    /// Number of units in the group
    #[serde(default = "default_cardinality")]
    pub cardinality: u64,

    /// Optional criticality score; informational only
    #[serde(default)]
    pub criticality_index: Option<f64>,
}

impl Asset {
    pub fn new(name: &str, cardinality: u64) -> Self {
        Self {
            name: name.to_string(),
            cardinality,
            criticality_index: None,
        }
    }
}

/// Event-count model kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyKind {
    Poisson,
    GammaPoisson,
    HierarchicalGammaPoisson,
}

impl FrequencyKind {
    pub fn label(&self) -> &'static str {
        match self {
            FrequencyKind::Poisson => "poisson",
            FrequencyKind::GammaPoisson => "gamma_poisson",
            FrequencyKind::HierarchicalGammaPoisson => "hierarchical_gamma_poisson",
        }
    }
}

/// Whether a frequency rate applies to the organization or to each asset unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Basis {
    #[default]
    PerOrganization,
    PerAsset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencySpec {
    pub model: FrequencyKind,

    #[serde(default)]
    pub basis: Basis,

    #[serde(default)]
    pub parameters: RawParameters,
}

impl FrequencySpec {
    /// Poisson frequency with a plain numeric lambda
    pub fn poisson(lambda: f64) -> Self {
        let mut parameters = RawParameters::new();
        parameters.insert("lambda".to_string(), ParamValue::Number(lambda));
        Self {
            model: FrequencyKind::Poisson,
            basis: Basis::PerOrganization,
            parameters,
        }
    }
}

/// Per-event loss model kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityKind {
    Lognormal,
    Gamma,
    Mixture,
}

impl SeverityKind {
    pub fn label(&self) -> &'static str {
        match self {
            SeverityKind::Lognormal => "lognormal",
            SeverityKind::Gamma => "gamma",
            SeverityKind::Mixture => "mixture",
        }
    }
}

/// One weighted component of a severity mixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureComponentSpec {
    pub weight: f64,
    pub model: SeverityKind,
    #[serde(default)]
    pub parameters: RawParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeveritySpec {
    pub model: SeverityKind,

    #[serde(default)]
    pub parameters: RawParameters,

    /// Only used by `mixture`; order is preserved
    #[serde(default)]
    pub components: Vec<MixtureComponentSpec>,
}

impl SeveritySpec {
    /// Lognormal severity given a median loss and sigma
    pub fn lognormal_median(median: f64, sigma: f64) -> Self {
        let mut parameters = RawParameters::new();
        parameters.insert("median".to_string(), ParamValue::Number(median));
        parameters.insert("sigma".to_string(), ParamValue::Number(sigma));
        Self {
            model: SeverityKind::Lognormal,
            parameters,
            components: Vec::new(),
        }
    }
}

/// Frequency/severity pair bound to one asset group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetModel {
    pub asset: String,
    pub frequency: FrequencySpec,

    /// Falls back to the model-level severity when absent
    #[serde(default)]
    pub severity: Option<SeveritySpec>,
}

/// Informational control classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    Preventive,
    Detective,
    Corrective,
    Recovery,
    Deterrent,
    Compensating,
}

/// Which draw a control reduces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affects {
    #[default]
    Frequency,
    Severity,
    Both,
}

impl Affects {
    pub fn reduces_frequency(&self) -> bool {
        matches!(self, Affects::Frequency | Affects::Both)
    }

    pub fn reduces_severity(&self) -> bool {
        matches!(self, Affects::Severity | Affects::Both)
    }
}

/// A security control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub id: String,

    #[serde(rename = "type", default)]
    pub control_type: Option<ControlType>,

    pub effectiveness: f64,

    #[serde(default = "default_unit_interval")]
    pub coverage: f64,

    #[serde(default = "default_unit_interval")]
    pub reliability: f64,

    #[serde(default)]
    pub cost: Option<f64>,

    #[serde(default)]
    pub affects: Affects,
}

impl Control {
    /// Fully covered, fully reliable frequency control
    pub fn new(id: &str, effectiveness: f64) -> Self {
        Self {
            id: id.to_string(),
            control_type: None,
            effectiveness,
            coverage: 1.0,
            reliability: 1.0,
            cost: None,
            affects: Affects::Frequency,
        }
    }

    pub fn with_coverage(mut self, coverage: f64) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn affecting(mut self, affects: Affects) -> Self {
        self.affects = affects;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlLayer {
    #[serde(default)]
    pub name: String,
    pub controls: Vec<Control>,
}

/// Overlap between the protections of two or more controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDependency {
    pub controls: Vec<String>,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlSet {
    #[serde(default)]
    pub layers: Vec<ControlLayer>,

    #[serde(default)]
    pub dependencies: Vec<ControlDependency>,
}

impl ControlSet {
    /// Single unnamed layer holding every control
    pub fn single_layer(controls: Vec<Control>) -> Self {
        Self {
            layers: vec![ControlLayer {
                name: "default".to_string(),
                controls,
            }],
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, controls: &[&str], correlation: f64) -> Self {
        self.dependencies.push(ControlDependency {
            controls: controls.iter().map(|c| c.to_string()).collect(),
            correlation,
        });
        self
    }

    /// All controls across layers, tagged with their layer name
    pub fn iter_controls(&self) -> impl Iterator<Item = (&str, &Control)> {
        self.layers
            .iter()
            .flat_map(|layer| layer.controls.iter().map(move |c| (layer.name.as_str(), c)))
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(|layer| layer.controls.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopulaFamily {
    #[default]
    Gaussian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopulaStructure {
    Toeplitz,
}

/// Gaussian copula over ordered `asset:<name>` targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopulaSpec {
    #[serde(rename = "type", default)]
    pub family: CopulaFamily,

    pub targets: Vec<String>,

    #[serde(default)]
    pub structure: Option<CopulaStructure>,

    #[serde(default)]
    pub rho: Option<f64>,

    #[serde(default)]
    pub matrix: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DependencySpec {
    #[serde(default)]
    pub copula: Option<CopulaSpec>,
}

/// Observed history used by the MCMC estimator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default)]
    pub annual_event_counts: Vec<u64>,

    #[serde(default)]
    pub loss_amounts: Vec<f64>,

    /// Currency of `loss_amounts`; base currency when absent
    #[serde(default)]
    pub currency: Option<String>,
}

impl Evidence {
    pub fn is_empty(&self) -> bool {
        self.annual_event_counts.is_empty() && self.loss_amounts.is_empty()
    }
}

/// One validated scenario, read-only input to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskModel {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub assets: Vec<Asset>,

    /// Model-level frequency; required unless `components` are given
    #[serde(default)]
    pub frequency: Option<FrequencySpec>,

    pub severity: SeveritySpec,

    /// Per-asset frequency/severity pairs
    #[serde(default)]
    pub components: Vec<AssetModel>,

    #[serde(default)]
    pub controls: Option<ControlSet>,

    #[serde(default)]
    pub dependency: Option<DependencySpec>,

    #[serde(default)]
    pub evidence: Option<Evidence>,
}

impl RiskModel {
    /// Single-component model with no controls
    pub fn new(name: &str, frequency: FrequencySpec, severity: SeveritySpec) -> Self {
        Self {
            name: name.to_string(),
            assets: Vec::new(),
            frequency: Some(frequency),
            severity,
            components: Vec::new(),
            controls: None,
            dependency: None,
            evidence: None,
        }
    }

    pub fn with_assets(mut self, assets: Vec<Asset>) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_controls(mut self, controls: ControlSet) -> Self {
        self.controls = Some(controls);
        self
    }

    pub fn with_components(mut self, components: Vec<AssetModel>) -> Self {
        self.components = components;
        self
    }

    pub fn with_copula(mut self, copula: CopulaSpec) -> Self {
        self.dependency = Some(DependencySpec { copula: Some(copula) });
        self
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    /// Total asset units across all groups (1 when no assets are declared)
    pub fn total_cardinality(&self) -> u64 {
        if self.assets.is_empty() {
            1
        } else {
            self.assets.iter().map(|a| a.cardinality).sum()
        }
    }

    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_model() {
        let json = r#"{
            "name": "ransomware",
            "assets": [{"name": "laptops", "cardinality": 250}],
            "frequency": {"model": "poisson", "basis": "per_asset", "parameters": {"lambda": 0.02}},
            "severity": {"model": "lognormal", "parameters": {"median": "100 000", "sigma": 1.2, "currency": "EUR"}}
        }"#;

        let model: RiskModel = serde_json::from_str(json).unwrap();
        let freq = model.frequency.as_ref().unwrap();
        assert_eq!(freq.model, FrequencyKind::Poisson);
        assert_eq!(freq.basis, Basis::PerAsset);
        assert_eq!(model.total_cardinality(), 250);
        assert_eq!(
            model.severity.parameters.get("median"),
            Some(&ParamValue::Text("100 000".to_string()))
        );
    }

    #[test]
    fn test_control_defaults() {
        let json = r#"{"id": "mfa", "type": "preventive", "effectiveness": 0.8}"#;
        let control: Control = serde_json::from_str(json).unwrap();
        assert_eq!(control.coverage, 1.0);
        assert_eq!(control.reliability, 1.0);
        assert_eq!(control.affects, Affects::Frequency);
        assert_eq!(control.control_type, Some(ControlType::Preventive));
    }

    #[test]
    fn test_control_set_iteration() {
        let set = ControlSet {
            layers: vec![
                ControlLayer { name: "perimeter".into(), controls: vec![Control::new("fw", 0.5)] },
                ControlLayer { name: "endpoint".into(), controls: vec![Control::new("edr", 0.7)] },
            ],
            dependencies: Vec::new(),
        };
        let ids: Vec<_> = set.iter_controls().map(|(layer, c)| (layer, c.id.as_str())).collect();
        assert_eq!(ids, vec![("perimeter", "fw"), ("endpoint", "edr")]);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_total_cardinality_defaults_to_one() {
        let model = RiskModel::new(
            "m",
            FrequencySpec::poisson(1.0),
            SeveritySpec::lognormal_median(1000.0, 1.0),
        );
        assert_eq!(model.total_cardinality(), 1);
    }
}
