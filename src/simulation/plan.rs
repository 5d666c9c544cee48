//! Resolved, validated simulation plan
//!
//! Every configuration error surfaces while the plan is built. Once built,
//! the plan is immutable and shared by all workers.

use log::{debug, info};
use rand::Rng;
use std::collections::HashSet;

use super::result::ControlSummary;
use crate::controls::{ControlEffect, ControlEffectivenessCalculator, ControlScaling, EffectiveFrequency};
use crate::currency::{currency_symbol, CurrencyNormalizer, FxTable};
use crate::error::{RiskEngineError, RiskResult, SimulationWarning};
use crate::model::{Basis, CopulaSpec, FrequencySpec, RiskModel};
use crate::parameters::ParameterResolver;
use crate::sampling::{build_copula, FrequencyModel, FrequencySampler, GaussianCopula, SeverityModel, SeveritySampler};

const ASSET_TARGET_PREFIX: &str = "asset:";

/// One frequency/severity pair with its exposure
#[derive(Debug, Clone)]
pub struct PlannedComponent {
    /// `"model"` or the asset name
    pub label: String,
    /// Asset this component is bound to, if any
    pub asset: Option<String>,
    pub frequency: FrequencySampler,
    pub severity: SeveritySampler,
    pub effective: EffectiveFrequency,
    /// Index into the copula uniforms when this component is a target
    pub copula_slot: Option<usize>,
}

/// Evidence and the model-level parameters it informs
#[derive(Debug, Clone)]
pub struct PosteriorInputs {
    pub annual_event_counts: Vec<u64>,
    /// Observed losses in base currency
    pub loss_amounts: Vec<f64>,
    pub frequency: Option<FrequencyModel>,
    pub severity: SeverityModel,
    pub exposure: f64,
}

/// How control reductions reach the samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlApplication {
    /// Expected reduction (reliability included) folded into the samplers
    #[default]
    Expected,
    /// Samplers keep baseline parameters; a `ControlScaling` per year is
    /// supplied by the caller
    PerYear,
}

/// Single sampled year
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearOutcome {
    pub events: u64,
    /// Output currency
    pub loss: f64,
}

#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub model_name: String,
    pub components: Vec<PlannedComponent>,
    pub copula: Option<GaussianCopula>,
    pub control_effect: ControlEffect,
    pub base_currency: String,
    pub output_currency: String,
    pub output_symbol: String,
    /// Base to output currency multiplier
    pub output_factor: f64,
    pub warnings: Vec<SimulationWarning>,
    pub posterior: Option<PosteriorInputs>,
}

impl SimulationPlan {
    /// Resolve parameters, controls, and dependencies for `model`
    pub fn build(model: &RiskModel, fx: &FxTable) -> RiskResult<Self> {
        Self::build_with(model, fx, ControlApplication::Expected)
    }

    pub fn build_with(model: &RiskModel, fx: &FxTable, application: ControlApplication) -> RiskResult<Self> {
        let currency = CurrencyNormalizer::from_table(fx)?;
        let mut resolver = ParameterResolver::new(&currency);
        validate_assets(model)?;

        let control_effect = match &model.controls {
            Some(set) => ControlEffectivenessCalculator::new().evaluate(set)?,
            None => ControlEffect::none(),
        };

        let model_severity = resolver.severity(&model.severity, "severity")?;

        let mut components = Vec::new();
        match (&model.frequency, model.components.is_empty()) {
            (Some(_), false) => {
                return Err(RiskEngineError::config(
                    "components",
                    "give either a model-level frequency or per-asset components, not both",
                ));
            }
            (None, true) => {
                return Err(RiskEngineError::config(
                    "frequency",
                    "a model-level frequency or at least one component is required",
                ));
            }
            (Some(frequency), true) => {
                components.push(plan_component(
                    "model".to_string(),
                    None,
                    frequency,
                    "frequency",
                    model_severity.clone(),
                    exposure(frequency, model.total_cardinality()),
                    &control_effect,
                    application,
                    &resolver,
                )?);
            }
            (None, false) => {
                for (i, component) in model.components.iter().enumerate() {
                    let path = format!("components[{}]", i);
                    let asset = model.asset(&component.asset).ok_or_else(|| {
                        RiskEngineError::config(
                            format!("{}.asset", path),
                            format!("unknown asset '{}'", component.asset),
                        )
                    })?;
                    let severity = match &component.severity {
                        Some(spec) => resolver.severity(spec, &format!("{}.severity", path))?,
                        None => model_severity.clone(),
                    };
                    components.push(plan_component(
                        component.asset.clone(),
                        Some(component.asset.clone()),
                        &component.frequency,
                        &format!("{}.frequency", path),
                        severity,
                        exposure(&component.frequency, asset.cardinality),
                        &control_effect,
                        application,
                        &resolver,
                    )?);
                }
            }
        }

        let copula = match model.dependency.as_ref().and_then(|d| d.copula.as_ref()) {
            Some(spec) => Some(plan_copula(spec, &mut components)?),
            None => None,
        };

        let posterior = match &model.evidence {
            Some(evidence) if !evidence.is_empty() => {
                let rate = currency.rate_to_base(evidence.currency.as_deref(), "evidence.currency")?;
                if let Some(bad) = evidence.loss_amounts.iter().find(|x| !x.is_finite() || **x <= 0.0) {
                    return Err(RiskEngineError::config(
                        "evidence.loss_amounts",
                        format!("losses must be > 0, got {}", bad),
                    ));
                }
                let frequency = match &model.frequency {
                    Some(spec) => Some(resolver.frequency(spec, "frequency")?),
                    None => None,
                };
                Some(PosteriorInputs {
                    annual_event_counts: evidence.annual_event_counts.clone(),
                    loss_amounts: evidence.loss_amounts.iter().map(|x| x * rate).collect(),
                    frequency,
                    severity: model_severity.clone(),
                    exposure: model
                        .frequency
                        .as_ref()
                        .map(|f| exposure(f, model.total_cardinality()))
                        .unwrap_or(1.0),
                })
            }
            _ => None,
        };

        let mut warnings = resolver.into_warnings();
        warnings.extend(control_effect.warnings.iter().cloned());

        let plan = Self {
            model_name: model.name.clone(),
            components,
            copula,
            control_effect,
            base_currency: currency.base_currency().to_string(),
            output_currency: currency.output_currency().to_string(),
            output_symbol: currency_symbol(currency.output_currency()),
            output_factor: currency.output_factor(),
            warnings,
            posterior,
        };

        info!(
            "Plan '{}': {} component(s), copula {}, {} control(s), expected {:.3} events/year",
            plan.model_name,
            plan.components.len(),
            if plan.copula.is_some() { "on" } else { "off" },
            plan.control_effect.details.len(),
            plan.expected_events()
        );
        Ok(plan)
    }

    /// Expected events per year across components after controls
    pub fn expected_events(&self) -> f64 {
        self.components.iter().map(|c| c.frequency.expected_events()).sum()
    }

    /// Closed-form EAL in output currency (valid because frequency and
    /// severity are independent within a component)
    pub fn expected_annual_loss(&self) -> f64 {
        self.components
            .iter()
            .map(|c| c.frequency.expected_events() * c.severity.expected_loss())
            .sum::<f64>()
            * self.output_factor
    }

    pub fn copula_dim(&self) -> usize {
        self.copula.as_ref().map(|c| c.dim()).unwrap_or(0)
    }

    /// Draw one year: copula uniforms, then counts, then severities
    ///
    /// `uniforms` must hold `copula_dim()` slots.
    pub fn simulate_year<R: Rng + ?Sized>(&self, rng: &mut R, uniforms: &mut [f64]) -> RiskResult<YearOutcome> {
        self.simulate_year_scaled(rng, uniforms, ControlScaling::NONE)
    }

    /// One year with the event rate and losses scaled by `scaling`
    pub fn simulate_year_scaled<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        uniforms: &mut [f64],
        scaling: ControlScaling,
    ) -> RiskResult<YearOutcome> {
        if let Some(copula) = &self.copula {
            copula.sample_uniforms(rng, uniforms);
        }

        let mut events = 0u64;
        let mut loss = 0.0;
        for component in &self.components {
            let count = match component.copula_slot {
                Some(slot) if self.copula.is_some() => {
                    component
                        .frequency
                        .sample_with_uniform_scaled(uniforms[slot], scaling.frequency, rng)?
                }
                _ => component.frequency.sample_scaled(scaling.frequency, rng)?,
            };
            for _ in 0..count {
                loss += component.severity.sample(rng)? * scaling.severity;
            }
            events += count;
        }

        Ok(YearOutcome {
            events,
            loss: loss * self.output_factor,
        })
    }

    /// Control breakdown, when the model declares any controls
    pub fn control_summary(&self) -> Option<ControlSummary> {
        if self.control_effect.details.is_empty() {
            return None;
        }
        let scaled = |f: &FrequencyModel, c: &PlannedComponent| f.mean_rate() * c.frequency.exposure();
        Some(ControlSummary {
            baseline_lambda: self.components.iter().map(|c| scaled(&c.effective.baseline, c)).sum(),
            effective_lambda: self.components.iter().map(|c| scaled(&c.effective.effective, c)).sum(),
            risk_reduction_pct: self.control_effect.frequency_reduction_pct(),
            severity_reduction_pct: self.control_effect.severity_reduction_pct(),
            controls: self.control_effect.details.clone(),
        })
    }
}

fn exposure(spec: &FrequencySpec, cardinality: u64) -> f64 {
    match spec.basis {
        Basis::PerOrganization => 1.0,
        Basis::PerAsset => cardinality as f64,
    }
}

fn validate_assets(model: &RiskModel) -> RiskResult<()> {
    let mut names = HashSet::new();
    for (i, asset) in model.assets.iter().enumerate() {
        if asset.name.trim().is_empty() {
            return Err(RiskEngineError::config(format!("assets[{}].name", i), "must not be empty"));
        }
        if !names.insert(asset.name.as_str()) {
            return Err(RiskEngineError::config(
                format!("assets[{}].name", i),
                format!("duplicate asset '{}'", asset.name),
            ));
        }
    }

    let mut seen = HashSet::new();
    for (i, component) in model.components.iter().enumerate() {
        if !seen.insert(component.asset.as_str()) {
            return Err(RiskEngineError::config(
                format!("components[{}].asset", i),
                format!("asset '{}' already has a component", component.asset),
            ));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn plan_component(
    label: String,
    asset: Option<String>,
    spec: &FrequencySpec,
    path: &str,
    severity: SeverityModel,
    exposure: f64,
    controls: &ControlEffect,
    application: ControlApplication,
    resolver: &ParameterResolver<'_>,
) -> RiskResult<PlannedComponent> {
    let baseline = resolver.frequency(spec, path)?;
    let effective = controls.apply_to_frequency(&baseline, path)?;
    let (sampled, severity_factor) = match application {
        ControlApplication::Expected => (effective.effective.clone(), controls.severity_survival),
        ControlApplication::PerYear => (effective.baseline.clone(), 1.0),
    };
    debug!(
        "Component '{}': {} rate {:.4} -> {:.4}, exposure {}",
        label,
        baseline.kind().label(),
        baseline.mean_rate(),
        effective.effective.mean_rate(),
        exposure
    );

    Ok(PlannedComponent {
        label,
        asset,
        frequency: FrequencySampler::new(sampled, exposure),
        severity: SeveritySampler::new(severity, severity_factor)?,
        effective,
        copula_slot: None,
    })
}

/// Validate targets, build the copula, and assign component slots
fn plan_copula(spec: &CopulaSpec, components: &mut [PlannedComponent]) -> RiskResult<GaussianCopula> {
    let mut seen = HashSet::new();
    let mut slots = Vec::with_capacity(spec.targets.len());

    for (i, target) in spec.targets.iter().enumerate() {
        let field = format!("dependency.copula.targets[{}]", i);
        let asset = target.strip_prefix(ASSET_TARGET_PREFIX).ok_or_else(|| {
            RiskEngineError::config(
                &field,
                format!("unsupported target '{}'; expected asset:<name>", target),
            )
        })?;
        if !seen.insert(asset) {
            return Err(RiskEngineError::config(&field, format!("duplicate target '{}'", target)));
        }
        let index = components
            .iter()
            .position(|c| c.asset.as_deref() == Some(asset))
            .ok_or_else(|| {
                RiskEngineError::config(
                    &field,
                    format!("target '{}' does not match a per-asset component", target),
                )
            })?;
        slots.push(index);
    }

    let copula = build_copula(spec, "dependency.copula")?;

    for (slot, index) in slots.into_iter().enumerate() {
        components[index].copula_slot = Some(slot);
    }
    Ok(copula)
}
