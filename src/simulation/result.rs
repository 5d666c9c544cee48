//! Simulation outputs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mcmc::PosteriorSummary;
use crate::controls::ControlDetail;
use crate::error::SimulationWarning;
use crate::metrics::{DistributionArtifact, RiskMetrics};

/// Raw per-year output of the Monte Carlo estimator
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRun {
    pub seed: u64,
    pub chunks: usize,
    /// Annual losses in output currency, in stream order
    pub annual_losses: Vec<f64>,
    pub event_counts: Vec<u64>,
}

impl SimulationRun {
    pub fn runs(&self) -> usize {
        self.annual_losses.len()
    }

    pub fn total_events(&self) -> u64 {
        self.event_counts.iter().sum()
    }
}

/// Baseline vs. control-adjusted frequency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSummary {
    /// Expected events per year before controls
    pub baseline_lambda: f64,
    /// Expected events per year after controls
    pub effective_lambda: f64,
    pub risk_reduction_pct: f64,
    pub severity_reduction_pct: f64,
    pub controls: Vec<ControlDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub model_name: String,
    pub runs: usize,
    pub seed: u64,
    pub chunks: usize,
    pub runtime_ms: u128,
    pub completed_at: DateTime<Utc>,
    pub engine_version: String,
    pub base_currency: String,
    pub currency_code: String,
    pub currency_symbol: String,
    pub total_events: u64,
}

/// Everything reported for one model run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub metrics: RiskMetrics,
    pub controls: Option<ControlSummary>,
    pub distribution: Option<DistributionArtifact>,
    pub posterior: Option<PosteriorSummary>,
    pub warnings: Vec<SimulationWarning>,
    pub metadata: RunMetadata,
}

impl SimulationResult {
    /// Expected annual loss
    pub fn eal(&self) -> f64 {
        self.metrics.eal
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
