//! Risk metrics over simulated annual losses
//!
//! Percentiles use linear interpolation between order statistics at rank
//! `p / 100 × (n - 1)`.

use serde::{Deserialize, Serialize};

use crate::error::{RiskEngineError, RiskResult};

/// Quantiles reported when none are configured
pub const DEFAULT_QUANTILES: [f64; 5] = [50.0, 90.0, 95.0, 99.0, 99.9];

/// Value-at-risk at one quantile, with the mean of losses at or above it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileValue {
    pub quantile: f64,
    pub value: f64,
    /// Tail value-at-risk (expected shortfall)
    pub tail_mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Expected annual loss
    pub eal: f64,
    pub var: Vec<QuantileValue>,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// Population standard deviation
    pub std_dev: f64,
}

impl RiskMetrics {
    /// VaR at `quantile`, if it was requested
    pub fn var_at(&self, quantile: f64) -> Option<f64> {
        self.var
            .iter()
            .find(|q| (q.quantile - quantile).abs() < 1e-9)
            .map(|q| q.value)
    }

    pub fn tail_mean_at(&self, quantile: f64) -> Option<f64> {
        self.var
            .iter()
            .find(|q| (q.quantile - quantile).abs() < 1e-9)
            .map(|q| q.tail_mean)
    }
}

/// How to bin the annual-loss histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistogramSpec {
    /// Equal-width bins over `[0, max]`
    FixedWidth { bins: usize },
    /// Caller-supplied strictly increasing edges
    Edges(Vec<f64>),
}

impl Default for HistogramSpec {
    fn default() -> Self {
        HistogramSpec::FixedWidth { bins: 50 }
    }
}

impl HistogramSpec {
    pub fn validate(&self) -> RiskResult<()> {
        match self {
            HistogramSpec::FixedWidth { bins } => {
                if *bins == 0 {
                    return Err(RiskEngineError::config("histogram.bins", "must be at least 1"));
                }
            }
            HistogramSpec::Edges(edges) => {
                if edges.len() < 2 {
                    return Err(RiskEngineError::config("histogram.edges", "need at least two edges"));
                }
                if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(RiskEngineError::config(
                        "histogram.edges",
                        "edges must be finite and strictly increasing",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub bins: Vec<HistogramBin>,
    /// Samples outside caller-supplied edges
    pub out_of_range: u64,
}

/// Optional distribution output
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DistributionArtifact {
    pub histogram: Option<Histogram>,
    /// First `raw_sample_limit` annual losses in simulation order
    pub raw_samples: Option<Vec<f64>>,
}

/// Linear-interpolated percentile of already sorted data
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Computes summary metrics from annual losses
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    quantiles: Vec<f64>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self {
            quantiles: DEFAULT_QUANTILES.to_vec(),
        }
    }
}

impl MetricsAggregator {
    pub fn new(quantiles: &[f64]) -> RiskResult<Self> {
        for q in quantiles {
            if !q.is_finite() || !(0.0..=100.0).contains(q) {
                return Err(RiskEngineError::config(
                    "quantiles",
                    format!("quantile {} is outside [0, 100]", q),
                ));
            }
        }
        Ok(Self {
            quantiles: quantiles.to_vec(),
        })
    }

    pub fn quantiles(&self) -> &[f64] {
        &self.quantiles
    }

    /// EAL, VaR/TVaR at each quantile, min, max, median, population sd
    pub fn aggregate(&self, losses: &[f64]) -> RiskResult<RiskMetrics> {
        if losses.is_empty() {
            return Err(RiskEngineError::Domain("no annual losses to aggregate".into()));
        }

        let mut sorted = losses.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len() as f64;

        let eal = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|x| (x - eal).powi(2)).sum::<f64>() / n;

        let var = self
            .quantiles
            .iter()
            .map(|&quantile| {
                let value = percentile_sorted(&sorted, quantile);
                let start = sorted.partition_point(|x| *x < value);
                let tail = &sorted[start..];
                let tail_mean = if tail.is_empty() {
                    value
                } else {
                    tail.iter().sum::<f64>() / tail.len() as f64
                };
                QuantileValue {
                    quantile,
                    value,
                    tail_mean,
                }
            })
            .collect();

        Ok(RiskMetrics {
            eal,
            var,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            median: percentile_sorted(&sorted, 50.0),
            std_dev: variance.sqrt(),
        })
    }

    /// Bin `losses` per `spec`
    pub fn histogram(&self, losses: &[f64], spec: &HistogramSpec) -> RiskResult<Histogram> {
        spec.validate()?;
        match spec {
            HistogramSpec::FixedWidth { bins } => Ok(fixed_width_histogram(losses, *bins)),
            HistogramSpec::Edges(edges) => Ok(edge_histogram(losses, edges)),
        }
    }
}

fn fixed_width_histogram(losses: &[f64], num_bins: usize) -> Histogram {
    let max = losses.iter().cloned().fold(0.0, f64::max);
    if max <= 0.0 {
        return Histogram {
            bins: vec![HistogramBin {
                lower: 0.0,
                upper: 0.0,
                count: losses.len() as u64,
            }],
            out_of_range: 0,
        };
    }

    let width = max / num_bins as f64;
    let mut bins: Vec<HistogramBin> = (0..num_bins)
        .map(|i| HistogramBin {
            lower: i as f64 * width,
            upper: if i == num_bins - 1 { max } else { (i + 1) as f64 * width },
            count: 0,
        })
        .collect();

    for &loss in losses {
        let idx = ((loss / width).floor() as usize).min(num_bins - 1);
        bins[idx].count += 1;
    }

    Histogram { bins, out_of_range: 0 }
}

fn edge_histogram(losses: &[f64], edges: &[f64]) -> Histogram {
    let mut bins: Vec<HistogramBin> = edges
        .windows(2)
        .map(|w| HistogramBin {
            lower: w[0],
            upper: w[1],
            count: 0,
        })
        .collect();
    let first = edges[0];
    let last = edges[edges.len() - 1];
    let mut out_of_range = 0;

    for &loss in losses {
        if loss < first || loss > last {
            out_of_range += 1;
            continue;
        }
        // last bin is closed on the right
        let idx = (edges.partition_point(|e| *e <= loss) - 1).min(bins.len() - 1);
        bins[idx].count += 1;
    }

    Histogram { bins, out_of_range }
}
