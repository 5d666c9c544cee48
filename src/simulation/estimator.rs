//! Estimators composed by the simulation engine

use log::debug;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;

use super::cancel::CancellationToken;
use super::plan::SimulationPlan;
use super::result::SimulationRun;
use crate::controls::ControlScaling;
use crate::error::{RiskEngineError, RiskResult};

/// Something that turns a resolved plan and a seed into an output
pub trait Estimator {
    type Output;

    fn name(&self) -> &'static str;

    fn estimate(&self, plan: &SimulationPlan, seed: u64, cancel: &CancellationToken) -> RiskResult<Self::Output>;
}

/// Sizes of `chunks` contiguous blocks covering `runs` years
///
/// The first `runs % chunks` blocks carry one extra year.
pub fn chunk_sizes(runs: usize, chunks: usize) -> Vec<usize> {
    let chunks = chunks.clamp(1, runs.max(1));
    let base = runs / chunks;
    let extra = runs % chunks;
    (0..chunks).map(|i| base + usize::from(i < extra)).collect()
}

/// Contiguous year ranges matching `chunk_sizes`
fn chunk_ranges(runs: usize, chunks: usize) -> Vec<std::ops::Range<usize>> {
    let mut start = 0;
    chunk_sizes(runs, chunks)
        .into_iter()
        .map(|size| {
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// Years simulated by one chunk, possibly cut short by cancellation
struct ChunkOutput {
    losses: Vec<f64>,
    events: Vec<u64>,
    cancelled: bool,
}

/// Forward Monte Carlo over simulated years
///
/// Chunk `k` draws from ChaCha20 stream `k` of the master seed, so results
/// depend only on the seed and the chunk count, never on thread scheduling.
#[derive(Debug, Clone)]
pub struct MonteCarloEstimator {
    runs: usize,
    chunks: usize,
    /// Per-year control scaling, one entry per simulated year
    scaling: Option<Vec<ControlScaling>>,
}

impl MonteCarloEstimator {
    pub fn new(runs: usize, chunks: usize) -> Self {
        Self {
            runs,
            chunks,
            scaling: None,
        }
    }

    pub fn with_scaling(mut self, scaling: Vec<ControlScaling>) -> Self {
        self.scaling = Some(scaling);
        self
    }

    fn year_scaling(&self, year: usize) -> ControlScaling {
        self.scaling
            .as_ref()
            .and_then(|s| s.get(year).copied())
            .unwrap_or(ControlScaling::NONE)
    }

    fn run_chunk(
        &self,
        plan: &SimulationPlan,
        seed: u64,
        stream: u64,
        range: std::ops::Range<usize>,
        cancel: &CancellationToken,
    ) -> RiskResult<ChunkOutput> {
        let years = range.len();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        let mut uniforms = vec![0.0; plan.copula_dim()];
        let mut output = ChunkOutput {
            losses: Vec::with_capacity(years),
            events: Vec::with_capacity(years),
            cancelled: false,
        };

        for year in range {
            if cancel.is_cancelled() {
                debug!("Chunk {} cancelled after {} years", stream, output.losses.len());
                output.cancelled = true;
                return Ok(output);
            }
            let outcome = plan.simulate_year_scaled(&mut rng, &mut uniforms, self.year_scaling(year))?;
            output.losses.push(outcome.loss);
            output.events.push(outcome.events);
        }

        debug!("Chunk {} finished {} years", stream, years);
        Ok(output)
    }
}

impl Estimator for MonteCarloEstimator {
    type Output = SimulationRun;

    fn name(&self) -> &'static str {
        "monte_carlo"
    }

    fn estimate(&self, plan: &SimulationPlan, seed: u64, cancel: &CancellationToken) -> RiskResult<SimulationRun> {
        if self.runs == 0 {
            return Err(RiskEngineError::config("runs", "must be at least 1"));
        }
        if let Some(scaling) = &self.scaling {
            if scaling.len() != self.runs {
                return Err(RiskEngineError::Domain(format!(
                    "{} control scalings for {} years",
                    scaling.len(),
                    self.runs
                )));
            }
        }
        let ranges = chunk_ranges(self.runs, self.chunks);

        let parts: Vec<ChunkOutput> = if ranges.len() == 1 {
            vec![self.run_chunk(plan, seed, 0, 0..self.runs, cancel)?]
        } else {
            ranges
                .par_iter()
                .enumerate()
                .map(|(k, range)| self.run_chunk(plan, seed, k as u64, range.clone(), cancel))
                .collect::<RiskResult<Vec<_>>>()?
        };

        self.assemble(seed, parts)
    }
}

impl MonteCarloEstimator {
    /// Concatenate chunk outputs in stream order
    ///
    /// A cancelled run reports the years completed across every chunk.
    fn assemble(&self, seed: u64, parts: Vec<ChunkOutput>) -> RiskResult<SimulationRun> {
        if parts.iter().any(|p| p.cancelled) {
            return Err(RiskEngineError::Cancelled {
                completed: parts.iter().map(|p| p.losses.len()).sum(),
                requested: self.runs,
            });
        }

        let chunks = parts.len();
        let mut annual_losses = Vec::with_capacity(self.runs);
        let mut event_counts = Vec::with_capacity(self.runs);
        for part in parts {
            annual_losses.extend(part.losses);
            event_counts.extend(part.events);
        }

        Ok(SimulationRun {
            seed,
            chunks,
            annual_losses,
            event_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::FxTable;
    use crate::model::{FrequencySpec, RiskModel, SeveritySpec};

    fn plan() -> SimulationPlan {
        let model = RiskModel::new("m", FrequencySpec::poisson(0.8), SeveritySpec::lognormal_median(25_000.0, 1.1));
        SimulationPlan::build(&model, &FxTable::default()).unwrap()
    }

    #[test]
    fn test_chunk_sizes() {
        assert_eq!(chunk_sizes(10, 3), vec![4, 3, 3]);
        assert_eq!(chunk_sizes(2, 8), vec![1, 1]);
        assert_eq!(chunk_sizes(5, 1), vec![5]);
        assert_eq!(chunk_sizes(5, 0), vec![5]);
    }

    #[test]
    fn test_same_seed_same_losses() {
        let plan = plan();
        let token = CancellationToken::new();
        let a = MonteCarloEstimator::new(2_000, 1).estimate(&plan, 42, &token).unwrap();
        let b = MonteCarloEstimator::new(2_000, 1).estimate(&plan, 42, &token).unwrap();
        assert_eq!(a.annual_losses, b.annual_losses);
        let c = MonteCarloEstimator::new(2_000, 1).estimate(&plan, 43, &token).unwrap();
        assert_ne!(a.annual_losses, c.annual_losses);
    }

    #[test]
    fn test_chunked_runs_reproducible() {
        let plan = plan();
        let token = CancellationToken::new();
        let a = MonteCarloEstimator::new(3_001, 4).estimate(&plan, 7, &token).unwrap();
        let b = MonteCarloEstimator::new(3_001, 4).estimate(&plan, 7, &token).unwrap();
        assert_eq!(a.annual_losses.len(), 3_001);
        assert_eq!(a.annual_losses, b.annual_losses);
        assert_eq!(a.chunks, 4);
    }

    #[test]
    fn test_chunk_ranges_cover_runs() {
        assert_eq!(chunk_ranges(10, 3), vec![0..4, 4..7, 7..10]);
    }

    #[test]
    fn test_scaling_follows_year_across_chunks() {
        let plan = plan();
        let token = CancellationToken::new();
        // Even years blocked, odd years untouched
        let scaling: Vec<ControlScaling> = (0..1_001)
            .map(|y| ControlScaling {
                frequency: if y % 2 == 0 { 0.0 } else { 1.0 },
                severity: 1.0,
            })
            .collect();
        let run = MonteCarloEstimator::new(1_001, 3)
            .with_scaling(scaling)
            .estimate(&plan, 5, &token)
            .unwrap();
        assert!(run.event_counts.iter().step_by(2).all(|&n| n == 0));
        assert!(run.event_counts.iter().skip(1).step_by(2).any(|&n| n > 0));

        let short = MonteCarloEstimator::new(10, 1).with_scaling(vec![ControlScaling::NONE; 3]);
        assert!(short.estimate(&plan, 5, &token).is_err());
    }

    #[test]
    fn test_cancelled_before_first_year() {
        let token = CancellationToken::new();
        token.cancel();
        let err = MonteCarloEstimator::new(100, 1).estimate(&plan(), 1, &token).unwrap_err();
        assert!(matches!(err, RiskEngineError::Cancelled { completed: 0, requested: 100 }));
    }

    #[test]
    fn test_cancelled_count_spans_chunks() {
        let plan = plan();
        let token = CancellationToken::new();
        let estimator = MonteCarloEstimator::new(400, 4);
        let mut outputs = Vec::new();
        for (k, range) in chunk_ranges(400, 4).into_iter().enumerate() {
            if k == 2 {
                token.cancel();
            }
            outputs.push(estimator.run_chunk(&plan, 3, k as u64, range, &token).unwrap());
        }
        assert!(!outputs[0].cancelled && !outputs[1].cancelled);
        assert!(outputs[2].cancelled && outputs[3].cancelled);
        let err = estimator.assemble(3, outputs).unwrap_err();
        assert!(matches!(err, RiskEngineError::Cancelled { completed: 200, requested: 400 }));
    }
}
