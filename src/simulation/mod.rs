//! Simulation orchestration: plans, estimators, results

mod cancel;
mod config;
mod engine;
mod estimator;
mod mcmc;
mod plan;
mod result;

pub use cancel::CancellationToken;
pub use config::{McmcConfig, SimulationConfig};
pub use engine::{SimulationEngine, ENGINE_VERSION};
pub use estimator::{chunk_sizes, Estimator, MonteCarloEstimator};
pub use mcmc::{
    autocorrelation,
    effective_sample_size,
    split_r_hat,
    McmcEstimator,
    PosteriorParameter,
    PosteriorSummary,
};
pub use plan::{ControlApplication, PlannedComponent, PosteriorInputs, SimulationPlan, YearOutcome};
pub use result::{ControlSummary, RunMetadata, SimulationResult, SimulationRun};
