//! Random draws for the simulation loop
//!
//! Samplers are immutable once built and take the RNG by `&mut`, so one plan
//! can be shared across rayon workers that each own a stream.

pub mod copula;
pub mod frequency;
pub mod severity;

pub use copula::{build_copula, cholesky, toeplitz_matrix, GaussianCopula};
pub use frequency::{gamma_quantile, poisson_quantile, FrequencyModel, FrequencySampler, GammaPrior};
pub use severity::{MixtureComponent, SeverityDistribution, SeverityModel, SeveritySampler};
