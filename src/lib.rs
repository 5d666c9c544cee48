//! Cyber Risk Engine - Monte Carlo loss simulation for declarative cyber risk models
//!
//! This library provides:
//! - Parameter resolution with currency normalization and lognormal calibration
//! - Poisson, Gamma-Poisson, and hierarchical frequency sampling
//! - Lognormal, gamma, and mixture severity sampling
//! - Layered security controls with correlated dependency groups
//! - Gaussian copula dependence between asset frequencies
//! - Risk metrics (EAL, VaR, TVaR) and loss histograms
//! - Optional MCMC posterior estimation from observed evidence
//! - Portfolio aggregation across scenarios, with optional per-year control states

pub mod controls;
pub mod currency;
pub mod error;
pub mod metrics;
pub mod model;
pub mod parameters;
pub mod sampling;
pub mod scenario;
pub mod simulation;

// Re-export commonly used types
pub use currency::{CurrencyNormalizer, FxTable, RateProvider};
pub use error::{RiskEngineError, RiskResult, SimulationWarning};
pub use metrics::{MetricsAggregator, RiskMetrics};
pub use model::RiskModel;
pub use scenario::{ControlStateMode, Portfolio, PortfolioRunner};
pub use simulation::{SimulationConfig, SimulationEngine, SimulationResult};
