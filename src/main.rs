//! Cyber Risk Engine CLI
//!
//! Command-line interface for simulating risk models and portfolios

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cyber_risk_engine::currency::FxTable;
use cyber_risk_engine::metrics::{HistogramSpec, RiskMetrics};
use cyber_risk_engine::model::{load_fx_table, load_model, load_portfolio};
use cyber_risk_engine::simulation::{McmcConfig, SimulationConfig, SimulationEngine, SimulationResult};
use cyber_risk_engine::scenario::{PortfolioResult, PortfolioRunner};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "cyber-risk")]
#[command(about = "Monte Carlo cyber risk simulation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every run
#[derive(clap::Args)]
struct RunArgs {
    /// Number of simulated years
    #[arg(short, long, default_value = "10000")]
    runs: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// FX table (.json, or .csv with currency,rate columns)
    #[arg(long)]
    fx: Option<PathBuf>,

    /// Base currency for CSV FX tables
    #[arg(long, default_value = "USD")]
    base_currency: String,

    /// Currency of reported losses
    #[arg(long)]
    output_currency: Option<String>,

    /// Parallel RNG streams
    #[arg(long, default_value = "1")]
    chunks: usize,

    /// Histogram bins (0 disables the histogram)
    #[arg(long, default_value = "50")]
    bins: usize,

    /// Keep this many raw annual losses in the output
    #[arg(long)]
    raw_samples: Option<usize>,

    /// Abort after this many seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a single risk model
    Simulate {
        /// Model document (JSON)
        model: PathBuf,

        /// Estimate a posterior from the model's evidence
        #[arg(long)]
        mcmc: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Simulate every scenario of a portfolio and aggregate
    Portfolio {
        /// Portfolio document (JSON)
        portfolio: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate { model, mcmc, run } => cmd_simulate(&model, mcmc, &run),
        Commands::Portfolio { portfolio, run } => cmd_portfolio(&portfolio, &run),
    }
}

fn build_config(args: &RunArgs) -> Result<SimulationConfig> {
    let mut config = SimulationConfig::default().with_runs(args.runs).with_chunks(args.chunks);
    config.seed = args.seed;
    config.histogram = (args.bins > 0).then(|| HistogramSpec::FixedWidth { bins: args.bins });
    config.raw_sample_limit = args.raw_samples;
    if let Some(secs) = args.timeout {
        let timeout = std::time::Duration::try_from_secs_f64(secs).with_context(|| format!("invalid timeout {}", secs))?;
        config.timeout = Some(timeout);
    }
    Ok(config)
}

fn build_fx(args: &RunArgs) -> Result<FxTable> {
    match &args.fx {
        Some(path) => load_fx_table(path, &args.base_currency, args.output_currency.as_deref())
            .with_context(|| format!("loading FX table {}", path.display())),
        None => {
            let table = FxTable::single(&args.base_currency);
            Ok(match &args.output_currency {
                Some(output) => table.with_output_currency(output),
                None => table,
            })
        }
    }
}

fn cmd_simulate(path: &Path, mcmc: bool, args: &RunArgs) -> Result<()> {
    let model = load_model(path).with_context(|| format!("loading model {}", path.display()))?;
    let mut config = build_config(args)?;
    if mcmc {
        config.mcmc = Some(McmcConfig::default());
    }

    let engine = SimulationEngine::new(config, build_fx(args)?);
    let result = engine.simulate(&model)?;

    if args.json {
        println!("{}", result.to_json()?);
    } else {
        print_simulation(&result);
    }
    Ok(())
}

fn cmd_portfolio(path: &Path, args: &RunArgs) -> Result<()> {
    let portfolio = load_portfolio(path).with_context(|| format!("loading portfolio {}", path.display()))?;
    let runner = PortfolioRunner::new(build_config(args)?, build_fx(args)?);
    let result = runner.run(&portfolio)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_portfolio(&result);
    }
    Ok(())
}

fn print_metrics(metrics: &RiskMetrics, symbol: &str) {
    println!("  EAL:      {}{:>16.2}", symbol, metrics.eal);
    println!("  Median:   {}{:>16.2}", symbol, metrics.median);
    println!("  Std dev:  {}{:>16.2}", symbol, metrics.std_dev);
    println!("  Min/Max:  {}{:.2} / {}{:.2}", symbol, metrics.min, symbol, metrics.max);
    println!("  {:>8} {:>18} {:>18}", "Quantile", "VaR", "TVaR");
    for q in &metrics.var {
        println!("  {:>7}% {:>18.2} {:>18.2}", q.quantile, q.value, q.tail_mean);
    }
}

fn print_simulation(result: &SimulationResult) {
    let meta = &result.metadata;
    println!("Cyber Risk Engine v{}", meta.engine_version);
    println!("======================\n");
    println!("Model: {}", meta.model_name);
    println!("  Years: {}  Seed: {}  Chunks: {}", meta.runs, meta.seed, meta.chunks);
    println!("  Currency: {} (base {})", meta.currency_code, meta.base_currency);
    println!("  Events simulated: {}", meta.total_events);
    println!("  Runtime: {} ms", meta.runtime_ms);
    println!();

    print_metrics(&result.metrics, &meta.currency_symbol);

    if let Some(controls) = &result.controls {
        println!();
        println!("Controls:");
        println!("  Lambda: {:.4} -> {:.4}", controls.baseline_lambda, controls.effective_lambda);
        println!("  Frequency reduction: {:.2}%", controls.risk_reduction_pct);
        println!("  Severity reduction:  {:.2}%", controls.severity_reduction_pct);
        for c in &controls.controls {
            println!("    {:<20} {:<12} {:>8.2}%", c.id, c.layer, c.reduction * 100.0);
        }
    }

    if let Some(posterior) = &result.posterior {
        println!();
        println!(
            "Posterior ({} chains, acceptance {:.1}%):",
            posterior.chains,
            posterior.acceptance_rate * 100.0
        );
        for p in &posterior.parameters {
            println!(
                "  {:<8} mean {:>12.4}  90% [{:.4}, {:.4}]  R-hat {:.3}  ESS {:.0}",
                p.name, p.mean, p.q05, p.q95, p.r_hat, p.ess
            );
        }
    }

    for warning in &result.warnings {
        println!("Warning: {}", warning);
    }
}

fn print_portfolio(result: &PortfolioResult) {
    let meta = &result.metadata;
    println!("Portfolio: {} ({:?}, {:?} control states)", meta.name, meta.semantics, meta.control_state);
    println!("  Years: {}  Seed: {}  Currency: {}", meta.runs, meta.seed, meta.currency_code);
    println!();
    print_metrics(&result.metrics, "");
    println!();
    println!("{:<24} {:>12} {:>18} {:>18}", "Scenario", "Weight", "EAL", "VaR 99%");
    for s in &result.scenarios {
        println!(
            "{:<24} {:>12} {:>18.2} {:>18.2}",
            s.id,
            s.weight.map(|w| format!("{:.3}", w)).unwrap_or_else(|| "-".to_string()),
            s.metrics.eal,
            s.metrics.var_at(99.0).unwrap_or(f64::NAN)
        );
    }
    for warning in &result.warnings {
        println!("Warning: {}", warning);
    }
}
