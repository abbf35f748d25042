//! Command-line front end: run backtests and query their results.
//!
//! Commands:
//! - `run`: execute one backtest and print its report
//! - `factors` / `strategies`: list what is registered
//! - `runs`, `signals`, `prices`, `compare`: read-only queries over stored runs
//! - `providers`: health-check every configured provider and print its status
//!
//! Every command prints JSON on stdout; logs go to stderr.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use factorlab_core::factors::FactorRegistry;
use factorlab_runner::{
    AppConfig, BacktestOrchestrator, BacktestRequest, RunFilter, RunStatus, RunStore, StrategyRegistry,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "factorlab", about = "Factor-driven backtest orchestration")]
struct Cli {
    /// Path to the TOML config file. A missing file means defaults.
    #[arg(long, global = true, default_value = "factorlab.toml")]
    config: PathBuf,

    /// Log filter (e.g. `info`, `factorlab_runner=debug`). Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest and print the run report.
    Run {
        /// Registered strategy class name.
        #[arg(long, default_value = "DualMovingAverageStrategy")]
        strategy: String,

        #[arg(long)]
        symbol: String,

        /// Start date (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date)]
        start: NaiveDate,

        /// End date (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date)]
        end: NaiveDate,

        /// Starting capital; defaults to `[backtest] initial_capital`.
        #[arg(long)]
        capital: Option<f64>,

        /// Skip the cache and fetch from providers.
        #[arg(long, default_value_t = false)]
        no_cache: bool,
    },
    /// List factor definitions.
    Factors,
    /// List strategies and the data groups they declare.
    Strategies,
    /// List stored runs, newest first.
    Runs {
        #[arg(long)]
        strategy: Option<String>,

        #[arg(long)]
        symbol: Option<String>,

        /// running, completed or failed.
        #[arg(long, value_parser = parse_status)]
        status: Option<RunStatus>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Signals recorded by one run.
    Signals { run_id: String },
    /// Price series (bars plus factor fields) a run was driven with.
    Prices { run_id: String },
    /// Compare 2 to 10 runs.
    Compare {
        #[arg(required = true, num_args = 2..=10)]
        run_ids: Vec<String>,
    },
    /// Health-check providers and print their status.
    Providers,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("invalid date '{s}': {e}"))
}

fn parse_status(s: &str) -> Result<RunStatus, String> {
    s.parse()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = AppConfig::load(Some(&cli.config))
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            strategy,
            symbol,
            start,
            end,
            capital,
            no_cache,
        } => {
            let orchestrator = BacktestOrchestrator::from_config(&config)?;
            let mut req = BacktestRequest::new(&strategy, &symbol, start, end);
            req.initial_capital = capital;
            req.use_cache = !no_cache;

            info!(%strategy, %symbol, %start, %end, "starting backtest");
            let report = orchestrator.run(&req).await?;
            print_json(&report)?;
            if let Some(error) = &report.error {
                bail!("run {} failed: {error}", report.run.id);
            }
            Ok(())
        }
        Commands::Factors => print_json(&FactorRegistry::with_builtin().list_factor_definitions()),
        Commands::Strategies => print_json(&StrategyRegistry::with_builtin().definitions()),
        Commands::Runs {
            strategy,
            symbol,
            status,
            limit,
            offset,
        } => {
            let store = RunStore::open(&config.store.path)?;
            let filter = RunFilter {
                strategy,
                symbol,
                status,
            };
            print_json(&store.list_runs(&filter, limit, offset)?)
        }
        Commands::Signals { run_id } => {
            let store = RunStore::open(&config.store.path)?;
            if store.get_run(&run_id)?.is_none() {
                bail!("run not found: {run_id}");
            }
            print_json(&store.list_signals(&run_id)?)
        }
        Commands::Prices { run_id } => {
            let store = RunStore::open(&config.store.path)?;
            if store.get_run(&run_id)?.is_none() {
                bail!("run not found: {run_id}");
            }
            print_json(&store.price_series(&run_id)?)
        }
        Commands::Compare { run_ids } => {
            let store = RunStore::open(&config.store.path)?;
            print_json(&store.compare_runs(&run_ids)?)
        }
        Commands::Providers => {
            let registry = config.provider_registry();
            let health = registry.health_check_all().await;
            for (name, healthy) in &health {
                info!(provider = %name, healthy, "health check");
            }
            print_json(&registry.status())
        }
    }
}
