//! cryptolab CLI: run units and jobs of the crypto market-data pipeline.
//!
//! Commands:
//! - `unit`: run one unit of work with explicit inputs
//! - `job`: run a named job of the unit graph in dependency order
//! - `graph`: print the unit graph and its jobs
//! - `status`: table row counts and the latest run log entries
//! - `check-trigger`: evaluate the price-movement trigger on stored snapshots
//! - `init-config`: write the default configuration file

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use cryptolab_core::domain::{DateRange, YearMonth};
use cryptolab_core::storage::Storage;
use cryptolab_runner::{
    JobReport, NodeRun, Pipeline, PipelineConfig, PipelineGraph, RunLog, UnitInput, UnitKind,
    UnitResult, UnitStatus,
};

#[derive(Parser)]
#[command(
    name = "cryptolab",
    about = "cryptolab CLI: crypto market-data ETL pipeline"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `storage.database_path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Override the output directory (charts, staging and run log go under it).
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single unit of work.
    Unit {
        /// extract-metadata, extract-market, extract-history, store, analyze, render, monthly-report.
        unit: String,

        #[command(flatten)]
        inputs: InputArgs,

        /// Staged payload key (required by `store`).
        #[arg(long)]
        payload_key: Option<String>,
    },
    /// Run a named job: metadata, market, history, analytics, monthly-report, all.
    Job {
        job: String,

        #[command(flatten)]
        inputs: InputArgs,
    },
    /// Print the unit graph and its jobs.
    Graph,
    /// Show table row counts and the most recent unit results.
    Status {
        /// Number of run log entries to show.
        #[arg(long, default_value_t = 10)]
        last: usize,
    },
    /// Evaluate the price-movement trigger against the two latest snapshots.
    CheckTrigger {
        /// Assets to check. Defaults to the tracked assets.
        #[arg(long, value_delimiter = ',')]
        assets: Vec<String>,

        /// Override `trigger.threshold_pct`.
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Write the default configuration to a file.
    InitConfig {
        #[arg(default_value = "cryptolab.toml")]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Run date (YYYY-MM-DD). Defaults to today (UTC).
    #[arg(long)]
    as_of: Option<String>,

    /// Range start (YYYY-MM-DD). Defaults to the configured history window.
    #[arg(long, requires = "end")]
    start: Option<String>,

    /// Range end (YYYY-MM-DD).
    #[arg(long, requires = "start")]
    end: Option<String>,

    /// Asset ids, comma separated. Defaults to the tracked assets.
    #[arg(long, value_delimiter = ',')]
    assets: Vec<String>,

    /// Report month (YYYY-MM). Defaults to the month of the run date.
    #[arg(long)]
    month: Option<String>,
}

impl InputArgs {
    fn to_input(&self) -> Result<UnitInput> {
        let range = match (&self.start, &self.end) {
            (Some(s), Some(e)) => Some(DateRange::new(parse_date(s)?, parse_date(e)?)?),
            _ => None,
        };
        let month = self
            .month
            .as_deref()
            .map(str::parse::<YearMonth>)
            .transpose()?;
        Ok(UnitInput {
            as_of: self.as_of.as_deref().map(parse_date).transpose()?,
            range,
            asset_ids: self.assets.clone(),
            month,
            payload_key: None,
        })
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.db, cli.out)?;

    match cli.command {
        Commands::Unit {
            unit,
            inputs,
            payload_key,
        } => run_unit_cmd(config, &unit, &inputs, payload_key),
        Commands::Job { job, inputs } => run_job_cmd(config, &job, &inputs),
        Commands::Graph => {
            print!("{}", PipelineGraph::standard()?.describe());
            Ok(())
        }
        Commands::Status { last } => run_status(&config, last),
        Commands::CheckTrigger { assets, threshold } => run_check_trigger(config, assets, threshold),
        Commands::InitConfig { path, force } => run_init_config(&path, force),
    }
}

fn load_config(path: Option<&Path>, db: Option<PathBuf>, out: Option<PathBuf>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(db) = db {
        config.storage.database_path = db;
    }
    if let Some(out) = out {
        config.output.chart_dir = out.join("charts");
        config.output.staging_dir = out.join("staging");
        config.output.run_log = out.join("runs.jsonl");
    }
    config.validate()?;
    Ok(config)
}

fn run_unit_cmd(
    config: PipelineConfig,
    unit: &str,
    inputs: &InputArgs,
    payload_key: Option<String>,
) -> Result<()> {
    let kind: UnitKind = unit.parse()?;
    let mut input = inputs.to_input()?;
    input.payload_key = payload_key;

    let pipeline = Pipeline::open(config)?;
    let result = pipeline.run_unit(kind, &input);
    print_result(&result);
    if result.is_failure() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_job_cmd(config: PipelineConfig, job: &str, inputs: &InputArgs) -> Result<()> {
    let input = inputs.to_input()?;
    let pipeline = Pipeline::open(config)?;
    let report = pipeline.run_job(job, &input)?;
    print_report(&report);
    if report.status() == UnitStatus::Failure {
        std::process::exit(1);
    }
    Ok(())
}

fn run_status(config: &PipelineConfig, last: usize) -> Result<()> {
    let db = &config.storage.database_path;
    if !db.exists() {
        println!("Database does not exist yet: {}", db.display());
    } else {
        let storage = Storage::open(db)?;
        let counts = storage.table_counts()?;
        println!("Database: {}", storage.location());
        println!("  crypto_metadata       {:>8}", counts.assets);
        println!("  crypto_market_data    {:>8}", counts.market_snapshots);
        println!("  crypto_price_history  {:>8}", counts.price_points);
        println!("  crypto_trend_summary  {:>8}", counts.trend_summaries);
        println!("  migrations: {}", storage.applied_migrations()?.join(", "));
    }

    let log = RunLog::new(&config.output.run_log);
    let recent = log.tail(last)?;
    if recent.is_empty() {
        println!("No runs logged in {}", log.path().display());
        return Ok(());
    }
    println!();
    println!("Last {} unit result(s):", recent.len());
    for r in &recent {
        println!(
            "  {}  {:<17} {:<18} {:<8} rows={}{}",
            r.started_at.format("%Y-%m-%d %H:%M:%S"),
            r.unit,
            r.node.as_deref().unwrap_or("-"),
            r.status,
            r.rows,
            r.error
                .as_ref()
                .map(|e| format!("  [{}] {}", e.class, e.message))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn run_check_trigger(
    mut config: PipelineConfig,
    assets: Vec<String>,
    threshold: Option<f64>,
) -> Result<()> {
    if let Some(t) = threshold {
        if !(t.is_finite() && t >= 0.0) {
            bail!("--threshold must be a non-negative number");
        }
        config.trigger.threshold_pct = t;
    }
    let assets = if assets.is_empty() {
        config.assets.tracked.clone()
    } else {
        assets
    };

    let storage = Storage::open(&config.storage.database_path)?;
    let decisions = config.trigger.evaluate(&storage, &assets)?;
    let mut fired = 0;
    for d in &decisions {
        let change = d
            .change_pct
            .map(|c| format!("{c:+.2}%"))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "{:<16} {:>9}  {}",
            d.asset_id,
            change,
            if d.fired { "TRIGGER" } else { "-" }
        );
        if d.fired {
            fired += 1;
        }
    }
    println!(
        "{fired}/{} asset(s) moved at least {:.2}%",
        decisions.len(),
        config.trigger.threshold_pct
    );
    Ok(())
}

fn run_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let text = PipelineConfig::default().to_toml()?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn print_result(r: &UnitResult) {
    println!("{}: {} ({} rows, {} ms)", r.unit, r.status, r.rows, r.duration_ms);
    for w in &r.warnings {
        println!("  warning: {w}");
    }
    if let Some(e) = &r.error {
        println!("  error [{}]: {}", e.class, e.message);
    }
    for o in &r.outputs {
        println!("  -> {o}");
    }
}

fn print_report(report: &JobReport) {
    println!("Job {} (as of {}): {}", report.job, report.as_of, report.status());
    for run in &report.runs {
        match run {
            NodeRun::Ran(r) => {
                print!("  {:<18} ", run.node());
                print_result(r);
            }
            NodeRun::Skipped { node, missing, .. } => {
                println!("  {node:<18} skipped: missing {}", missing.join(", "));
            }
        }
    }
    println!("Total rows: {}", report.rows());
}
