//! Headless phase replay: runs phases in order for one trading date and prints a summary

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

use phase_pipeline::candles::{CandleSource, FileCandleSource, SyntheticCandleSource};
use phase_pipeline::config::OPT_PLANNING_LOOKBACK_DAYS;
use phase_pipeline::{build_controller, Phase, PhaseOptions, PhaseOutcome, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "run-phases")]
#[command(about = "Replay session phases for one trading date")]
struct Args {
    /// Trading date (YYYY-MM-DD)
    #[arg(short = 'D', long)]
    date: NaiveDate,

    /// Phases to run, in order (comma-separated)
    #[arg(short, long, value_delimiter = ',', default_value = "planning,preparing,trading")]
    phases: Vec<Phase>,

    /// Candle file or directory. Synthetic candles when omitted.
    #[arg(short, long, env = "CANDLE_DATA")]
    data: Option<PathBuf>,

    /// Trading days the planning window reaches back
    #[arg(long)]
    lookback_days: Option<u32>,

    /// Seconds to wait before re-opening a failed candle stream
    #[arg(long, default_value = "2")]
    retry_backoff_secs: u64,

    /// Print verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_level = if args.verbose { "phase_pipeline=debug" } else { "phase_pipeline=info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.parse()?))
        .init();

    if args.phases.is_empty() {
        bail!("No phases requested");
    }

    let config = PipelineConfig {
        retry_backoff: Duration::from_secs(args.retry_backoff_secs),
        ..PipelineConfig::default()
    };

    let source: Arc<dyn CandleSource> = match &args.data {
        Some(path) => Arc::new(FileCandleSource::new(path)),
        None => Arc::new(SyntheticCandleSource::default()),
    };
    let controller = build_controller(&config, source);

    let mut options = PhaseOptions::for_date(args.date);
    if let Some(days) = args.lookback_days {
        options = options.with(OPT_PLANNING_LOOKBACK_DAYS, days.to_string());
    }

    info!("Running {:?} for {}", args.phases, args.date);

    for &phase in &args.phases {
        let outcome = controller.start_phase(phase, options.clone()).await?;
        match outcome {
            PhaseOutcome::Completed {
                candles,
                events,
                retries,
                ..
            } => {
                println!(
                    "{:<10} candles: {:>6}  events: {:>6}  retries: {}",
                    phase, candles, events, retries
                );
            }
            PhaseOutcome::AlreadyComplete { .. } => {
                println!("{:<10} already complete", phase);
            }
        }
    }

    let state = controller.state_view().current();
    let closed: Vec<f64> = state.orders.iter().filter_map(|o| o.pnl_points()).collect();
    let wins = closed.iter().filter(|p| **p > 0.0).count();
    let total: f64 = closed.iter().sum();

    println!("\n═══════════════════════════════════════════════════════════");
    println!("              SESSION {}                              ", state.trading_date);
    println!("═══════════════════════════════════════════════════════════\n");
    println!("Candles:           {}", state.candles.len());
    println!("Swing Points:      {}", state.swing_points.len());
    println!("Plan Zones:        {}", state.plan_zones.len());
    println!("Daytime Extremes:  {}", state.daytime_extremes.len());
    println!("Orders:            {}", state.orders.len());
    if !closed.is_empty() {
        println!(
            "Wins:              {} ({:.1}%)",
            wins,
            wins as f64 / closed.len() as f64 * 100.0
        );
        println!("Total P&L:         {:+.2} pts", total);
    }
    println!("\n═══════════════════════════════════════════════════════════\n");

    Ok(())
}
