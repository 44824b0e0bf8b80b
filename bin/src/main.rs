//! candela CLI - streaming OHLC candle aggregation.

use anyhow::Result;
use candela_lib::{Granularity, LatePolicy};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use config::Settings;

#[derive(Parser)]
#[command(name = "candela")]
#[command(about = "Aggregate price ticks into 1m, 2m and 10m candles", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbosity level (-v, -vv). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// JSON settings file. Flags given on the command line override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate synthetic prices until interrupted
    Run {
        /// Tickers to generate (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        tickers: Option<Vec<String>>,

        /// Milliseconds between generated batches
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Scale of starting prices
        #[arg(long)]
        factor: Option<f64>,

        /// Seed for reproducible prices
        #[arg(long)]
        seed: Option<u64>,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Aggregate a recorded tick file (ticker,timestamp,value)
    Replay {
        /// Recorded tick CSV file
        file: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

/// Pipeline and output flags shared by every command.
#[derive(Args)]
struct PipelineArgs {
    /// Stage granularities in chain order (comma separated, e.g. 1m,2m,10m)
    #[arg(short, long, value_delimiter = ',')]
    granularities: Option<Vec<Granularity>>,

    /// Time unit granularities are multiples of, in milliseconds
    #[arg(long)]
    unit_ms: Option<u64>,

    /// Capacity of each queue between stages
    #[arg(long)]
    capacity: Option<usize>,

    /// Handling of ticks older than the current window (drop, merge)
    #[arg(long)]
    late_policy: Option<LatePolicy>,

    /// Output directory. Files are named candles_<granularity>.<format>
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format (csv, ndjson)
    #[arg(short, long)]
    format: Option<String>,

    /// Do not write a CSV header row
    #[arg(long)]
    no_header: bool,

    /// Milliseconds allowed for stages to drain on shutdown
    #[arg(long)]
    shutdown_timeout_ms: Option<u64>,

    /// Milliseconds a cancelled stage waits for its upstream to close
    #[arg(long)]
    drain_grace_ms: Option<u64>,
}

impl PipelineArgs {
    /// Overrides settings with the flags that were given.
    fn apply(self, settings: &mut Settings) {
        let pipeline = &mut settings.pipeline;
        if let Some(granularities) = self.granularities {
            pipeline.granularities = granularities;
        }
        if let Some(unit_ms) = self.unit_ms {
            pipeline.unit_ms = unit_ms;
        }
        if let Some(capacity) = self.capacity {
            pipeline.channel_capacity = capacity;
        }
        if let Some(late_policy) = self.late_policy {
            pipeline.late_policy = late_policy;
        }
        if let Some(timeout) = self.shutdown_timeout_ms {
            pipeline.shutdown_timeout_ms = timeout;
        }
        if let Some(grace) = self.drain_grace_ms {
            pipeline.drain_grace_ms = grace;
        }

        let output = &mut settings.output;
        if let Some(dir) = self.output_dir {
            output.dir = dir;
        }
        if let Some(format) = self.format {
            output.format = format;
        }
        if self.no_header {
            output.header = false;
        }
    }
}

/// Installs the log subscriber. `RUST_LOG` wins over the verbosity flags.
fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_target(verbose > 0))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Show help if no command provided
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    init_tracing(cli.verbose, cli.quiet);

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    match command {
        Commands::Run {
            tickers,
            delay_ms,
            factor,
            seed,
            duration_secs,
            pipeline,
        } => {
            pipeline.apply(&mut settings);
            let generator = &mut settings.generator;
            if let Some(tickers) = tickers {
                generator.tickers = tickers;
            }
            if let Some(delay_ms) = delay_ms {
                generator.delay_ms = delay_ms;
            }
            if let Some(factor) = factor {
                generator.factor = factor;
            }
            if seed.is_some() {
                generator.seed = seed;
            }

            commands::run::run(settings, duration_secs.map(Duration::from_secs)).await
        }
        Commands::Replay { file, pipeline } => {
            pipeline.apply(&mut settings);
            commands::replay::replay(settings, &file).await
        }
    }
}
