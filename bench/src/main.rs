//! Command-line runner for the geospatial store benchmark.
//!
//! Usage:
//!   geobench random -n 10000            # synthetic run
//!   geobench generate ./data -n 500000  # write a reusable dataset
//!   geobench db ./data                  # run against that dataset
//!
//! Every option can also come from a `GEOBENCH_*` environment variable or a
//! `.env` file; flags win. Progress goes to stderr, the report to stdout.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use geobench::config::BenchConfig;
use geobench::orchestrator::{run_dataset, run_random, RunResult};
use geobench::report::{print_partial, print_report, StderrProgress};
use geobench::workload::generate_dataset;
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "geobench", version, about = "Staged benchmark of a replicated geospatial store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory the run's stores are created in. A temporary directory,
    /// removed at exit, when omitted.
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// Where the replication target is created (default: <work-dir>/replica)
    #[arg(long, global = true)]
    replica_dir: Option<PathBuf>,

    /// Seed for the workload generator
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Bound on the index and replication waits, in seconds (0 = none)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Records read by the centroid pass (0 = all)
    #[arg(long, global = true)]
    centroid_sample: Option<usize>,

    /// Skip storage counter deltas
    #[arg(long, global = true)]
    no_io_counters: bool,

    /// Print the run result as JSON instead of the report table
    #[arg(long, global = true)]
    json: bool,

    /// off, error, warn, info, debug or trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also log to this file, at every level
    #[arg(long, global = true)]
    log_file: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Insert random nodes into a fresh store and run every stage
    Random {
        /// Number of nodes
        #[arg(short = 'n', long)]
        nodes: Option<usize>,
    },
    /// Run every stage but insert against an existing dataset
    Db {
        /// Directory holding the dataset's log.db
        dataset: PathBuf,
    },
    /// Write a dataset of random nodes for later `db` runs
    Generate {
        /// Directory to create the dataset in
        dataset: PathBuf,
        /// Number of nodes
        #[arg(short = 'n', long)]
        nodes: Option<usize>,
    },
}

fn resolve_log_level(cli: Option<&str>) -> anyhow::Result<LevelFilter> {
    match cli.map(str::to_string).or_else(|| env::var("GEOBENCH_LOG_LEVEL").ok()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid log level '{raw}'")),
        None => Ok(LevelFilter::Warn),
    }
}

fn resolve_log_file(cli: Option<String>) -> Option<String> {
    cli.or_else(|| env::var("GEOBENCH_LOG_FILE").ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("none"))
}

fn apply_flags(config: &mut BenchConfig, cli: &Cli) {
    if let Some(dir) = &cli.replica_dir {
        config.replica_dir = Some(dir.clone());
    }
    if let Some(seed) = cli.seed {
        config.seed = Some(seed);
    }
    if let Some(secs) = cli.timeout_secs {
        config.stage_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Some(sample) = cli.centroid_sample {
        config.centroid_sample = (sample > 0).then_some(sample);
    }
    if cli.no_io_counters {
        config.io_counters = false;
    }
}

fn emit(result: &RunResult, json: bool) -> anyhow::Result<()> {
    if json {
        let out = serde_json::to_string_pretty(result).context("serialize run result")?;
        println!("{out}");
    } else {
        print_report(result);
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    // Dropped at the end of the run, removing the directory.
    let temp_dir = if cli.work_dir.is_none() {
        let dir = tempfile::Builder::new()
            .prefix("geobench-")
            .tempdir()
            .context("create temporary work directory")?;
        Some(dir)
    } else {
        None
    };
    let work_dir = cli
        .work_dir
        .clone()
        .or_else(|| temp_dir.as_ref().map(|t| t.path().to_path_buf()))
        .context("no work directory")?;

    let mut config = BenchConfig::from_env(&work_dir)?;
    apply_flags(&mut config, &cli);
    config.validate()?;
    log::info!("Work directory: {}", work_dir.display());

    let mut progress = StderrProgress;
    match cli.command {
        Command::Random { nodes } => {
            if let Some(n) = nodes {
                config.node_count = n;
            }
            let result = run_random(&config, &mut progress).map_err(|failure| {
                print_partial(&failure.completed);
                failure
            })?;
            emit(&result, cli.json)
        }
        Command::Db { dataset } => {
            let result = run_dataset(&dataset, &config, &mut progress).map_err(|failure| {
                print_partial(&failure.completed);
                failure
            })?;
            emit(&result, cli.json)
        }
        Command::Generate { dataset, nodes } => {
            let n = nodes.unwrap_or(config.node_count);
            let mut rng = config.rng();
            eprint!("  Generating {n} nodes....");
            generate_dataset(&dataset, n, &mut rng, config.stage_timeout)?;
            eprintln!("done");
            println!("Dataset written to {}", dataset.display());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let log_file = resolve_log_file(cli.log_file.clone());
    let logger = resolve_log_level(cli.log_level.as_deref())
        .and_then(|level| geo_core::initialize_logger(level, log_file.as_deref()));
    if let Err(e) = logger {
        eprintln!("Failed to initialize logger: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
