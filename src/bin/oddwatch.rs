//! oddwatch - streaming outlier detection from the command line
//!
//! Usage:
//!   oddwatch simulate --seed 7
//!   oddwatch run --train train.json --stream stream.json --config detector.json
//!   oddwatch snapshot --train train.json --output model.json
//!
//! Matrices are JSON arrays of rows (time steps), one value per series,
//! with `null` for missing observations. Reports go to stdout as JSON
//! lines; logs go to stderr (`RUST_LOG` controls verbosity).

use clap::{Parser, Subcommand, ValueEnum};
use odd_streams::simulation::detection_scenario;
use odd_streams::{
    DetectorConfig, OddError, OutlierReport, Result, StreamingEvaluator, TimeSeriesCollection,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oddwatch")]
#[command(about = "Flag anomalous series in windows of a multi-series stream")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the built-in detection scenario (five doubled series out of 100)
    Simulate {
        /// Seed for data generation and calibration
        #[arg(short, long, default_value = "0")]
        seed: u64,

        /// Monte-Carlo trials for the threshold
        #[arg(short, long, default_value = "500")]
        trials: usize,

        /// Output format
        #[arg(short, long, default_value = "json-lines")]
        format: OutputFormat,
    },

    /// Evaluate a stream against a training collection
    Run {
        /// Training matrix (JSON rows)
        #[arg(long)]
        train: PathBuf,

        /// Stream matrix (JSON rows)
        #[arg(long)]
        stream: PathBuf,

        /// Detector configuration (JSON, missing fields take defaults)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "json-lines")]
        format: OutputFormat,
    },

    /// Fit the model on a training collection and write it as JSON
    Snapshot {
        /// Training matrix (JSON rows)
        #[arg(long)]
        train: PathBuf,

        /// Detector configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Destination file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    JsonLines,
    Pretty,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Simulate {
            seed,
            trials,
            format,
        } => run_simulate(seed, trials, format),
        Commands::Run {
            train,
            stream,
            config,
            format,
        } => run_stream(&train, &stream, config.as_deref(), format),
        Commands::Snapshot {
            train,
            config,
            output,
        } => run_snapshot(&train, config.as_deref(), output.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("oddwatch: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_simulate(seed: u64, trials: usize, format: OutputFormat) -> Result<()> {
    let scenario = detection_scenario(seed)?;
    let config = DetectorConfig {
        trials,
        ..DetectorConfig::default()
    }
    .with_seed(seed);
    info!(anomalous = ?scenario.anomalous, "Injected series.");

    let mut eval = StreamingEvaluator::new(&scenario.training, config)?;
    let run = eval.run_with(&scenario.stream, None, |report, _| emit(report, format))?;

    let flagged = run.reports.first().map(|r| r.outlier_series.clone()).unwrap_or_default();
    let caught = scenario.anomalous.iter().filter(|i| flagged.contains(i)).count();
    info!(
        caught,
        injected = scenario.anomalous.len(),
        flagged = flagged.len(),
        "Scenario finished."
    );
    Ok(())
}

fn run_stream(
    train: &Path,
    stream: &Path,
    config: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config)?;
    let training = load_matrix(train)?;
    let stream = load_matrix(stream)?;

    let mut eval = StreamingEvaluator::new(&training, config)?;
    let run = eval.run_with(&stream, None, |report, diagnostic| {
        emit(report, format);
        if let Some(d) = diagnostic {
            info!(
                window = d.window_index,
                p_value = d.p_value,
                threshold = d.updated_threshold,
                "Model adapted."
            );
        }
    })?;
    info!(windows = run.reports.len(), adaptations = run.adaptations(), "Done.");
    Ok(())
}

fn run_snapshot(train: &Path, config: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let training = load_matrix(train)?;
    let eval = StreamingEvaluator::new(&training, config)?;
    let json = eval.snapshot().to_json()?;

    match output {
        Some(path) => {
            std::fs::write(path, json).map_err(|e| io_error(path, e))?;
            info!(path = %path.display(), "Snapshot written.");
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn emit(report: &OutlierReport, format: OutputFormat) {
    match format {
        OutputFormat::JsonLines => match report.to_json_line() {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("oddwatch: cannot encode report: {}", e),
        },
        OutputFormat::Pretty => {
            let status = if report.status.is_ok() { "" } else { " [UNRELIABLE]" };
            println!(
                "window {:>4} [{:>6}, {:>6})  outliers: {:?}{}",
                report.window_index,
                report.window_start,
                report.window_end,
                report.outlier_series,
                status
            );
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<DetectorConfig> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p).map_err(|e| io_error(p, e))?;
            DetectorConfig::from_json(&text)
        }
        None => Ok(DetectorConfig::default()),
    }
}

fn load_matrix(path: &Path) -> Result<TimeSeriesCollection> {
    let text = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let rows: Vec<Vec<Option<f64>>> = serde_json::from_str(&text).map_err(|e| {
        OddError::InvalidInput(format!("{}: malformed matrix: {}", path.display(), e))
    })?;
    TimeSeriesCollection::from_optional_rows(rows)
}

fn io_error(path: &Path, e: std::io::Error) -> OddError {
    OddError::InvalidInput(format!("{}: {}", path.display(), e))
}
