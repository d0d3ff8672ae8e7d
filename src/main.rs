//! CLI entry point for the survey evaluation tool.
//!
//! Provides subcommands for evaluating a stratified survey from CSV layers
//! and for listing the columns of a station file that can be bound.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use survey_eval::config::SurveyConfig;
use survey_eval::evaluation::SurveyEvaluator;
use survey_eval::layer::{FeatureSource, delimited};
use survey_eval::output::{print_json, print_pretty, write_report_json};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "survey_eval")]
#[command(about = "Evaluate a stratified survey: catch rates, biomass and CV", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a survey and write the results onto the strata table
    Evaluate {
        /// Station CSV file
        #[arg(long, value_name = "CSV")]
        stations: PathBuf,

        /// Strata CSV file (area column or WKT polygons)
        #[arg(long, value_name = "CSV")]
        strata: PathBuf,

        /// Survey config JSON (falls back to SURVEY_CONFIG)
        #[arg(short, long, env = "SURVEY_CONFIG")]
        config: PathBuf,

        /// Override the configured species vulnerability
        #[arg(short = 'v', long)]
        species_vulnerability: Option<f64>,

        /// Where to write the updated strata table (default: overwrite --strata)
        #[arg(short, long, value_name = "CSV")]
        output: Option<PathBuf>,

        /// Optional JSON file for the full run report
        #[arg(short, long, value_name = "JSON")]
        report: Option<PathBuf>,
    },
    /// List the numeric columns of a station file
    Fields {
        #[arg(value_name = "CSV")]
        source: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/survey_eval.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("survey_eval.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate {
            stations,
            strata,
            config,
            species_vulnerability,
            output,
            report,
        } => {
            let config_path = config.to_string_lossy();
            let mut config = SurveyConfig::load(&config_path)?;
            if let Some(v) = species_vulnerability {
                config.species_vulnerability = v;
            }
            evaluate(
                config,
                &stations,
                &strata,
                output.as_deref(),
                report.as_deref(),
            )?;
        }
        Commands::Fields { source } => {
            let layer = delimited::read_layer(&source)?;
            let numeric: Vec<_> = layer
                .fields()
                .iter()
                .filter(|f| f.field_type.is_numeric())
                .collect();

            info!(layer = layer.name(), total = numeric.len(), "Bindable columns");
            for field in numeric {
                println!("{}\t{:?}", field.name, field.field_type);
            }
        }
    }

    Ok(())
}

/// Loads both layers, runs the evaluation and writes the updated tables.
#[tracing::instrument(
    skip_all,
    fields(stations = %stations_path.display(), strata = %strata_path.display())
)]
fn evaluate(
    mut config: SurveyConfig,
    stations_path: &Path,
    strata_path: &Path,
    output: Option<&Path>,
    report_path: Option<&Path>,
) -> Result<()> {
    let mut stations = delimited::read_layer(stations_path)?;
    let mut strata = delimited::read_layer(strata_path)?;

    // CSV layers are named after their file; an unset sample layer binds to it.
    if config.sample_layer.is_empty() {
        config.sample_layer = stations.name().to_string();
    }

    let mut evaluator = SurveyEvaluator::new(config);
    let report = evaluator
        .evaluate(&stations, &mut strata)
        .context("survey evaluation failed")?;

    let output = output.unwrap_or(strata_path);
    delimited::write_layer(output, &strata)?;
    info!(path = %output.display(), strata = report.strata.len(), "Strata table written");

    if evaluator.config().write_station_scr {
        let written = evaluator.persist_station_scr(&mut stations, &report)?;
        delimited::write_layer(stations_path, &stations)?;
        info!(path = %stations_path.display(), written, "Station SCR written");
    }

    for anomaly in report.data_integrity_errors() {
        warn!(?anomaly, "Station not attached to a stratum");
    }

    print_pretty(&report);
    print_json(&report)?;
    if let Some(path) = report_path {
        write_report_json(path, &report)?;
    }
    Ok(())
}
