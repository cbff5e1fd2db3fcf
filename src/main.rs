//! `nhanes` command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use nhanes_pipeline::commands::{
    self, AnalyseArgs, ConvertArgs, FetchArgs, ListingArgs,
};
use nhanes_pipeline::config::PipelineConfig;
use nhanes_pipeline::error::AppError;
use nhanes_pipeline::logging;
use nhanes_pipeline::state::PipelineState;

/// Exit status for configuration-level failures.
const EXIT_CONFIGURATION: u8 = 2;

/// Fetch, convert and analyse NHANES survey files
#[derive(Parser)]
#[command(name = "nhanes", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML configuration file
    #[arg(long, global = true, value_name = "YAML", env = "NHANES_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also append JSON log lines to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh the per-category listing files from the index of listing pages
    #[command(name = "update-listing")]
    UpdateListing(ListingArgs),

    /// Download every listed file into the raw tree
    Fetch(FetchArgs),

    /// Convert the raw XPT tree into CSV
    Convert(ConvertArgs),

    /// Inventory, merge and classify the CSV tree
    Analyse(AnalyseArgs),

    /// Run fetch, convert and analyse in sequence
    Run,
}

impl Commands {
    fn apply(&self, config: &mut PipelineConfig) {
        match self {
            Commands::UpdateListing(args) => args.apply(config),
            Commands::Fetch(args) => args.apply(config),
            Commands::Convert(args) => args.apply(config),
            Commands::Analyse(args) => args.apply(config),
            Commands::Run => {}
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("nhanes: cannot initialise logging: {}", e);
        return ExitCode::from(EXIT_CONFIGURATION);
    }

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<AppError>() {
            Some(app) if !app.is_fatal() => {
                // Per-file problems are in the failure log; the stage itself ran.
                error!(error = %format!("{:#}", e), "Stage finished with an error");
                ExitCode::SUCCESS
            }
            _ => {
                error!(error = %format!("{:#}", e), "Aborted");
                ExitCode::from(EXIT_CONFIGURATION)
            }
        },
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    cli.command.apply(&mut config);
    let state = PipelineState::new(config)?;

    match cli.command {
        Commands::UpdateListing(_) => {
            let report = commands::update_listing(&state).await?;
            print_report(&report)?;
        }
        Commands::Fetch(_) => {
            let report = commands::fetch(&state).await?;
            print_report(&report)?;
        }
        Commands::Convert(_) => {
            let report = commands::convert(&state).await?;
            print_report(&report)?;
        }
        Commands::Analyse(_) => {
            let report = commands::analyse(&state).await?;
            print_report(&report)?;
        }
        Commands::Run => {
            let report = commands::run_pipeline(&state).await?;
            print_report(&report)?;
        }
    }

    info!(failure_log = %state.failures.path().display(), "Done");
    Ok(())
}

fn print_report<T: serde::Serialize>(report: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to render report")?;
    println!("{}", json);
    Ok(())
}
