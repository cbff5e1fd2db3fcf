//! `fetch`: download every listed file into the raw tree.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tracing::info;

use crate::category::Category;
use crate::config::PipelineConfig;
use crate::error::AppError;
use crate::fetch::{FetchReport, Fetcher, HttpSource, RemoteSource};
use crate::state::PipelineState;

/// Command-line overrides for the fetch stage.
#[derive(Debug, Clone, Default, Args)]
pub struct FetchArgs {
    /// Categories to fetch (repeatable); defaults to the configured set
    #[arg(short = 'c', long = "category", value_name = "CAT")]
    pub categories: Vec<Category>,

    /// Download with a bounded worker pool
    #[arg(short = 'm', long)]
    pub multithread: bool,

    /// Worker count for --multithread
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Root of the download tree
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory holding the listing files
    #[arg(long, value_name = "DIR")]
    pub listing_dir: Option<PathBuf>,

    /// Retries after the first attempt for transient failures
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Re-download files whose size differs from the remote Content-Length
    #[arg(long)]
    pub verify_size: bool,
}

impl FetchArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        let fetch = &mut config.fetch;
        if !self.categories.is_empty() {
            fetch.categories = self.categories.clone();
        }
        if self.multithread {
            fetch.multithread = true;
        }
        if let Some(workers) = self.workers {
            fetch.workers = workers;
        }
        if let Some(dir) = &self.output_dir {
            fetch.output_dir = dir.clone();
        }
        if let Some(dir) = &self.listing_dir {
            fetch.listing_dir = dir.clone();
        }
        if let Some(retries) = self.max_retries {
            fetch.retry.max_retries = retries;
        }
        if self.verify_size {
            fetch.verify_size = true;
        }
    }
}

/// Fetches the configured categories.
pub async fn fetch(state: &PipelineState) -> Result<FetchReport, AppError> {
    let config = state.config.fetch.clone();
    let categories = config.categories.clone();
    let source: Arc<dyn RemoteSource> = Arc::new(HttpSource::new(&config)?);
    let fetcher = Fetcher::new(config, source, state.failures.clone());

    let report = fetcher.fetch(&categories).await?;
    info!(
        downloaded = report.total_downloaded(),
        failed = report.total_failed(),
        "Fetch finished"
    );
    Ok(report)
}
