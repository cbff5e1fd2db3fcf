//! `update-listing`: refresh per-category listing files from the index.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tracing::info;

use crate::category::Category;
use crate::config::PipelineConfig;
use crate::error::AppError;
use crate::fetch::{update_listings, HttpSource, ListingReport, RemoteSource};
use crate::state::PipelineState;

/// Command-line overrides for listing discovery.
#[derive(Debug, Clone, Default, Args)]
pub struct ListingArgs {
    /// Index file of listing-page URLs
    #[arg(long = "index", value_name = "FILE")]
    pub index_file: Option<PathBuf>,

    /// Directory the listing files are written to
    #[arg(long, value_name = "DIR")]
    pub listing_dir: Option<PathBuf>,

    /// Categories to refresh (repeatable); defaults to the configured set
    #[arg(short = 'c', long = "category", value_name = "CAT")]
    pub categories: Vec<Category>,

    /// Fetch listing pages concurrently
    #[arg(short = 'm', long)]
    pub multithread: bool,
}

impl ListingArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(index) = &self.index_file {
            config.fetch.index_file = index.clone();
        }
        if let Some(dir) = &self.listing_dir {
            config.fetch.listing_dir = dir.clone();
        }
        if !self.categories.is_empty() {
            config.fetch.categories = self.categories.clone();
        }
        if self.multithread {
            config.fetch.multithread = true;
        }
    }
}

/// Rewrites the listing files of the configured categories.
pub async fn update_listing(state: &PipelineState) -> Result<ListingReport, AppError> {
    let config = &state.config.fetch;
    let source: Arc<dyn RemoteSource> = Arc::new(HttpSource::new(config)?);
    let report =
        update_listings(config, &config.categories, source, state.failures.clone()).await?;

    info!(
        refreshed = report.links.len(),
        failed_pages = report.failed_pages.len(),
        "Listing update finished"
    );
    Ok(report)
}
