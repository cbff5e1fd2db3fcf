//! `convert`: turn the raw XPT tree into a mirrored CSV tree.

use std::path::PathBuf;

use clap::Args;

use crate::config::PipelineConfig;
use crate::convert::{ConvertReport, Converter};
use crate::error::AppError;
use crate::state::PipelineState;

/// Command-line overrides for the convert stage.
#[derive(Debug, Clone, Default, Args)]
pub struct ConvertArgs {
    /// Root of the raw XPT tree
    #[arg(short = 'i', long, value_name = "DIR")]
    pub input_dir: Option<PathBuf>,

    /// Root of the CSV tree
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Rename columns using the mapping JSON files
    #[arg(long = "columns")]
    pub rename_columns: bool,

    /// Directory searched for mapping files (defaults to the input root)
    #[arg(long, value_name = "DIR")]
    pub mapping_dir: Option<PathBuf>,

    /// Convert with a bounded worker pool
    #[arg(short = 'm', long)]
    pub multithread: bool,

    /// Worker count for --multithread
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Keep each source file after conversion
    #[arg(long)]
    pub keep_source: bool,

    /// Rows read and written per batch
    #[arg(long, value_name = "N")]
    pub chunk_rows: Option<usize>,
}

impl ConvertArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        let convert = &mut config.convert;
        if let Some(dir) = &self.input_dir {
            convert.input_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            convert.output_dir = dir.clone();
        }
        if self.rename_columns {
            convert.rename_columns = true;
        }
        if let Some(dir) = &self.mapping_dir {
            convert.mapping_dir = Some(dir.clone());
        }
        if self.multithread {
            convert.multithread = true;
        }
        if let Some(workers) = self.workers {
            convert.workers = workers;
        }
        if self.keep_source {
            convert.delete_source = false;
        }
        if let Some(rows) = self.chunk_rows {
            convert.chunk_rows = Some(rows);
        }
    }
}

/// Converts every transport file under the configured input root.
pub async fn convert(state: &PipelineState) -> Result<ConvertReport, AppError> {
    let converter = Converter::new(state.config.convert.clone(), state.failures.clone())?;
    converter.convert_all().await
}
