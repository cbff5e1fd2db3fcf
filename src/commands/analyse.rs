//! `analyse`: inventory, merge and classify the CSV tree.

use std::path::PathBuf;

use clap::Args;

use crate::analyse::{AnalyseReport, Analyser};
use crate::config::{ColumnOrderPolicy, PipelineConfig};
use crate::error::AppError;
use crate::state::PipelineState;

/// Command-line overrides for the analyse stage.
#[derive(Debug, Clone, Default, Args)]
pub struct AnalyseArgs {
    /// Root of the CSV tree
    #[arg(long, value_name = "DIR")]
    pub csv_dir: Option<PathBuf>,

    /// Directory for manifests and the failure log
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Destination of merged tables
    #[arg(long, value_name = "DIR")]
    pub merged_dir: Option<PathBuf>,

    /// Also copy every file into a per-category tree here
    #[arg(long, value_name = "DIR")]
    pub classified_dir: Option<PathBuf>,

    /// Treat reordered headers as different signatures
    #[arg(long)]
    pub respect_column_order: bool,

    /// Write YAML copies of every manifest
    #[arg(long)]
    pub yaml: bool,
}

impl AnalyseArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        let analyse = &mut config.analyse;
        if let Some(dir) = &self.csv_dir {
            analyse.csv_dir = dir.clone();
        }
        if let Some(dir) = &self.merged_dir {
            analyse.merged_dir = dir.clone();
        }
        if let Some(dir) = &self.classified_dir {
            analyse.classified_dir = Some(dir.clone());
        }
        if self.respect_column_order {
            analyse.column_order = ColumnOrderPolicy::Respect;
        }
        if self.yaml {
            analyse.yaml_mirror = true;
        }
    }
}

/// Runs the analyse stage with manifests in the work directory.
pub async fn analyse(state: &PipelineState) -> Result<AnalyseReport, AppError> {
    let analyser = Analyser::new(
        state.config.analyse.clone(),
        state.config.work_dir.clone(),
        state.failures.clone(),
    )?;
    analyser.run().await
}
