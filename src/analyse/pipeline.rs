//! Analyse stage orchestration.
//!
//! Inventory, grouping, merge and classification run one after another on a
//! blocking thread; each step's manifest is written before the next starts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::AnalyseConfig;
use crate::error::AppError;
use crate::storage::{read_manifest, write_manifest, FailureLog, PipelineStage};

use super::classify::{materialize_classified, Classifier, CopyStats};
use super::grouping::group_inventory;
use super::inventory::{build_inventory, Inventory, InventoryStats};
use super::merge::{merge_groups, MergePlan, MergeStats, MergedManifest};

pub const INVENTORY_MANIFEST: &str = "inventory.json";
pub const GROUPS_MANIFEST: &str = "groups.json";
pub const MERGED_MANIFEST: &str = "merged.json";
pub const CLASSIFICATION_MANIFEST: &str = "classification.json";
pub const CLASSIFIED_MANIFEST: &str = "classified.json";

/// Summary of one analyse run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyseReport {
    pub inventory: InventoryStats,
    pub stems: usize,
    pub inconsistent_stems: Vec<String>,
    pub merge: MergeStats,
    /// Files per classification bucket.
    pub buckets: BTreeMap<String, usize>,
    pub classified: Option<CopyStats>,
}

/// Runs the analyse stage over a converted CSV tree.
#[derive(Clone)]
pub struct Analyser {
    config: Arc<AnalyseConfig>,
    work_dir: PathBuf,
    classifier: Classifier,
    failures: Arc<FailureLog>,
}

impl Analyser {
    /// # Errors
    ///
    /// Returns `AppError::Configuration` if the classification rules do not
    /// compile.
    pub fn new(
        config: AnalyseConfig,
        work_dir: PathBuf,
        failures: Arc<FailureLog>,
    ) -> Result<Self, AppError> {
        let classifier = Classifier::new(&config.rules)?;
        Ok(Self {
            config: Arc::new(config),
            work_dir,
            classifier,
            failures,
        })
    }

    /// Where the manifest `name` is written.
    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    /// Runs every step on the blocking pool.
    pub async fn run(&self) -> Result<AnalyseReport, AppError> {
        let analyser = self.clone();
        tokio::task::spawn_blocking(move || analyser.run_blocking())
            .await
            .map_err(|e| AppError::Internal(format!("Analyse task failed: {}", e)))?
    }

    /// Runs every step on the current thread.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Configuration` if the CSV directory does not exist.
    pub fn run_blocking(&self) -> Result<AnalyseReport, AppError> {
        let config = &self.config;
        info!(csv_dir = %config.csv_dir.display(), "Analysing");
        let mut report = AnalyseReport::default();

        // 1. Inventory
        let mut exclude = vec![config.merged_dir.clone()];
        exclude.extend(config.classified_dir.iter().cloned());
        let previous: Inventory =
            read_manifest(&self.manifest_path(INVENTORY_MANIFEST)).unwrap_or_default();
        let (inventory, stats) =
            build_inventory(&config.csv_dir, &exclude, &previous, &self.failures)?;
        report.inventory = stats;
        self.publish(INVENTORY_MANIFEST, &inventory);
        info!(
            files = stats.files,
            cached = stats.cached,
            unreadable = stats.unreadable,
            "Inventory complete"
        );

        // 2. Column consistency
        let groups = group_inventory(&inventory, config.column_order);
        report.stems = groups.len();
        report.inconsistent_stems = groups
            .iter()
            .filter(|(_, g)| !g.consistent)
            .map(|(stem, _)| stem.clone())
            .collect();
        self.publish(GROUPS_MANIFEST, &groups);
        info!(
            stems = report.stems,
            inconsistent = report.inconsistent_stems.len(),
            "Column check complete"
        );

        // 3. Merge
        let previous_merged: MergedManifest =
            read_manifest(&self.manifest_path(MERGED_MANIFEST)).unwrap_or_default();
        let plan = MergePlan {
            merged_dir: &config.merged_dir,
            policy: config.column_order,
            flush_every: config.merge_chunk_rows,
        };
        let (merged, merge_stats) =
            merge_groups(&plan, &groups, &inventory, &previous_merged, &self.failures);
        report.merge = merge_stats;
        self.publish(MERGED_MANIFEST, &merged);
        info!(
            merged = merge_stats.merged,
            unchanged = merge_stats.unchanged,
            failed = merge_stats.failed,
            "Merge complete"
        );

        // 4. Classification
        let classification = self.classifier.classify(&inventory);
        report.buckets = classification
            .iter()
            .map(|(bucket, members)| (bucket.clone(), members.len()))
            .collect();
        self.publish(CLASSIFICATION_MANIFEST, &classification);

        // 5. Classified tree
        if let Some(root) = &config.classified_dir {
            let (classified, copy_stats) =
                materialize_classified(root, &classification, &inventory, &merged, &self.failures);
            report.classified = Some(copy_stats);
            self.publish(CLASSIFIED_MANIFEST, &classified);
        }

        info!("Analyse finished");
        Ok(report)
    }

    /// Writes a manifest; a failed write is logged and the run continues.
    fn publish<T: Serialize>(&self, name: &str, value: &T) {
        let path = self.manifest_path(name);
        if let Err(e) = write_manifest(&path, value, self.config.yaml_mirror) {
            warn!(path = %path.display(), error = %e, "Failed to write manifest");
            self.failures
                .record(PipelineStage::Analyse, display(&path), None, &e, 1);
        }
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
