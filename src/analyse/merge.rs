//! Merging of eligible sub-groups into one CSV per sub-group.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::config::ColumnOrderPolicy;
use crate::storage::{FailureLog, PipelineStage};
use crate::streaming::merge_csv_files;

use super::grouping::{merge_name, GroupManifest, SubGroup};
use super::inventory::Inventory;

/// One merged output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedEntry {
    pub output: String,
    pub columns: Vec<String>,
    pub members: Vec<String>,
    pub rows: u64,
}

/// Output name to merged entry.
pub type MergedManifest = BTreeMap<String, MergedEntry>;

/// Counters for one merge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub merged: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Settings of a merge pass.
#[derive(Debug, Clone)]
pub struct MergePlan<'a> {
    pub merged_dir: &'a Path,
    pub policy: ColumnOrderPolicy,
    pub flush_every: usize,
}

/// Merges every eligible sub-group of `groups`.
///
/// Sub-groups whose previous entry still describes the same members and
/// columns, and whose output is newer than all members, are carried over
/// without rewriting. A failing sub-group is logged and left out of the
/// returned manifest.
pub fn merge_groups(
    plan: &MergePlan<'_>,
    groups: &GroupManifest,
    inventory: &Inventory,
    previous: &MergedManifest,
    failures: &FailureLog,
) -> (MergedManifest, MergeStats) {
    let mut manifest = MergedManifest::new();
    let mut stats = MergeStats::default();

    for (stem, group) in groups {
        let eligible: Vec<&SubGroup> = group.eligible().collect();
        for subgroup in &eligible {
            let name = merge_name(stem, &subgroup.key, eligible.len());
            let output = plan.merged_dir.join(format!("{}.csv", name));

            if let Some(prior) = previous.get(&name) {
                if is_up_to_date(prior, subgroup, &output, inventory) {
                    debug!(%name, "Merged output up to date");
                    stats.unchanged += 1;
                    manifest.insert(name, prior.clone());
                    continue;
                }
            }

            let members: Vec<PathBuf> = subgroup.members.iter().map(PathBuf::from).collect();
            match merge_csv_files(&members, &output, plan.policy, plan.flush_every) {
                Ok(summary) => {
                    info!(
                        %name,
                        members = members.len(),
                        rows = summary.rows,
                        output = %output.display(),
                        "Merged"
                    );
                    stats.merged += 1;
                    manifest.insert(
                        name,
                        MergedEntry {
                            output: output.to_string_lossy().into_owned(),
                            columns: summary.columns,
                            members: subgroup.members.clone(),
                            rows: summary.rows,
                        },
                    );
                }
                Err(e) => {
                    warn!(%name, error = %e, "Merge failed");
                    let category = members.first().and_then(|m| Category::from_path(m));
                    failures.record(PipelineStage::Analyse, name, category, &e, 1);
                    stats.failed += 1;
                }
            }
        }
    }

    (manifest, stats)
}

fn is_up_to_date(prior: &MergedEntry, subgroup: &SubGroup, output: &Path, inventory: &Inventory) -> bool {
    if prior.members != subgroup.members || prior.columns != subgroup.columns {
        return false;
    }
    if Path::new(&prior.output) != output {
        return false;
    }
    let output_modified = match std::fs::metadata(output).and_then(|m| m.modified()) {
        Ok(time) => time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0),
        Err(_) => return false,
    };
    subgroup.members.iter().all(|member| {
        inventory
            .get(member)
            .map(|entry| entry.modified <= output_modified)
            .unwrap_or(false)
    })
}
