//! Inventory of the converted CSV tree.
//!
//! Headers are only re-read for files whose size or modification time changed
//! since the previous inventory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::category::Category;
use crate::error::AppError;
use crate::storage::{collect_files, FailureLog, FileStage, PipelineStage};
use crate::streaming::read_csv_header;

use super::grouping::{infer_year, stem_of};

/// One inventoried CSV file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub file_name: String,
    pub stem: String,
    pub year: Option<String>,
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub modified: i64,
    pub columns: Option<Vec<String>>,
    pub error: Option<String>,
}

impl InventoryEntry {
    pub fn is_readable(&self) -> bool {
        self.columns.is_some()
    }
}

/// Path (as walked) to entry.
pub type Inventory = BTreeMap<String, InventoryEntry>;

/// Counters for one inventory pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InventoryStats {
    pub files: usize,
    pub cached: usize,
    pub read: usize,
    pub unreadable: usize,
}

/// Walks `csv_dir` and builds the inventory, reusing cached headers from
/// `previous`.
///
/// # Errors
///
/// Returns `AppError::Configuration` if `csv_dir` does not exist. Unreadable
/// files are recorded in their entry and in the failure log.
pub fn build_inventory(
    csv_dir: &Path,
    exclude: &[PathBuf],
    previous: &Inventory,
    failures: &FailureLog,
) -> Result<(Inventory, InventoryStats), AppError> {
    let files = collect_files(csv_dir, FileStage::ConvertedText, exclude)?;
    let mut inventory = Inventory::new();
    let mut stats = InventoryStats::default();

    for file in files {
        let key = file.path.to_string_lossy().into_owned();
        let (size, modified) = match std::fs::metadata(&file.path) {
            Ok(meta) => (meta.len(), modified_millis(&meta)),
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "Cannot stat file, skipping");
                continue;
            }
        };
        stats.files += 1;

        if let Some(cached) = previous
            .get(&key)
            .filter(|c| c.size == size && c.modified == modified)
        {
            debug!(path = %key, "Inventory entry unchanged");
            stats.cached += 1;
            if !cached.is_readable() {
                stats.unreadable += 1;
            }
            inventory.insert(key, cached.clone());
            continue;
        }

        stats.read += 1;
        let file_name = file.file_name();
        let (columns, error) = match read_csv_header(&file.path) {
            Ok(columns) => (Some(columns), None),
            Err(e) => {
                warn!(path = %key, error = %e, "Unreadable CSV header");
                failures.record(
                    PipelineStage::Analyse,
                    key.clone(),
                    Category::from_path(&file.path),
                    &e,
                    1,
                );
                stats.unreadable += 1;
                (None, Some(e.to_string()))
            }
        };

        inventory.insert(
            key,
            InventoryEntry {
                stem: stem_of(&file_name),
                year: infer_year(&file.path, csv_dir),
                file_name,
                size,
                modified,
                columns,
                error,
            },
        );
    }

    Ok((inventory, stats))
}

fn modified_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, FailureLog) {
        let temp_dir = TempDir::new().unwrap();
        let csv_dir = temp_dir.path().join("csv");
        std::fs::create_dir_all(csv_dir.join("2017-2018/Demographics")).unwrap();
        let failures = FailureLog::open(temp_dir.path().join("failures.jsonl")).unwrap();
        (temp_dir, csv_dir, failures)
    }

    #[test]
    fn entries_carry_header_stem_and_year() {
        let (_temp_dir, csv_dir, failures) = setup();
        let path = csv_dir.join("2017-2018/Demographics/DEMO_J.csv");
        std::fs::write(&path, "SEQN,RIAGENDR\n1,2\n").unwrap();

        let (inventory, stats) = build_inventory(&csv_dir, &[], &Inventory::new(), &failures).unwrap();

        let entry = &inventory[&*path.to_string_lossy()];
        assert_eq!(entry.file_name, "DEMO_J.csv");
        assert_eq!(entry.stem, "DEMO");
        assert_eq!(entry.year.as_deref(), Some("2017-2018"));
        assert_eq!(entry.size, 18);
        assert_eq!(entry.columns.as_deref(), Some(&["SEQN".to_string(), "RIAGENDR".to_string()][..]));
        assert!(entry.error.is_none());
        assert_eq!(stats.read, 1);
    }

    #[test]
    fn unchanged_files_reuse_cached_entry() {
        let (_temp_dir, csv_dir, failures) = setup();
        let path = csv_dir.join("DEMO_J.csv");
        std::fs::write(&path, "SEQN\n1\n").unwrap();

        let (first, _) = build_inventory(&csv_dir, &[], &Inventory::new(), &failures).unwrap();

        // Plant a marker in the cache to prove the header is not re-read.
        let mut planted = first.clone();
        let key = path.to_string_lossy().into_owned();
        planted.get_mut(&key).unwrap().columns = Some(vec!["CACHED".into()]);

        let (second, stats) = build_inventory(&csv_dir, &[], &planted, &failures).unwrap();
        assert_eq!(stats.cached, 1);
        assert_eq!(stats.read, 0);
        assert_eq!(second[&key].columns, Some(vec!["CACHED".to_string()]));
    }

    #[test]
    fn changed_size_forces_reread() {
        let (_temp_dir, csv_dir, failures) = setup();
        let path = csv_dir.join("DEMO_J.csv");
        std::fs::write(&path, "SEQN\n1\n").unwrap();
        let (first, _) = build_inventory(&csv_dir, &[], &Inventory::new(), &failures).unwrap();

        std::fs::write(&path, "SEQN,AGE\n1,30\n").unwrap();
        let (second, stats) = build_inventory(&csv_dir, &[], &first, &failures).unwrap();

        assert_eq!(stats.read, 1);
        let key = path.to_string_lossy().into_owned();
        assert_eq!(second[&key].columns.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn unreadable_file_is_recorded_not_fatal() {
        let (temp_dir, csv_dir, failures) = setup();
        let path = csv_dir.join("2017-2018/Demographics/EMPTY_J.csv");
        std::fs::write(&path, "").unwrap();

        let (inventory, stats) = build_inventory(&csv_dir, &[], &Inventory::new(), &failures).unwrap();

        let entry = &inventory[&*path.to_string_lossy()];
        assert!(entry.columns.is_none());
        assert!(entry.error.is_some());
        assert_eq!(stats.unreadable, 1);
        let log = std::fs::read_to_string(temp_dir.path().join("failures.jsonl")).unwrap();
        assert!(log.contains("\"stage\":\"analyse\""));
    }

    #[test]
    fn excluded_directories_are_skipped() {
        let (_temp_dir, csv_dir, failures) = setup();
        let merged = csv_dir.join("merged");
        std::fs::create_dir_all(&merged).unwrap();
        std::fs::write(merged.join("DEMO.csv"), "SEQN\n").unwrap();
        std::fs::write(csv_dir.join("DEMO_J.csv"), "SEQN\n").unwrap();

        let (inventory, _) = build_inventory(&csv_dir, &[merged], &Inventory::new(), &failures).unwrap();
        assert_eq!(inventory.len(), 1);
    }
}
