//! Append-only JSON-lines log of per-item failures.
//!
//! One line per failed file or URL, shared by all workers of a run. The log is
//! an operator aid: a write failure is reported through tracing and never
//! fails the item that triggered it.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::category::Category;
use crate::error::AppError;

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Listing,
    Fetch,
    Convert,
    Analyse,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Listing => "listing",
            PipelineStage::Fetch => "fetch",
            PipelineStage::Convert => "convert",
            PipelineStage::Analyse => "analyse",
        };
        f.write_str(name)
    }
}

/// One line of the failure log.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub timestamp: i64,
    pub run_id: Uuid,
    pub stage: PipelineStage,
    pub target: String,
    pub category: Option<Category>,
    pub kind: &'static str,
    pub message: String,
    pub attempts: u32,
}

/// Shared failure log for one process run.
pub struct FailureLog {
    path: PathBuf,
    run_id: Uuid,
    file: Mutex<File>,
}

impl FailureLog {
    /// Opens (or creates) the log at `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Filesystem` if the file or its directory cannot be
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AppError::fs(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::fs(&path, e))?;

        Ok(Self {
            path,
            run_id: Uuid::new_v4(),
            file: Mutex::new(file),
        })
    }

    /// Identifier stamped on every entry of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends an entry for `error`.
    pub fn record(
        &self,
        stage: PipelineStage,
        target: impl Into<String>,
        category: Option<Category>,
        error: &AppError,
        attempts: u32,
    ) {
        let record = error.to_record();
        let entry = FailureEntry {
            timestamp: current_timestamp(),
            run_id: self.run_id,
            stage,
            target: target.into(),
            category,
            kind: record.kind,
            message: record.message,
            attempts,
        };

        if let Err(e) = self.append(&entry) {
            warn!(log = %self.path.display(), error = %e, "Failed to append to failure log");
        }
    }

    fn append(&self, entry: &FailureEntry) -> Result<(), AppError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| AppError::Internal(format!("Failed to serialize failure entry: {}", e)))?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| AppError::Internal("Failure log lock poisoned".to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| AppError::fs(&self.path, e))?;
        file.flush().map_err(|e| AppError::fs(&self.path, e))
    }
}

/// Current unix timestamp in seconds.
fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).expect("each line should be JSON"))
            .collect()
    }

    #[test]
    fn test_entries_are_appended_as_json_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs/failures.jsonl");
        let log = FailureLog::open(&path).unwrap();

        log.record(
            PipelineStage::Fetch,
            "https://example.org/DEMO_J.XPT",
            Some(Category::Demographics),
            &AppError::RemoteRejected {
                target: "https://example.org/DEMO_J.XPT".into(),
                status: 404,
            },
            1,
        );
        log.record(
            PipelineStage::Convert,
            "/raw/BMX_J.XPT",
            None,
            &AppError::corrupt("/raw/BMX_J.XPT", "truncated"),
            1,
        );

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["stage"], "fetch");
        assert_eq!(lines[0]["kind"], "remote_rejected");
        assert_eq!(lines[0]["category"], "Demographics");
        assert_eq!(lines[1]["stage"], "convert");
        assert_eq!(lines[1]["category"], serde_json::Value::Null);
        assert_eq!(lines[0]["run_id"], lines[1]["run_id"]);
    }

    #[test]
    fn test_reopen_appends_instead_of_truncating() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("failures.jsonl");
        let err = AppError::Internal("worker panicked".into());

        FailureLog::open(&path)
            .unwrap()
            .record(PipelineStage::Analyse, "a", None, &err, 1);
        FailureLog::open(&path)
            .unwrap()
            .record(PipelineStage::Analyse, "b", None, &err, 1);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_ne!(lines[0]["run_id"], lines[1]["run_id"], "Each run has its own id");
    }

    #[tokio::test]
    async fn test_concurrent_writers_produce_whole_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("failures.jsonl");
        let log = Arc::new(FailureLog::open(&path).unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let log = log.clone();
            tasks.spawn(async move {
                log.record(
                    PipelineStage::Fetch,
                    format!("https://example.org/{}.XPT", i),
                    None,
                    &AppError::transient("x", "timeout"),
                    4,
                );
            });
        }
        while tasks.join_next().await.is_some() {}

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 16);
        assert!(lines.iter().all(|l| l["attempts"] == 4));
    }
}
