//! Pipeline configuration.
//!
//! One immutable record per stage, loaded from YAML (every field has a
//! default), overlaid with command-line flags, validated once at startup and
//! then cloned into each stage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::analyse::classify::{default_rules, Classifier};
use crate::category::Category;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent sent with every remote request.
pub const DEFAULT_USER_AGENT: &str = concat!("nhanes-pipeline/", env!("CARGO_PKG_VERSION"));

/// Default number of rows flushed per merge chunk.
const DEFAULT_MERGE_CHUNK_ROWS: usize = 10_000;

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding manifests and the failure log.
    pub work_dir: PathBuf,
    pub fetch: FetchConfig,
    pub convert: ConvertConfig,
    pub analyse: AnalyseConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./data"),
            fetch: FetchConfig::default(),
            convert: ConvertConfig::default(),
            analyse: AnalyseConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Configuration` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            AppError::Configuration(format!("Invalid config {}: {}", path.display(), e))
        })
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, AppError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Path of the append-only failure log.
    pub fn failure_log_path(&self) -> PathBuf {
        self.work_dir.join("failures.jsonl")
    }

    /// Checks every stage's settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Configuration` describing the first invalid setting.
    pub fn validate(&self) -> Result<(), AppError> {
        self.fetch.validate()?;
        self.convert.validate()?;
        self.analyse.validate()?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded exponential backoff for remote retrievals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay.
    pub max_backoff_ms: u64,
    /// Adds up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests and dry runs.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            jitter: false,
        }
    }

    /// Delay to wait after the given zero-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let base = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);

        let jitter = if self.jitter && base >= 10 {
            rand::thread_rng().gen_range(0..=base / 10)
        } else {
            0
        };

        Duration::from_millis(base + jitter)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(AppError::Configuration(format!(
                "retry.max_backoff_ms ({}) is smaller than retry.initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetch
// ─────────────────────────────────────────────────────────────────────────────

/// Settings for listing discovery and file retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Root of the `{year}/{category}/{file}` download tree.
    pub output_dir: PathBuf,
    /// Directory of per-category listing files (`{Category}.txt`).
    pub listing_dir: PathBuf,
    /// Directory receiving the URLs that failed in the last batch.
    pub pending_dir: PathBuf,
    /// Index of listing-page URLs, one per line.
    pub index_file: PathBuf,
    /// Categories to process.
    pub categories: Vec<Category>,
    /// Use the bounded worker pool instead of strictly sequential processing.
    pub multithread: bool,
    /// Worker count when `multithread` is set.
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Compare remote `Content-Length` with existing local files.
    pub verify_size: bool,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./data/raw_data"),
            listing_dir: PathBuf::from("./urls"),
            pending_dir: PathBuf::from("./urls/pending"),
            index_file: PathBuf::from("./NHANES_URLS.txt"),
            categories: Category::COMPONENTS.to_vec(),
            multithread: false,
            workers: default_workers(),
            retry: RetryPolicy::default(),
            verify_size: false,
            request_timeout_secs: 300,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    /// Number of concurrent workers actually used.
    pub fn effective_workers(&self) -> usize {
        if self.multithread {
            self.workers
        } else {
            1
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.multithread && self.workers == 0 {
            return Err(AppError::Configuration(
                "fetch.workers must be greater than 0".to_string(),
            ));
        }
        if self.categories.is_empty() {
            return Err(AppError::Configuration(
                "fetch.categories must name at least one category".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::Configuration(
                "fetch.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        self.retry.validate()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Convert
// ─────────────────────────────────────────────────────────────────────────────

/// Settings for XPT to CSV conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Replace column names using the mapping tables.
    pub rename_columns: bool,
    /// Directory searched for mapping JSON files; defaults to `input_dir`.
    pub mapping_dir: Option<PathBuf>,
    pub multithread: bool,
    pub workers: usize,
    /// Delete each source file once its CSV is persisted.
    pub delete_source: bool,
    /// Rows per read/write batch; `None` reads the whole table at once.
    pub chunk_rows: Option<usize>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./data/raw_data"),
            output_dir: PathBuf::from("./data/csv_data"),
            rename_columns: false,
            mapping_dir: None,
            multithread: false,
            workers: default_workers(),
            delete_source: true,
            chunk_rows: Some(50_000),
        }
    }
}

impl ConvertConfig {
    pub fn effective_workers(&self) -> usize {
        if self.multithread {
            self.workers
        } else {
            1
        }
    }

    /// Directory mapping files are read from.
    pub fn mapping_root(&self) -> &Path {
        self.mapping_dir.as_deref().unwrap_or(&self.input_dir)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.multithread && self.workers == 0 {
            return Err(AppError::Configuration(
                "convert.workers must be greater than 0".to_string(),
            ));
        }
        if self.chunk_rows == Some(0) {
            return Err(AppError::Configuration(
                "convert.chunk_rows must be greater than 0 when set".to_string(),
            ));
        }
        if self.input_dir == self.output_dir {
            return Err(AppError::Configuration(
                "convert.input_dir and convert.output_dir must differ".to_string(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Analyse
// ─────────────────────────────────────────────────────────────────────────────

/// Whether column order participates in signature equality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOrderPolicy {
    /// Signatures compare as sets of column names.
    #[default]
    Ignore,
    /// Signatures compare as ordered lists.
    Respect,
}

/// Settings for inventory, merge and classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyseConfig {
    /// Root of the converted CSV tree.
    pub csv_dir: PathBuf,
    /// Destination of merged tables.
    pub merged_dir: PathBuf,
    /// Optional destination of the per-bucket copy tree.
    pub classified_dir: Option<PathBuf>,
    pub column_order: ColumnOrderPolicy,
    /// Rows written between flushes while merging.
    pub merge_chunk_rows: usize,
    /// Also write every manifest as YAML.
    pub yaml_mirror: bool,
    /// File-name glob rules per category, tried in category order.
    pub rules: BTreeMap<Category, Vec<String>>,
}

impl Default for AnalyseConfig {
    fn default() -> Self {
        Self {
            csv_dir: PathBuf::from("./data/csv_data"),
            merged_dir: PathBuf::from("./data/merge_csv/same_column"),
            classified_dir: None,
            column_order: ColumnOrderPolicy::default(),
            merge_chunk_rows: DEFAULT_MERGE_CHUNK_ROWS,
            yaml_mirror: false,
            rules: default_rules(),
        }
    }
}

impl AnalyseConfig {
    fn validate(&self) -> Result<(), AppError> {
        if self.merge_chunk_rows == 0 {
            return Err(AppError::Configuration(
                "analyse.merge_chunk_rows must be greater than 0".to_string(),
            ));
        }
        Classifier::new(&self.rules)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_validate() {
        PipelineConfig::default()
            .validate()
            .expect("default config should be valid");
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nhanes.yaml");
        std::fs::write(
            &path,
            "work_dir: /srv/nhanes\nfetch:\n  categories: [Dietary, Non]\n  retry:\n    max_retries: 5\n",
        )
        .unwrap();

        let config = PipelineConfig::load(&path).expect("config should parse");
        assert_eq!(config.work_dir, PathBuf::from("/srv/nhanes"));
        assert_eq!(
            config.fetch.categories,
            vec![Category::Dietary, Category::LimitedAccess]
        );
        assert_eq!(config.fetch.retry.max_retries, 5);
        assert_eq!(config.fetch.retry.initial_backoff_ms, 500);
        assert!(config.convert.delete_source);
        assert_eq!(config.analyse.column_order, ColumnOrderPolicy::Ignore);
    }

    #[test]
    fn malformed_yaml_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.yaml");
        std::fs::write(&path, "fetch: [this is not a map").unwrap();

        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_config_file_is_configuration_error() {
        let err = PipelineConfig::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn zero_workers_rejected_only_when_multithreaded() {
        let mut config = PipelineConfig::default();
        config.fetch.workers = 0;
        config.fetch.multithread = false;
        assert!(config.validate().is_ok());

        config.fetch.multithread = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_chunk_rows_rejected() {
        let mut config = PipelineConfig::default();
        config.convert.chunk_rows = Some(0);
        assert!(config.validate().is_err());

        config.convert.chunk_rows = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_glob_rule_rejected() {
        let mut config = PipelineConfig::default();
        config
            .analyse
            .rules
            .insert(Category::Dietary, vec!["DR[1*".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn effective_workers_is_one_when_sequential() {
        let mut fetch = FetchConfig::default();
        fetch.workers = 8;
        assert_eq!(fetch.effective_workers(), 1);
        fetch.multithread = true;
        assert_eq!(fetch.effective_workers(), 8);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            jitter: false,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 1_000,
            jitter: true,
        };
        for _ in 0..50 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(1_100));
        }
    }

    #[test]
    fn inverted_backoff_bounds_rejected() {
        let mut config = PipelineConfig::default();
        config.fetch.retry.initial_backoff_ms = 5_000;
        config.fetch.retry.max_backoff_ms = 100;
        assert!(config.validate().is_err());
    }
}
