//! Validated per-run state shared by the stage commands.

use std::sync::Arc;

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::AppError;
use crate::storage::FailureLog;

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline State
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a stage command needs: the final configuration and the run's
/// failure log.
pub struct PipelineState {
    pub config: PipelineConfig,
    pub failures: Arc<FailureLog>,
}

impl PipelineState {
    /// Validates `config` and opens the failure log in its work directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Configuration` if the configuration is invalid or
    /// the work directory cannot be prepared.
    pub fn new(config: PipelineConfig) -> Result<Self, AppError> {
        config.validate()?;

        std::fs::create_dir_all(&config.work_dir).map_err(|e| {
            AppError::Configuration(format!(
                "Cannot create work directory {}: {}",
                config.work_dir.display(),
                e
            ))
        })?;
        let failures = FailureLog::open(config.failure_log_path())
            .map_err(|e| AppError::Configuration(format!("Cannot open failure log: {}", e)))?;
        info!(
            run_id = %failures.run_id(),
            failure_log = %failures.path().display(),
            "Pipeline state ready"
        );

        Ok(Self {
            config,
            failures: Arc::new(failures),
        })
    }
}
