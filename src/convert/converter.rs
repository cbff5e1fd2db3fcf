//! Batch XPT to CSV conversion over a mirrored directory tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::config::ConvertConfig;
use crate::error::AppError;
use crate::scheduler::WorkerScheduler;
use crate::storage::{collect_files, mirror_path, FailureLog, FileStage, PipelineStage};
use crate::streaming::AtomicCsvWriter;
use crate::xport::{Value, XptReader};

use super::mapping::ColumnMapping;

/// Result of a conversion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConvertReport {
    pub converted: usize,
    pub rows: u64,
    /// Sources left in place because they could not be converted.
    pub failed: Vec<PathBuf>,
}

/// One converted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedFile {
    pub source: PathBuf,
    pub output: PathBuf,
    pub rows: u64,
}

/// Converts every transport file under the input root.
#[derive(Clone)]
pub struct Converter {
    config: Arc<ConvertConfig>,
    mapping: Option<Arc<ColumnMapping>>,
    failures: Arc<FailureLog>,
}

impl Converter {
    /// Builds a converter, loading the column mappings when renaming is on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Configuration` if the mapping tables cannot be loaded.
    pub fn new(config: ConvertConfig, failures: Arc<FailureLog>) -> Result<Self, AppError> {
        let mapping = if config.rename_columns {
            Some(Arc::new(ColumnMapping::load(config.mapping_root())?))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            mapping,
            failures,
        })
    }

    /// Converts all `*.xpt` files under `input_dir`.
    ///
    /// Files that fail are logged and left in place; only configuration
    /// problems are returned as errors.
    pub async fn convert_all(&self) -> Result<ConvertReport, AppError> {
        let exclude = vec![self.config.output_dir.clone()];
        let sources = collect_files(&self.config.input_dir, FileStage::RawBinary, &exclude)?;
        info!(
            files = sources.len(),
            input = %self.config.input_dir.display(),
            output = %self.config.output_dir.display(),
            "Converting"
        );

        let scheduler = WorkerScheduler::new(self.config.effective_workers())?;
        let converter = self.clone();
        let results = scheduler
            .run_all(
                sources,
                |file| file.path.clone(),
                move |file| {
                    let converter = converter.clone();
                    async move {
                        let joined =
                            tokio::task::spawn_blocking(move || converter.convert_file(&file.path))
                                .await;
                        joined.unwrap_or_else(|e| {
                            Err(AppError::Internal(format!("Conversion task failed: {}", e)))
                        })
                    }
                },
            )
            .await;

        let mut report = ConvertReport::default();
        for (source, result) in results {
            match result.and_then(|converted| converted) {
                Ok(converted) => {
                    report.converted += 1;
                    report.rows += converted.rows;
                }
                Err(e) => {
                    warn!(path = %source.display(), error = %e, "Conversion failed");
                    self.failures.record(
                        PipelineStage::Convert,
                        source.display().to_string(),
                        Category::from_path(&source),
                        &e,
                        1,
                    );
                    report.failed.push(source);
                }
            }
        }
        report.failed.sort();

        info!(
            converted = report.converted,
            rows = report.rows,
            failed = report.failed.len(),
            "Conversion finished"
        );
        Ok(report)
    }

    /// Converts one file, then deletes the source if configured to.
    ///
    /// Blocking; run it on the blocking pool.
    pub fn convert_file(&self, source: &Path) -> Result<ConvertedFile, AppError> {
        let output = mirror_path(
            source,
            &self.config.input_dir,
            &self.config.output_dir,
            FileStage::ConvertedText.extension(),
        );

        let mut reader = XptReader::open(source).map_err(|e| e.at(source))?;
        let columns = reader.column_names();
        let header = match &self.mapping {
            Some(mapping) => mapping.rename_all(Category::from_path(source), &columns),
            None => columns,
        };
        debug!(
            path = %source.display(),
            dataset = reader.dataset_name(),
            label = reader.dataset_label(),
            columns = header.len(),
            "Read transport header"
        );

        let mut writer = AtomicCsvWriter::new(&output)?;
        writer.write_header(&header)?;

        match self.config.chunk_rows {
            Some(chunk) => loop {
                let rows = reader.read_chunk(chunk).map_err(|e| e.at(source))?;
                if rows.is_empty() {
                    break;
                }
                write_rows(&mut writer, &rows)?;
                writer.flush()?;
            },
            None => {
                let rows = reader.read_all().map_err(|e| e.at(source))?;
                write_rows(&mut writer, &rows)?;
            }
        }

        let rows = writer.finish()?;
        info!(source = %source.display(), output = %output.display(), rows, "Converted");

        if self.config.delete_source {
            if let Err(e) = std::fs::remove_file(source) {
                let err = AppError::fs(source, e);
                warn!(path = %source.display(), error = %err, "Could not delete converted source");
                self.failures.record(
                    PipelineStage::Convert,
                    source.display().to_string(),
                    Category::from_path(source),
                    &err,
                    1,
                );
            }
        }

        Ok(ConvertedFile {
            source: source.to_path_buf(),
            output,
            rows,
        })
    }
}

fn write_rows(writer: &mut AtomicCsvWriter, rows: &[Vec<Value>]) -> Result<(), AppError> {
    for row in rows {
        writer.write_row(row.iter().map(Value::to_field))?;
    }
    Ok(())
}
