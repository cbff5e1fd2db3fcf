//! Batch retrieval of listed files into the partitioned raw tree.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::category::Category;
use crate::config::FetchConfig;
use crate::error::AppError;
use crate::scheduler::WorkerScheduler;
use crate::storage::{part_path, FailureLog, PipelineStage};

use super::client::RemoteSource;
use super::listing::{listing_path, read_listing, write_url_list, SourceRecord};
use super::retry::retry_transient;

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded { bytes: u64 },
    Skipped,
    Failed,
}

/// Counters for one category batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub bytes: u64,
    /// URLs that could not be retrieved; also written to the pending listing.
    pub failed: Vec<String>,
}

/// Result of a fetch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub categories: BTreeMap<Category, CategoryReport>,
}

impl FetchReport {
    pub fn total_failed(&self) -> usize {
        self.categories.values().map(|c| c.failed.len()).sum()
    }

    pub fn total_downloaded(&self) -> usize {
        self.categories.values().map(|c| c.downloaded).sum()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetcher
// ─────────────────────────────────────────────────────────────────────────────

/// Downloads listed records, one worker slot per file.
#[derive(Clone)]
pub struct Fetcher {
    config: Arc<FetchConfig>,
    source: Arc<dyn RemoteSource>,
    failures: Arc<FailureLog>,
}

impl Fetcher {
    pub fn new(config: FetchConfig, source: Arc<dyn RemoteSource>, failures: Arc<FailureLog>) -> Self {
        Self {
            config: Arc::new(config),
            source,
            failures,
        }
    }

    /// Fetches every record listed for `categories`, one category at a time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Configuration` if a selected category has no
    /// listing file or the worker count is invalid. Per-file failures are
    /// reported, never returned.
    pub async fn fetch(&self, categories: &[Category]) -> Result<FetchReport, AppError> {
        let mut listings = Vec::with_capacity(categories.len());
        for &category in categories {
            listings.push((category, read_listing(&self.config.listing_dir, category)?));
        }

        let mut report = FetchReport::default();
        for (category, records) in listings {
            let category_report = self.fetch_records(category, records).await?;
            report.categories.insert(category, category_report);
        }
        Ok(report)
    }

    /// Fetches one category batch and checkpoints its failed URLs.
    pub async fn fetch_records(
        &self,
        category: Category,
        records: Vec<SourceRecord>,
    ) -> Result<CategoryReport, AppError> {
        let records = unique_destinations(records, &self.config.output_dir);
        info!(%category, records = records.len(), "Fetching category");

        let scheduler = WorkerScheduler::new(self.config.effective_workers())?;
        let fetcher = self.clone();
        let results = scheduler
            .run_all(
                records,
                |record| (record.url.clone(), record.category),
                move |record| {
                    let fetcher = fetcher.clone();
                    async move { fetcher.fetch_one(&record).await }
                },
            )
            .await;

        let mut report = CategoryReport::default();
        let mut failed_urls: Vec<Url> = Vec::new();
        for ((url, record_category), result) in results {
            match result {
                Ok(FetchOutcome::Downloaded { bytes }) => {
                    report.downloaded += 1;
                    report.bytes += bytes;
                }
                Ok(FetchOutcome::Skipped) => report.skipped += 1,
                Ok(FetchOutcome::Failed) => failed_urls.push(url),
                Err(e) => {
                    warn!(url = %url, error = %e, "Fetch worker failed");
                    self.failures.record(
                        PipelineStage::Fetch,
                        url.as_str(),
                        Some(record_category),
                        &e,
                        1,
                    );
                    failed_urls.push(url);
                }
            }
        }
        failed_urls.sort();

        let pending = listing_path(&self.config.pending_dir, category);
        if let Err(e) = write_url_list(&pending, &failed_urls) {
            warn!(path = %pending.display(), error = %e, "Failed to write pending listing");
        }

        report.failed = failed_urls.into_iter().map(String::from).collect();
        info!(
            %category,
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Category fetch finished"
        );
        Ok(report)
    }

    /// Retrieves a single record, skipping it if already present.
    pub async fn fetch_one(&self, record: &SourceRecord) -> FetchOutcome {
        let dest = record.destination(&self.config.output_dir);

        if dest.is_file() {
            if !self.config.verify_size || self.local_matches_remote(record, &dest).await {
                debug!(path = %dest.display(), "Already present, skipping");
                return FetchOutcome::Skipped;
            }
            info!(path = %dest.display(), "Local size differs from remote, downloading again");
        }

        let part = part_path(&dest);
        let target = record.url.as_str();
        let outcome = retry_transient(&self.config.retry, target, || {
            self.source.download_to(&record.url, &part)
        })
        .await;

        let result = match outcome.result {
            Ok(bytes) => tokio::fs::rename(&part, &dest)
                .await
                .map(|_| bytes)
                .map_err(|e| AppError::fs(&dest, e)),
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => {
                info!(url = target, path = %dest.display(), bytes, "Downloaded");
                FetchOutcome::Downloaded { bytes }
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                warn!(url = target, attempts = outcome.attempts, error = %e, "Download failed");
                self.failures.record(
                    PipelineStage::Fetch,
                    target,
                    Some(record.category),
                    &e,
                    outcome.attempts,
                );
                FetchOutcome::Failed
            }
        }
    }

    /// Compares the local size with the remote `Content-Length`.
    ///
    /// An unknown remote size, or a failed size request, counts as a match.
    async fn local_matches_remote(&self, record: &SourceRecord, dest: &Path) -> bool {
        let local = match tokio::fs::metadata(dest).await {
            Ok(meta) => meta.len(),
            Err(_) => return false,
        };

        let remote = retry_transient(&self.config.retry, record.url.as_str(), || {
            self.source.content_length(&record.url)
        })
        .await;

        match remote.result {
            Ok(Some(remote)) => remote == local,
            Ok(None) => true,
            Err(e) => {
                warn!(url = %record.url, error = %e, "Size check failed, keeping local file");
                true
            }
        }
    }
}

/// Keeps the first record for each destination path so no two workers
/// ever write the same file.
fn unique_destinations(records: Vec<SourceRecord>, output_dir: &Path) -> Vec<SourceRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| {
            let dest = record.destination(output_dir);
            let first = seen.insert(dest.clone());
            if !first {
                warn!(url = %record.url, path = %dest.display(), "Duplicate destination, dropping record");
            }
            first
        })
        .collect()
}
