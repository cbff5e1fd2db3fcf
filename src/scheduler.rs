//! Bounded worker scheduling for batch stages.
//!
//! Fetch and convert run one unit of work per file. The scheduler caps how many
//! of those units are in flight at once; with a single slot the batch degrades
//! to strictly sequential processing.
//!
//! # Usage
//!
//! ```ignore
//! let scheduler = WorkerScheduler::new(4)?;
//! let results = scheduler
//!     .run_all(files, |file| file.path.clone(), |file| async move { convert(file).await })
//!     .await;
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::error;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// WorkerScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Limits the number of concurrently running units of work.
///
/// Permits release their slot on drop.
#[derive(Clone)]
pub struct WorkerScheduler {
    sem: Arc<Semaphore>,
    max: usize,
}

impl WorkerScheduler {
    /// Creates a scheduler with `max_concurrent` slots.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Configuration` if `max_concurrent` is 0.
    pub fn new(max_concurrent: usize) -> Result<Self, AppError> {
        if max_concurrent == 0 {
            return Err(AppError::Configuration(
                "worker count must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            sem: Arc::new(Semaphore::new(max_concurrent)),
            max: max_concurrent,
        })
    }

    /// Acquires a slot, waiting while all slots are in use.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AppError> {
        self.sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AppError::Internal(format!("Worker scheduler closed: {}", e)))
    }

    /// Runs `job` once per item with at most `max_concurrent` jobs in flight.
    ///
    /// Each result is paired with the key `label` computed for its item, so a
    /// job that panics is still attributable: it comes back as
    /// `AppError::Internal` under its key and does not stop the others.
    ///
    /// With a single slot the items run in order on the calling task. Otherwise
    /// results come back in completion order.
    pub async fn run_all<T, K, L, F, Fut, R>(
        &self,
        items: Vec<T>,
        label: L,
        job: F,
    ) -> Vec<(K, Result<R, AppError>)>
    where
        T: Send + 'static,
        K: Send + 'static,
        L: Fn(&T) -> K,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        if self.max == 1 {
            let mut results = Vec::with_capacity(items.len());
            for item in items {
                let key = label(&item);
                results.push((key, guarded(job(item)).await));
            }
            return results;
        }

        let job = Arc::new(job);
        let mut tasks = JoinSet::new();

        for item in items {
            let key = label(&item);
            let scheduler = self.clone();
            let job = job.clone();
            tasks.spawn(async move {
                let result = match scheduler.acquire().await {
                    Ok(_permit) => guarded(job(item)).await,
                    Err(e) => Err(e),
                };
                (key, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(keyed) => results.push(keyed),
                // Only reachable if the runtime shuts down mid-batch.
                Err(e) => error!(error = %e, "Worker task was cancelled"),
            }
        }
        results
    }
}

/// Awaits `fut`, turning a panic into `AppError::Internal`.
async fn guarded<R>(fut: impl Future<Output = R>) -> Result<R, AppError> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(error = %message, "Worker panicked");
        AppError::Internal(format!("Worker task failed: {}", message))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_new_rejects_zero() {
        let err = WorkerScheduler::new(0).err().expect("zero slots should fail");
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_acquire_blocks_when_full() {
        let scheduler = WorkerScheduler::new(1).unwrap();
        let permit1 = scheduler.acquire().await.unwrap();

        let scheduler_clone = scheduler.clone();
        let handle = tokio::spawn(async move { scheduler_clone.acquire().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished(), "Acquire task should still be blocked");

        drop(permit1);

        let result = timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "Acquire should complete after slot is freed");
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_run_all_never_exceeds_capacity() {
        let scheduler = WorkerScheduler::new(3).unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (in_flight_job, peak_job) = (in_flight.clone(), peak.clone());
        let results = scheduler
            .run_all((0..20).collect(), |n: &u32| *n, move |n: u32| {
                let in_flight = in_flight_job.clone();
                let peak = peak_job.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    n * 2
                }
            })
            .await;

        assert_eq!(results.len(), 20);
        for (n, result) in results {
            assert_eq!(result.unwrap(), n * 2);
        }
        assert!(peak.load(Ordering::SeqCst) <= 3, "At most 3 jobs may overlap");
    }

    #[tokio::test]
    async fn test_run_all_single_slot_runs_in_item_order() {
        let scheduler = WorkerScheduler::new(1).unwrap();
        let started = Arc::new(std::sync::Mutex::new(Vec::new()));

        let started_job = started.clone();
        let results = scheduler
            .run_all(vec![5u64, 1, 4, 2, 3], |n| *n, move |n| {
                let started = started_job.clone();
                async move {
                    started.lock().unwrap().push(n);
                    // Later items finish sooner; order must still hold.
                    tokio::time::sleep(Duration::from_millis(n)).await;
                    n
                }
            })
            .await;

        assert_eq!(*started.lock().unwrap(), vec![5, 1, 4, 2, 3]);
        let keys: Vec<u64> = results.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![5, 1, 4, 2, 3]);
    }

    #[tokio::test]
    async fn test_run_all_reports_panicking_job_under_its_key() {
        for workers in [1, 2] {
            let scheduler = WorkerScheduler::new(workers).unwrap();
            let results = scheduler
                .run_all(vec![1u32, 2, 3], |n| format!("item-{}", n), |n| async move {
                    if n == 2 {
                        panic!("boom");
                    }
                    n
                })
                .await;

            assert_eq!(results.len(), 3);
            let failed: Vec<&String> = results
                .iter()
                .filter(|(_, r)| r.is_err())
                .map(|(k, _)| k)
                .collect();
            assert_eq!(failed, vec!["item-2"], "Only the panicking job should fail");
            let err = results.iter().find_map(|(_, r)| r.as_ref().err()).unwrap();
            assert_eq!(err.kind(), "internal");
            assert!(err.to_string().contains("boom"));
        }
    }
}
