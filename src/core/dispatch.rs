//! Bounded-parallel execution of per-row operations.
//!
//! Every submitted row yields exactly one ExecutionResult, failures
//! included, and results come back sorted by row number regardless of
//! completion order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::domain::model::{ApiCallRequest, ExecutionResult};

/// Results of one dispatch pass, one entry per submitted row.
#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<ExecutionResult>,
}

impl BatchReport {
    pub fn failed_rows(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.row_number)
            .collect()
    }

    pub fn successes(&self) -> Vec<&ApiCallRequest> {
        self.results
            .iter()
            .filter_map(|r| r.data.as_ref())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    max_workers: usize,
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for BatchDispatcher {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl BatchDispatcher {
    pub fn new(max_workers: usize, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_workers: max_workers.max(1),
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    pub fn with_workers(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            ..Self::default()
        }
    }

    /// Run `op` for every `(row_number, item)` pair with at most
    /// `max_workers` in flight. A panicking task is recorded as a failed
    /// result for its row, never dropped.
    pub async fn dispatch<T, F, Fut>(&self, items: Vec<(usize, T)>, op: F) -> BatchReport
    where
        T: Clone + Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<ApiCallRequest, String>> + Send + 'static,
    {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let max_retries = self.max_retries;
        let retry_delay = self.retry_delay;

        let mut handles: Vec<(usize, JoinHandle<ExecutionResult>)> = Vec::with_capacity(total);
        for (row_number, item) in items {
            let semaphore = Arc::clone(&semaphore);
            let op = op.clone();
            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return ExecutionResult::failed(row_number, "dispatcher shut down");
                    }
                };
                run_with_retries(row_number, item, op, max_retries, retry_delay).await
            });
            handles.push((row_number, handle));
        }

        let mut results = Vec::with_capacity(total);
        for (row_number, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(row = row_number, "worker task panicked: {}", e);
                    results.push(ExecutionResult::failed(
                        row_number,
                        format!("task panicked: {}", e),
                    ));
                }
            }
        }

        results.sort_by_key(|r| r.row_number);
        let failures = results.iter().filter(|r| !r.success).count();
        tracing::info!(total, failures, "batch dispatch complete");
        BatchReport { results }
    }
}

async fn run_with_retries<T, F, Fut>(
    row_number: usize,
    item: T,
    op: F,
    max_retries: u32,
    retry_delay: Duration,
) -> ExecutionResult
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = std::result::Result<ApiCallRequest, String>>,
{
    let mut last_error = String::new();
    for attempt in 1..=max_retries {
        match op(item.clone()).await {
            Ok(call) => return ExecutionResult::ok(row_number, call),
            Err(e) => {
                tracing::warn!(row = row_number, attempt, error = %e, "row attempt failed");
                last_error = e;
            }
        }
        if attempt < max_retries {
            // Linear backoff: delay, 2*delay, ...
            tokio::time::sleep(retry_delay * attempt).await;
        }
    }
    ExecutionResult::failed(row_number, last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::FunctionType;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher() -> BatchDispatcher {
        BatchDispatcher::new(4, 3, Duration::from_millis(1))
    }

    fn dummy_call() -> ApiCallRequest {
        ApiCallRequest::new(FunctionType::ListChains, Map::new())
    }

    #[tokio::test]
    async fn one_result_per_row_sorted_by_row_number() {
        let items: Vec<(usize, u64)> = vec![(3, 30), (1, 5), (2, 15)];
        let results = dispatcher()
            .dispatch(items, |delay_ms| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(dummy_call())
            })
            .await
            .results;

        assert_eq!(results.len(), 3);
        let rows: Vec<usize> = results.iter().map(|r| r.row_number).collect();
        assert_eq!(rows, vec![1, 2, 3]);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn failing_row_does_not_poison_the_batch() {
        let items: Vec<(usize, bool)> = vec![(1, true), (2, false), (3, true)];
        let results = dispatcher()
            .dispatch(items, |ok| async move {
                if ok {
                    Ok(dummy_call())
                } else {
                    Err("no tx_hash in row".to_string())
                }
            })
            .await
            .results;

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].error.as_deref(), Some("no tx_hash in row"));
        assert!(results[1].data.is_none());
        assert!(results[2].success);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let results = dispatcher()
            .dispatch(vec![(1, ())], move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(dummy_call())
                    }
                }
            })
            .await
            .results;

        assert!(results[0].success);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reports_last_error_after_exhausting_retries() {
        let results = dispatcher()
            .dispatch(vec![(7, ())], |_| async move {
                Err::<ApiCallRequest, _>("generation failed".to_string())
            })
            .await
            .results;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].row_number, 7);
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("generation failed"));
    }

    #[tokio::test]
    async fn concurrency_stays_within_the_worker_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<(usize, ())> = (1..=8).map(|n| (n, ())).collect();

        let in_flight_ref = Arc::clone(&in_flight);
        let peak_ref = Arc::clone(&peak);
        let results = BatchDispatcher::new(2, 1, Duration::ZERO)
            .dispatch(items, move |_| {
                let in_flight = Arc::clone(&in_flight_ref);
                let peak = Arc::clone(&peak_ref);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(dummy_call())
                }
            })
            .await
            .results;

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panicking_task_is_recorded_not_dropped() {
        let results = dispatcher()
            .dispatch(vec![(1, true), (2, false)], |explode| async move {
                if explode {
                    panic!("boom");
                }
                Ok(dummy_call())
            })
            .await
            .results;

        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("panicked"));
        assert!(results[1].success);
    }
}
