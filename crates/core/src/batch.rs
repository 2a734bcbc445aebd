//! Batch resolution with bounded concurrency.
//!
//! Resolves many keys through one cache, with at most `max_concurrency`
//! lookups in flight. Lookups run on tokio's blocking pool because the cache
//! does blocking file I/O and `compute` is usually a blocking fetch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::Error;
use crate::cache::{Resolution, UrlCache};

/// Upper limit accepted for `max_concurrency`.
pub const MAX_CONCURRENCY: usize = 64;

/// Batch item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchItemStatus {
    /// Returned from cache.
    Cached,
    /// Computed and stored.
    Computed,
    /// Computed with caching disabled.
    Uncached,
    /// Compute or cache access failed.
    Failed,
}

impl From<Resolution> for BatchItemStatus {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Cached => BatchItemStatus::Cached,
            Resolution::Computed => BatchItemStatus::Computed,
            Resolution::Uncached => BatchItemStatus::Uncached,
        }
    }
}

/// Individual batch result item.
#[derive(Debug)]
pub struct BatchItem<E> {
    /// The key as submitted.
    pub key: String,
    /// Status of this item.
    pub status: BatchItemStatus,
    /// The resolved value, or the error that prevented it.
    pub result: Result<String, E>,
}

/// Batch summary statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Total number of keys processed.
    pub total: u32,
    /// Number of values served from the cache.
    pub cached: u32,
    /// Number of values computed (stored or not).
    pub computed: u32,
    /// Number of failed keys.
    pub failed: u32,
}

/// Results of [`resolve_all`].
#[derive(Debug)]
pub struct BatchOutcome<E> {
    /// Individual results, in input order.
    pub items: Vec<BatchItem<E>>,
    /// Summary statistics.
    pub summary: BatchSummary,
}

/// Resolve every key of `keys` through `cache`, running at most
/// `max_concurrency` lookups at a time.
///
/// Per-key failures are reported in the outcome and never stop the batch.
///
/// # Errors
///
/// Returns `Error::InvalidInput` if `max_concurrency` is 0 or above
/// [`MAX_CONCURRENCY`] or if there are more than `u32::MAX` keys, and
/// `Error::WorkerFailed` if a worker panicked.
pub async fn resolve_all<F, E>(
    cache: &UrlCache, keys: Vec<String>, max_concurrency: usize, compute: F,
) -> Result<BatchOutcome<E>, Error>
where
    F: Fn(&str) -> Result<String, E> + Send + Sync + 'static,
    E: From<Error> + Send + 'static,
{
    if max_concurrency == 0 {
        return Err(Error::InvalidInput("max_concurrency must be at least 1".into()));
    }
    if max_concurrency > MAX_CONCURRENCY {
        return Err(Error::InvalidInput(format!("max_concurrency must not exceed {MAX_CONCURRENCY}")));
    }

    let total = keys.len();
    let total_count = batch_size(total)?;
    let semaphore = Arc::new(Semaphore::new(max_concurrency));
    let compute = Arc::new(compute);
    let mut join_set = JoinSet::new();

    tracing::debug!(total, max_concurrency, "resolving batch");

    for (index, key) in keys.into_iter().enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::WorkerFailed(e.to_string()))?;
        let cache = cache.clone();
        let compute = Arc::clone(&compute);

        join_set.spawn_blocking(move || {
            // NOTE: Hold permit for task duration to enforce concurrency limit
            let _permit = permit;
            let result = cache.resolve_traced(&key, |k| compute(k));
            (index, key, result)
        });
    }

    let mut slots: Vec<Option<BatchItem<E>>> = (0..total).map(|_| None).collect();
    let mut summary = BatchSummary { total: total_count, ..Default::default() };

    while let Some(joined) = join_set.join_next().await {
        let (index, key, result) = joined.map_err(|e| Error::WorkerFailed(e.to_string()))?;

        let item = match result {
            Ok((value, resolution)) => {
                let status = BatchItemStatus::from(resolution);
                match status {
                    BatchItemStatus::Cached => summary.cached += 1,
                    _ => summary.computed += 1,
                }
                BatchItem { key, status, result: Ok(value) }
            }
            Err(e) => {
                summary.failed += 1;
                BatchItem { key, status: BatchItemStatus::Failed, result: Err(e) }
            }
        };
        slots[index] = Some(item);
    }

    tracing::info!(
        total = summary.total,
        cached = summary.cached,
        computed = summary.computed,
        failed = summary.failed,
        "batch resolved"
    );

    Ok(BatchOutcome { items: slots.into_iter().flatten().collect(), summary })
}

fn batch_size(total: usize) -> Result<u32, Error> {
    u32::try_from(total).map_err(|_| Error::InvalidInput(format!("batch of {total} keys exceeds {} keys", u32::MAX)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::test_support::{init_tracing, leaves};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn open(dir: &TempDir, max_node_files: usize, interval: u64) -> UrlCache {
        init_tracing();
        let config = CacheConfig::at(dir.path())
            .with_max_node_files(max_node_files)
            .with_rebalancing_check_interval(interval);
        UrlCache::with_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_all_invalid_concurrency() {
        let cache = UrlCache::disabled();
        let compute = |key: &str| -> Result<String, Error> { Ok(key.to_string()) };

        let zero = resolve_all(&cache, vec!["k".into()], 0, compute).await;
        assert!(matches!(zero, Err(Error::InvalidInput(_))));

        let too_many = resolve_all(&cache, vec!["k".into()], MAX_CONCURRENCY + 1, compute).await;
        assert!(matches!(too_many, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_batch_size_bounds() {
        assert_eq!(batch_size(0).unwrap(), 0);
        assert_eq!(batch_size(u32::MAX as usize).unwrap(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_batch_size_rejects_oversized() {
        let result = batch_size(u32::MAX as usize + 1);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_resolve_all_empty() {
        let cache = UrlCache::disabled();
        let outcome = resolve_all(&cache, Vec::new(), 4, |key: &str| -> Result<String, Error> { Ok(key.into()) })
            .await
            .unwrap();
        assert!(outcome.items.is_empty());
        assert_eq!(outcome.summary, BatchSummary::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_resolve_all_keeps_input_order_and_counts() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);
        cache.put("key-1", "already here").unwrap();

        let keys: Vec<String> = (0..6).map(|i| format!("key-{i}")).collect();
        let outcome = resolve_all(&cache, keys.clone(), 3, |key: &str| -> Result<String, Error> {
            if key == "key-4" {
                return Err(Error::ComputeFailed(format!("rejected {key}")));
            }
            Ok(format!("computed {key}"))
        })
        .await
        .unwrap();

        let returned: Vec<&str> = outcome.items.iter().map(|item| item.key.as_str()).collect();
        assert_eq!(returned, keys.iter().map(String::as_str).collect::<Vec<_>>());

        assert_eq!(outcome.summary, BatchSummary { total: 6, cached: 1, computed: 4, failed: 1 });
        assert_eq!(outcome.items[1].status, BatchItemStatus::Cached);
        assert_eq!(outcome.items[1].result.as_deref().unwrap(), "already here");
        assert_eq!(outcome.items[4].status, BatchItemStatus::Failed);
        assert!(matches!(outcome.items[4].result, Err(Error::ComputeFailed(_))));
        assert!(!cache.contains("key-4").unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_resolve_all_disabled_cache() {
        let cache = UrlCache::disabled();
        let outcome = resolve_all(&cache, vec!["a".into(), "b".into()], 2, |key: &str| -> Result<String, Error> {
            Ok(key.to_uppercase())
        })
        .await
        .unwrap();

        assert!(outcome.items.iter().all(|item| item.status == BatchItemStatus::Uncached));
        assert_eq!(outcome.summary.computed, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resolve_all_worker_panic() {
        let cache = UrlCache::disabled();
        let result = resolve_all(&cache, vec!["boom".into()], 1, |_: &str| -> Result<String, Error> {
            panic!("compute exploded")
        })
        .await;
        assert!(matches!(result, Err(Error::WorkerFailed(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_random_access_multithreaded() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 400, 1000);
        let calls = Arc::new(AtomicUsize::new(0));

        let keys: Vec<String> = (0..10_000).map(|i| i.to_string()).collect();
        let counter = Arc::clone(&calls);
        let outcome = resolve_all(&cache, keys.clone(), 30, move |key: &str| -> Result<String, Error> {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("content for key {key}: {n}"))
        })
        .await
        .unwrap();

        assert_eq!(outcome.summary, BatchSummary { total: 10_000, cached: 0, computed: 10_000, failed: 0 });
        assert_eq!(calls.load(Ordering::SeqCst), 10_000);

        for item in &outcome.items {
            let value = item.result.as_ref().unwrap();
            assert!(value.starts_with(&format!("content for key {}: ", item.key)));
            assert_eq!(&cache.get(&item.key).unwrap(), value);
        }

        for leaf in leaves(dir.path()) {
            assert!(leaf.entries().unwrap().len() <= 400, "{} is overfull", leaf.path.display());
        }
        assert_eq!(cache.audit_records().unwrap().len(), 10_000);

        let again = resolve_all(&cache, keys, 30, |_: &str| -> Result<String, Error> { Ok("recomputed".into()) })
            .await
            .unwrap();
        assert_eq!(again.summary.cached, 10_000);
    }
}
