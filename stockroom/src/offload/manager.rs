//! Keyed background task runner.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use smol_str::SmolStr;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use crate::CacheKey;

use super::policy::{OffloadConfig, TimeoutPolicy};

/// Identifies a background task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OffloadKey {
    /// Refresh of a cache entry. At most one runs per key when
    /// deduplication is on.
    Cache(CacheKey),
    /// Any other task, numbered within its kind.
    Generated {
        /// Kind of task, used as the metrics label (e.g. `"warmup"`).
        kind: SmolStr,
        /// Sequence number.
        id: u64,
    },
}

impl OffloadKey {
    /// Label value for metrics: `"cache"` or the task kind.
    pub fn key_type(&self) -> SmolStr {
        match self {
            OffloadKey::Cache(_) => SmolStr::new_static("cache"),
            OffloadKey::Generated { kind, .. } => kind.clone(),
        }
    }
}

impl From<CacheKey> for OffloadKey {
    fn from(key: CacheKey) -> Self {
        OffloadKey::Cache(key)
    }
}

/// A tracked background task.
#[derive(Debug)]
pub struct OffloadHandle {
    id: u64,
    handle: JoinHandle<()>,
}

impl OffloadHandle {
    /// Whether the task has completed, been cancelled or panicked.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the task.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
struct Tasks {
    config: OffloadConfig,
    running: DashMap<OffloadKey, OffloadHandle>,
    sequence: AtomicU64,
}

/// Runs tasks on the tokio runtime outside of any request.
///
/// Used by [`RequestCache::with_cache`](crate::RequestCache::with_cache) to
/// refresh stale entries. Tasks are tracked by [`OffloadKey`] so that a
/// refresh already running for a cache key is not started twice, and are
/// bounded by the configured [`TimeoutPolicy`]. Clones share the same
/// task table.
#[derive(Clone, Debug)]
pub struct OffloadManager {
    tasks: Arc<Tasks>,
}

impl OffloadManager {
    /// Creates a manager with no tasks.
    pub fn new(config: OffloadConfig) -> Self {
        OffloadManager {
            tasks: Arc::new(Tasks {
                config,
                running: DashMap::new(),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// The settings in use.
    pub fn config(&self) -> &OffloadConfig {
        &self.tasks.config
    }

    /// Runs `task` under a fresh key of the given kind and returns that key.
    pub fn spawn<F>(&self, kind: impl Into<SmolStr>, task: F) -> OffloadKey
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = OffloadKey::Generated {
            kind: kind.into(),
            id: self.next_id(),
        };
        self.spawn_with_key(key.clone(), task);
        key
    }

    /// Runs `task` under `key`.
    ///
    /// Returns `false`, without running `task`, when deduplication is on,
    /// `key` is a cache key, and a task for it is still running.
    pub fn spawn_with_key<K, F>(&self, key: K, task: F) -> bool
    where
        K: Into<OffloadKey>,
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let dedup = self.tasks.config.deduplicate && matches!(key, OffloadKey::Cache(_));

        match self.tasks.running.entry(key.clone()) {
            Entry::Occupied(running) if dedup && !running.get().is_finished() => {
                debug!(?key, "background task already running, skipped");
                record_deduplicated(&key);
                false
            }
            slot => {
                record_spawned(&key);
                let handle = self.start(key, task);
                slot.insert(handle);
                true
            }
        }
    }

    /// Number of tracked tasks that have not finished.
    pub fn active_task_count(&self) -> usize {
        self.tasks
            .running
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Whether a task for `key` is running.
    pub fn is_in_flight(&self, key: &OffloadKey) -> bool {
        self.tasks
            .running
            .get(key)
            .is_some_and(|task| !task.is_finished())
    }

    /// Forgets tasks that have finished.
    pub fn cleanup_finished(&self) {
        self.tasks.running.retain(|_, task| !task.is_finished());
    }

    /// Cancels every running task.
    pub fn cancel_all(&self) {
        self.tasks.running.iter().for_each(|task| task.abort());
    }

    /// Resolves once no tracked task is left.
    pub async fn wait_all(&self) {
        loop {
            self.cleanup_finished();
            if self.tasks.running.is_empty() {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    /// [`wait_all`](Self::wait_all) bounded by `timeout`. Returns `false` if
    /// tasks were still running when it passed.
    pub async fn wait_all_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_all()).await.is_ok()
    }

    fn next_id(&self) -> u64 {
        self.tasks.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn start<F>(&self, key: OffloadKey, task: F) -> OffloadHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id();
        let policy = self.tasks.config.timeout_policy;
        let tasks = Arc::clone(&self.tasks);
        let span = info_span!("offload_task", key_type = %key.key_type(), key = ?key);

        let handle = tokio::spawn(
            async move {
                let started = Instant::now();
                let timed_out = run_with_policy(task, policy, &key).await;
                // A newer task may have taken the slot; only clear our own.
                tasks.running.remove_if(&key, |_, task| task.id == id);
                record_finished(&key, started, timed_out);
            }
            .instrument(span),
        );

        OffloadHandle { id, handle }
    }
}

impl Default for OffloadManager {
    fn default() -> Self {
        Self::new(OffloadConfig::default())
    }
}

/// Awaits `task` under `policy`. Returns whether it was cut short.
async fn run_with_policy<F>(task: F, policy: TimeoutPolicy, key: &OffloadKey) -> bool
where
    F: Future<Output = ()>,
{
    match policy {
        TimeoutPolicy::None => {
            task.await;
            false
        }
        TimeoutPolicy::Cancel(limit) => match tokio::time::timeout(limit, task).await {
            Ok(()) => false,
            Err(_) => {
                warn!(?key, limit_ms = limit.as_millis(), "background task cancelled after timeout");
                true
            }
        },
        TimeoutPolicy::Warn(limit) => {
            let started = Instant::now();
            task.await;
            let elapsed = started.elapsed();
            if elapsed > limit {
                warn!(
                    ?key,
                    elapsed_ms = elapsed.as_millis(),
                    limit_ms = limit.as_millis(),
                    "background task exceeded timeout"
                );
            }
            false
        }
    }
}

#[cfg(feature = "metrics")]
fn record_spawned(key: &OffloadKey) {
    use crate::metrics::{OFFLOAD_TASKS_ACTIVE, OFFLOAD_TASKS_SPAWNED};
    let key_type = key.key_type().to_string();
    metrics::counter!(*OFFLOAD_TASKS_SPAWNED, "key_type" => key_type.clone()).increment(1);
    metrics::gauge!(*OFFLOAD_TASKS_ACTIVE, "key_type" => key_type).increment(1.0);
}

#[cfg(feature = "metrics")]
fn record_deduplicated(key: &OffloadKey) {
    use crate::metrics::OFFLOAD_TASKS_DEDUPLICATED;
    metrics::counter!(*OFFLOAD_TASKS_DEDUPLICATED, "key_type" => key.key_type().to_string())
        .increment(1);
}

#[cfg(feature = "metrics")]
fn record_finished(key: &OffloadKey, started: Instant, timed_out: bool) {
    use crate::metrics::{
        OFFLOAD_TASK_DURATION, OFFLOAD_TASKS_ACTIVE, OFFLOAD_TASKS_COMPLETED, OFFLOAD_TASKS_TIMEOUT,
    };
    let key_type = key.key_type().to_string();
    let outcome = if timed_out {
        *OFFLOAD_TASKS_TIMEOUT
    } else {
        *OFFLOAD_TASKS_COMPLETED
    };
    metrics::counter!(outcome, "key_type" => key_type.clone()).increment(1);
    metrics::gauge!(*OFFLOAD_TASKS_ACTIVE, "key_type" => key_type.clone()).decrement(1.0);
    metrics::histogram!(*OFFLOAD_TASK_DURATION, "key_type" => key_type)
        .record(started.elapsed().as_secs_f64());
}

#[cfg(not(feature = "metrics"))]
fn record_spawned(_key: &OffloadKey) {}

#[cfg(not(feature = "metrics"))]
fn record_deduplicated(_key: &OffloadKey) {}

#[cfg(not(feature = "metrics"))]
fn record_finished(_key: &OffloadKey, _started: Instant, _timed_out: bool) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn cache_keyed_tasks_are_deduplicated() {
        let manager = OffloadManager::default();
        let key = CacheKey::from("collections");
        let runs = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let first_runs = runs.clone();
        assert!(manager.spawn_with_key(key.clone(), async move {
            first_runs.fetch_add(1, Ordering::SeqCst);
            let _ = release_rx.await;
        }));

        let second_runs = runs.clone();
        assert!(!manager.spawn_with_key(key.clone(), async move {
            second_runs.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(manager.is_in_flight(&OffloadKey::Cache(key.clone())));

        release_tx.send(()).unwrap();
        assert!(manager.wait_all_timeout(Duration::from_secs(1)).await);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Once finished, the same key may run again.
        let third_runs = runs.clone();
        assert!(manager.spawn_with_key(key, async move {
            third_runs.fetch_add(1, Ordering::SeqCst);
        }));
        manager.wait_all().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn generated_keys_are_never_deduplicated() {
        let manager = OffloadManager::default();
        let a = manager.spawn("warmup", async {});
        let b = manager.spawn("warmup", async {});
        assert_ne!(a, b);
        assert_eq!(a.key_type(), "warmup");
        manager.wait_all().await;
        assert_eq!(manager.active_task_count(), 0);
    }

    #[tokio::test]
    async fn cancel_policy_stops_slow_tasks() {
        let manager = OffloadManager::new(
            OffloadConfig::builder()
                .timeout(Duration::from_millis(10))
                .build(),
        );
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = finished.clone();
        manager.spawn("slow", async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.fetch_add(1, Ordering::SeqCst);
        });

        assert!(manager.wait_all_timeout(Duration::from_secs(1)).await);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
