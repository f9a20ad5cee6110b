//! Lifecycle of the embedding model.
//!
//! The model is loaded on first use and released after an idle period. State
//! moves strictly `Unloaded → Loading → Loaded → Unloaded`; a failed load goes
//! back to `Unloaded`. Callers arriving while a load is in flight wait for it
//! and share its outcome instead of starting a second load.
//!
//! There is no background timer. [`ModelManager::check_idle`] runs when an
//! incoming operation calls it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::error::SearchError;

/// Shared handle to a loaded model. Clones share the same instance.
pub type ModelHandle = Arc<dyn EmbeddingProvider>;

/// Produces a ready-to-use embedding model. Called at most once per load cycle.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> anyhow::Result<ModelHandle>;

    /// Human-readable name for logs and diagnostics.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Loaded,
}

enum ModelState {
    Unloaded,
    Loading,
    Loaded {
        handle: ModelHandle,
        last_used: Instant,
    },
}

struct ManagerState {
    state: ModelState,
    /// Incremented at the start of every load attempt.
    generation: u64,
    last_failure: Option<(u64, String)>,
    loads: u64,
}

pub struct ModelManager {
    loader: Box<dyn ModelLoader>,
    inner: Mutex<ManagerState>,
    ready: Condvar,
}

impl ModelManager {
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            inner: Mutex::new(ManagerState {
                state: ModelState::Unloaded,
                generation: 0,
                last_failure: None,
                loads: 0,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn status(&self) -> ModelStatus {
        match self.inner.lock().state {
            ModelState::Unloaded => ModelStatus::Unloaded,
            ModelState::Loading => ModelStatus::Loading,
            ModelState::Loaded { .. } => ModelStatus::Loaded,
        }
    }

    /// Number of successful loads over the manager's lifetime.
    pub fn loads(&self) -> u64 {
        self.inner.lock().loads
    }

    pub fn describe(&self) -> String {
        self.loader.describe()
    }

    /// Return the loaded model, loading it first if necessary.
    ///
    /// Blocks while another caller's load is in flight and returns that load's
    /// result. A failed load surfaces as [`SearchError::ModelUnavailable`] and is
    /// not retried until the next call.
    pub fn get_model(&self) -> Result<ModelHandle, SearchError> {
        let mut inner = self.inner.lock();
        loop {
            if let ModelState::Loaded { handle, last_used } = &mut inner.state {
                *last_used = Instant::now();
                return Ok(Arc::clone(handle));
            }

            if matches!(inner.state, ModelState::Loading) {
                let awaited = inner.generation;
                while matches!(inner.state, ModelState::Loading) {
                    self.ready.wait(&mut inner);
                }
                if let Some((generation, reason)) = &inner.last_failure {
                    if *generation == awaited {
                        return Err(SearchError::ModelUnavailable(reason.clone()));
                    }
                }
                continue;
            }

            break;
        }

        inner.state = ModelState::Loading;
        inner.generation += 1;
        let generation = inner.generation;
        drop(inner);

        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| self.loader.load()))
            .unwrap_or_else(|_| Err(anyhow::anyhow!("model loader panicked")));

        let mut inner = self.inner.lock();
        let outcome = match result {
            Ok(handle) => {
                inner.state = ModelState::Loaded {
                    handle: Arc::clone(&handle),
                    last_used: Instant::now(),
                };
                inner.loads += 1;
                tracing::info!(
                    model = %self.loader.describe(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "embedding model loaded"
                );
                Ok(handle)
            }
            Err(e) => {
                let reason = format!("{e:#}");
                inner.state = ModelState::Unloaded;
                inner.last_failure = Some((generation, reason.clone()));
                tracing::warn!(
                    model = %self.loader.describe(),
                    error = %reason,
                    "embedding model failed to load"
                );
                Err(SearchError::ModelUnavailable(reason))
            }
        };
        drop(inner);
        self.ready.notify_all();
        outcome
    }

    /// Unload the model if it has not been used for longer than `idle_timeout`.
    /// A zero timeout unloads any loaded model. Returns `true` if it unloaded.
    pub fn check_idle(&self, idle_timeout: Duration) -> bool {
        self.check_idle_at(idle_timeout, Instant::now())
    }

    fn check_idle_at(&self, idle_timeout: Duration, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        let idle_for = match &inner.state {
            ModelState::Loaded { last_used, .. } => now.saturating_duration_since(*last_used),
            _ => return false,
        };
        if !idle_timeout.is_zero() && idle_for <= idle_timeout {
            return false;
        }

        let released = std::mem::replace(&mut inner.state, ModelState::Unloaded);
        drop(inner);
        // the session is dropped outside the lock; it can take a moment
        drop(released);

        tracing::info!(
            model = %self.loader.describe(),
            idle_secs = idle_for.as_secs(),
            "unloaded idle embedding model"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hash::HashEmbeddingProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        fail: bool,
    }

    impl CountingLoader {
        fn new(delay_ms: u64, fail: bool) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: Arc::clone(&calls),
                    delay: Duration::from_millis(delay_ms),
                    fail,
                },
                calls,
            )
        }
    }

    impl ModelLoader for CountingLoader {
        fn load(&self) -> anyhow::Result<ModelHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                anyhow::bail!("model.onnx not found");
            }
            Ok(Arc::new(HashEmbeddingProvider::new(16)))
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    struct PanickingLoader;

    impl ModelLoader for PanickingLoader {
        fn load(&self) -> anyhow::Result<ModelHandle> {
            panic!("corrupt model file");
        }

        fn describe(&self) -> String {
            "panicking".into()
        }
    }

    #[test]
    fn loads_lazily_and_once() {
        let (loader, calls) = CountingLoader::new(0, false);
        let manager = ModelManager::new(Box::new(loader));
        assert_eq!(manager.status(), ModelStatus::Unloaded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let first = manager.get_model().unwrap();
        let second = manager.get_model().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(), ModelStatus::Loaded);
        assert_eq!(manager.loads(), 1);
    }

    #[test]
    fn failed_load_returns_to_unloaded() {
        let (loader, calls) = CountingLoader::new(0, true);
        let manager = ModelManager::new(Box::new(loader));

        let err = manager.get_model().err().unwrap();
        assert!(matches!(err, SearchError::ModelUnavailable(ref r) if r.contains("model.onnx")));
        assert_eq!(manager.status(), ModelStatus::Unloaded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // the next call is a fresh attempt
        assert!(manager.get_model().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_callers_share_one_load() {
        let (loader, calls) = CountingLoader::new(100, false);
        let manager = ModelManager::new(Box::new(loader));

        let handles: Vec<ModelHandle> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| manager.get_model().unwrap()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }

    #[test]
    fn concurrent_callers_share_one_failure() {
        let (loader, calls) = CountingLoader::new(250, true);
        let manager = ModelManager::new(Box::new(loader));

        let failures = std::thread::scope(|s| {
            let workers: Vec<_> = (0..6)
                .map(|_| s.spawn(|| manager.get_model().is_err()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).filter(|failed| *failed).count()
        });

        assert_eq!(failures, 6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_timeout_unloads_after_use() {
        let (loader, calls) = CountingLoader::new(0, false);
        let manager = ModelManager::new(Box::new(loader));

        manager.get_model().unwrap();
        assert!(manager.check_idle(Duration::ZERO));
        assert_eq!(manager.status(), ModelStatus::Unloaded);

        // reloads on next use
        manager.get_model().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn recently_used_model_stays_loaded() {
        let (loader, _) = CountingLoader::new(0, false);
        let manager = ModelManager::new(Box::new(loader));
        manager.get_model().unwrap();

        let now = Instant::now();
        assert!(!manager.check_idle_at(Duration::from_secs(600), now));
        assert_eq!(manager.status(), ModelStatus::Loaded);
        assert!(manager.check_idle_at(Duration::from_secs(600), now + Duration::from_secs(601)));
        assert_eq!(manager.status(), ModelStatus::Unloaded);
    }

    #[test]
    fn idle_check_on_unloaded_model_is_a_no_op() {
        let (loader, calls) = CountingLoader::new(0, false);
        let manager = ModelManager::new(Box::new(loader));
        assert!(!manager.check_idle(Duration::ZERO));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn outstanding_handles_survive_unload() {
        let (loader, _) = CountingLoader::new(0, false);
        let manager = ModelManager::new(Box::new(loader));
        let handle = manager.get_model().unwrap();
        manager.check_idle(Duration::ZERO);
        assert_eq!(handle.embed("still usable").unwrap().len(), 16);
    }

    #[test]
    fn panicking_loader_is_reported_as_unavailable() {
        let manager = ModelManager::new(Box::new(PanickingLoader));
        let err = manager.get_model().err().unwrap();
        assert!(matches!(err, SearchError::ModelUnavailable(_)));
        assert_eq!(manager.status(), ModelStatus::Unloaded);
    }
}
