use super::interface::{ModelHandle, TtsBackend, TtsError};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Process-wide cache of loaded backend models, keyed by `(backend, language)`.
///
/// Lifecycle: a model is loaded on first use and kept for the lifetime of
/// the cache. Concurrent first requests for the same key share a single
/// in-flight load and all observe its result, success or failure. A failed
/// load leaves the key empty so the next caller retries.
///
/// There is no eviction. Model handles are assumed to fit in memory for the
/// configured language set; `len()` is there to watch growth if that set
/// gets large enough to need an LRU bound.
pub struct ModelCache {
    slots: Mutex<HashMap<ModelKey, Slot>>,
    next_generation: AtomicU64,
    loads_started: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModelKey {
    pub backend_id: String,
    pub language: String,
}

impl ModelKey {
    pub fn new(backend_id: &str, language: &str) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            language: language.to_string(),
        }
    }
}

type LoadFuture = Shared<BoxFuture<'static, Result<ModelHandle, TtsError>>>;

enum Slot {
    Ready(ModelHandle),
    Loading { generation: u64, load: LoadFuture },
}

impl ModelCache {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            loads_started: AtomicU64::new(0),
        }
    }

    /// Get the model for `language` from `backend`, loading it if needed.
    pub async fn get_or_create(
        &self,
        backend: &Arc<dyn TtsBackend>,
        language: &str,
    ) -> Result<ModelHandle, TtsError> {
        let loader = Arc::clone(backend);
        let lang = language.to_string();
        self.get_or_init(&backend.descriptor().id, language, move || async move {
            loader.load_model(&lang).await
        })
        .await
    }

    /// Get the cached handle for a key or run `init` to produce it.
    ///
    /// `init` is only invoked when no load for the key is ready or in flight.
    pub async fn get_or_init<F, Fut>(
        &self,
        backend_id: &str,
        language: &str,
        init: F,
    ) -> Result<ModelHandle, TtsError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ModelHandle, TtsError>> + Send + 'static,
    {
        let key = ModelKey::new(backend_id, language);

        let (generation, load) = {
            let mut slots = self.slots.lock().await;
            match slots.get(&key) {
                Some(Slot::Ready(handle)) => return Ok(handle.clone()),
                Some(Slot::Loading { generation, load }) => (*generation, load.clone()),
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    self.loads_started.fetch_add(1, Ordering::Relaxed);
                    info!(target: "tts", backend = backend_id, language, "Loading model");

                    let backend = key.backend_id.clone();
                    let lang = key.language.clone();
                    let fut = init();
                    let load = async move {
                        // A panicking loader must settle the slot like any other failure.
                        let outcome = AssertUnwindSafe(fut)
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                Err(TtsError::Internal("model loader panicked".into()))
                            });
                        outcome.map_err(|e| match e {
                            TtsError::ModelLoad { .. } => e,
                            other => TtsError::ModelLoad {
                                backend,
                                language: lang,
                                cause: other.to_string(),
                            },
                        })
                    }
                    .boxed()
                    .shared();

                    slots.insert(
                        key.clone(),
                        Slot::Loading {
                            generation,
                            load: load.clone(),
                        },
                    );
                    (generation, load)
                }
            }
        };

        let result = load.await;

        // The first waiter to come back settles the slot; the generation check
        // keeps a late waiter from clobbering a newer load for the same key.
        let mut slots = self.slots.lock().await;
        if let Some(Slot::Loading {
            generation: current,
            ..
        }) = slots.get(&key)
        {
            if *current == generation {
                match &result {
                    Ok(handle) => {
                        info!(
                            target: "tts",
                            backend = %key.backend_id,
                            language = %key.language,
                            model = %handle.model_name,
                            "Model loaded"
                        );
                        slots.insert(key, Slot::Ready(handle.clone()));
                    }
                    Err(e) => {
                        warn!(target: "tts", error = %e, "Model load failed, key left retryable");
                        slots.remove(&key);
                    }
                }
            }
        }

        result
    }

    /// Put an already-built handle into the cache, replacing whatever was there.
    pub async fn insert(&self, handle: ModelHandle) {
        let key = ModelKey::new(&handle.backend_id, &handle.language);
        self.slots.lock().await.insert(key, Slot::Ready(handle));
    }

    pub async fn is_loaded(&self, backend_id: &str, language: &str) -> bool {
        matches!(
            self.slots
                .lock()
                .await
                .get(&ModelKey::new(backend_id, language)),
            Some(Slot::Ready(_))
        )
    }

    /// Keys with a ready model, sorted.
    pub async fn loaded_keys(&self) -> Vec<ModelKey> {
        let slots = self.slots.lock().await;
        let mut keys: Vec<ModelKey> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of ready models.
    pub async fn len(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total number of load attempts started since creation.
    pub fn loads_started(&self) -> u64 {
        self.loads_started.load(Ordering::Relaxed)
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}
