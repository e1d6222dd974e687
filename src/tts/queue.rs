use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::interface::TtsError;

/// Per-backend concurrency limiter for synthesis calls.
///
/// Each backend gets its own semaphore, so a saturated local model never
/// holds up requests bound for a different backend.
pub struct TtsQueue {
    max_concurrent: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl TtsQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    /// Run `task` once a permit for `backend_id` is available.
    pub async fn run<F, Fut, T>(&self, backend_id: &str, task: F) -> Result<T, TtsError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TtsError>>,
    {
        let semaphore = self.semaphore(backend_id)?;
        let _permit = semaphore
            .acquire_owned()
            .await
            .map_err(|e| TtsError::Internal(format!("Queue error: {}", e)))?;
        task().await
    }

    /// Number of currently free slots for `backend_id`.
    pub fn available_permits(&self, backend_id: &str) -> usize {
        self.semaphore(backend_id)
            .map(|s| s.available_permits())
            .unwrap_or(0)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn semaphore(&self, backend_id: &str) -> Result<Arc<Semaphore>, TtsError> {
        let mut map = self
            .semaphores
            .lock()
            .map_err(|_| TtsError::Internal("queue lock poisoned".into()))?;
        Ok(Arc::clone(
            map.entry(backend_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_concurrent))),
        ))
    }
}
