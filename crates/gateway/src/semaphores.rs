//! Per-provider concurrency limits.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Semaphore;

/// Lazily created `Semaphore` per provider, sized by the user's
/// `concurrencyLimit`. Cleared on configuration save so a new limit takes
/// effect for subsequent requests.
pub struct SemaphoreMap {
    semaphores: RwLock<HashMap<String, Arc<Semaphore>>>,
}

impl SemaphoreMap {
    pub fn new() -> Self {
        Self {
            semaphores: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the semaphore for a provider.
    pub fn for_provider(&self, provider_id: &str, limit: usize) -> Arc<Semaphore> {
        // Fast path: read lock.
        {
            let semaphores = self.semaphores.read();
            if let Some(sem) = semaphores.get(provider_id) {
                return sem.clone();
            }
        }
        // Slow path: write lock to insert.
        let mut semaphores = self.semaphores.write();
        semaphores
            .entry(provider_id.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(limit.max(1))))
            .clone()
    }

    /// Forget all semaphores; the next request recreates them from the
    /// freshly merged config.
    pub fn clear(&self) {
        self.semaphores.write().clear();
    }
}

impl Default for SemaphoreMap {
    fn default() -> Self {
        Self::new()
    }
}
