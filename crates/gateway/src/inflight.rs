//! In-flight request coalescing.
//!
//! A concurrent map from cache key to a shared future of the result. The
//! first caller for a key becomes the leader and starts the work; everyone
//! arriving before completion joins the same future. Work runs on a spawned
//! task, so a joiner (or even the leader) cancelling its own await never
//! aborts the shared computation; the remaining waiters still get the
//! result. The entry is removed on completion, success or failure alike;
//! failures are therefore never sticky and the next caller retries fresh.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use sb_domain::error::{Error, Result};

type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;

pub struct InflightMap<V: Clone> {
    entries: Mutex<HashMap<String, SharedResult<V>>>,
}

impl<V: Clone + Send + Sync + 'static> InflightMap<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Join the in-flight computation for `key`, or start `work` as the new
    /// one. Exactly one `work` future runs per key at a time.
    pub async fn join_or_run<F>(self: &Arc<Self>, key: &str, work: F) -> Result<V>
    where
        F: Future<Output = Result<V>> + Send + 'static,
    {
        let shared = {
            let mut entries = self.entries.lock();
            if let Some(existing) = entries.get(key) {
                tracing::debug!(key = %key, "joining in-flight request");
                existing.clone()
            } else {
                let map = Arc::clone(self);
                let owned_key = key.to_string();
                let handle = tokio::spawn(work);
                let shared = async move {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(join_error) if join_error.is_cancelled() => Err(Error::Cancelled),
                        Err(join_error) => {
                            Err(Error::InvalidResponse(format!("request task failed: {join_error}")))
                        }
                    };
                    map.remove(&owned_key);
                    result
                }
                .boxed()
                .shared();
                entries.insert(key.to_string(), shared.clone());
                shared
            }
        };
        shared.await
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Number of keys currently in flight.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
