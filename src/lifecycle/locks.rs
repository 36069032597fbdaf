//! Per-request lock registry.
//!
//! Commands on the same request run one at a time; commands on different
//! requests never contend. Waiting is bounded by a timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::EngineError;

use super::model::RequestId;

/// Idle entries are swept once the map grows past this size.
const SWEEP_THRESHOLD: usize = 1024;

/// Guard held for the duration of a single-request critical section.
pub type RequestGuard = OwnedMutexGuard<()>;

pub struct RequestLocks {
    locks: Mutex<HashMap<RequestId, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
}

impl RequestLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the lock for `id`, or fail with `ConcurrentModification`
    /// once the timeout elapses.
    pub async fn acquire(&self, id: RequestId) -> Result<RequestGuard, EngineError> {
        let lock = self.entry(id);
        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                debug!(request_id = %id, timeout = ?self.timeout, "Request lock timed out");
                Err(EngineError::lock_timeout(id, self.timeout))
            }
        }
    }

    /// Number of tracked request locks.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: RequestId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.map();
        if locks.len() >= SWEEP_THRESHOLD {
            // Only the map holds an idle lock.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry(id).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, Arc<AsyncMutex<()>>>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
