//! Keyed in-process locks.
//!
//! Each key maps to its own async mutex, so operations on one user queue
//! behind each other while operations on other users run in parallel. Entries
//! are held weakly and pruned once no guard or waiter references them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct RecordLocks {
    entries: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

/// Held lock on one key. Released on drop.
#[derive(Debug)]
pub struct RecordGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl RecordGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_key(id: Uuid) -> String {
        format!("user:{id}")
    }

    pub fn email_key(email: &str) -> String {
        format!("email:{email}")
    }

    pub async fn acquire(&self, key: impl Into<String>) -> RecordGuard {
        let key = key.into();
        let lock = self.entry(&key);

        trace!(%key, "waiting for record lock");
        let guard = lock.lock_owned().await;
        RecordGuard { key, _guard: guard }
    }

    /// Number of keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.len()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = entries.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        let lock = Arc::new(AsyncMutex::new(()));
        entries.insert(key.to_string(), Arc::downgrade(&lock));
        lock
    }
}
