//! An in-memory session storage backend for `kv_session`, geared towards testing and local development.
use jiff::Timestamp;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;

use kv_session::store::{SessionStorageBackend, errors::StoreError};

#[derive(Clone)]
/// An in-memory session storage backend.
///
/// # Limitations
///
/// This store won't persist data between server restarts.
/// It also won't synchronize data between multiple server instances.
/// It is primarily intended for testing and local development.
pub struct InMemorySessionStore(Arc<Mutex<HashMap<String, StoreEntry>>>);

impl std::fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySessionStore")
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct StoreEntry {
    payload: String,
    deadline: Option<Timestamp>,
}

impl StoreEntry {
    fn is_stale(&self) -> bool {
        self.deadline.is_some_and(|d| d <= Timestamp::now())
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    /// Creates a new (empty) in-memory session store.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(HashMap::new())))
    }

    /// The number of live (i.e. non-expired) entries.
    ///
    /// Expired entries are evicted along the way.
    pub async fn len(&self) -> usize {
        let mut guard = self.0.lock().await;
        Self::purge_stale(&mut guard);
        guard.len()
    }

    fn purge_stale(entries: &mut HashMap<String, StoreEntry>) {
        entries.retain(|_, entry| !entry.is_stale());
    }

    /// `true` if there are no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl SessionStorageBackend for InMemorySessionStore {
    /// Returns the payload stored under `key`, unless it has expired.
    #[tracing::instrument(name = "Load server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut guard = self.0.lock().await;
        let Some(entry) = guard.get(key) else {
            return Ok(None);
        };
        if entry.is_stale() {
            guard.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.payload.clone()))
    }

    /// Overwrites the entry stored under `key`.
    ///
    /// The new entry never expires, until [`expire`](Self::expire) is called.
    #[tracing::instrument(name = "Save server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn set(&self, key: &str, payload: &str) -> Result<(), StoreError> {
        let mut guard = self.0.lock().await;
        Self::purge_stale(&mut guard);
        guard.insert(
            key.to_owned(),
            StoreEntry {
                payload: payload.to_owned(),
                deadline: None,
            },
        );
        Ok(())
    }

    #[tracing::instrument(name = "Delete server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.0.lock().await;
        guard.remove(key);
        Ok(())
    }

    /// Sets the deadline of the entry stored under `key`.
    ///
    /// It does nothing if there is no live entry under `key`.
    #[tracing::instrument(name = "Update TTL for server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut guard = self.0.lock().await;
        if let Some(entry) = guard.get_mut(key) {
            if !entry.is_stale() {
                entry.deadline = Some(Timestamp::now() + ttl);
            }
        }
        Ok(())
    }
}
