use crate::SessionId;
use crate::config::SessionStoreConfig;
use errors::StoreError;
use std::sync::Arc;

/// Where server-side session records are stored.
///
/// It is a thin wrapper
/// [around your chosen storage backend implementation][`SessionStorageBackend`],
/// removing the need to specify the concrete type of the storage backend
/// everywhere in your code.
///
/// The wrapper owns key namespacing: every session id is turned into a store
/// key using the configured [`KeySchema`] before reaching the backend.
/// Cloning is cheap, all clones share the same backend connection.
#[derive(Debug, Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionStorageBackend>,
    schema: KeySchema,
    ttl: Option<std::time::Duration>,
}

impl SessionStore {
    /// Creates a new session store using the provided backend.
    pub fn new<Backend>(backend: Backend, config: &SessionStoreConfig) -> Self
    where
        Backend: SessionStorageBackend + 'static,
    {
        Self {
            backend: Arc::new(backend),
            schema: KeySchema::new(&config.key_prefix),
            ttl: config.ttl,
        }
    }

    /// The key used to store the record for the given session id.
    pub fn key(&self, id: &SessionId) -> String {
        self.schema.key(id)
    }

    /// The time-to-live applied to session records, if any.
    pub fn ttl(&self) -> Option<std::time::Duration> {
        self.ttl
    }

    /// Retrieve the serialized state for the given session id.
    ///
    /// Returns `None` if there is no record, or if it has expired.
    pub async fn get(&self, id: &SessionId) -> Result<Option<String>, StoreError> {
        self.backend.get(&self.key(id)).await
    }

    /// Store the serialized state for the given session id,
    /// replacing whatever was there before.
    pub async fn set(&self, id: &SessionId, payload: &str) -> Result<(), StoreError> {
        self.backend.set(&self.key(id), payload).await
    }

    /// Delete the record for the given session id.
    ///
    /// Deleting a record that doesn't exist is not an error.
    pub async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.backend.delete(&self.key(id)).await
    }

    /// Reset the time-to-live of the record for the given session id.
    ///
    /// It does nothing if no time-to-live has been configured.
    pub async fn refresh_expiry(&self, id: &SessionId) -> Result<(), StoreError> {
        let Some(ttl) = self.ttl else {
            return Ok(());
        };
        self.backend.expire(&self.key(id), ttl).await
    }
}

#[async_trait::async_trait]
/// The interface of a session storage backend.
///
/// Backends deal with fully-qualified keys: namespacing is handled by
/// [`SessionStore`].
pub trait SessionStorageBackend: std::fmt::Debug + Send + Sync {
    /// Retrieve the payload stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `payload` under `key`, overwriting any existing value.
    ///
    /// Any expiry previously attached to `key` is cleared.
    async fn set(&self, key: &str, payload: &str) -> Result<(), StoreError>;

    /// Remove the value stored under `key`.
    ///
    /// It must succeed if there is no value stored under `key`.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Set the remaining time-to-live for the value stored under `key`.
    async fn expire(&self, key: &str, ttl: std::time::Duration) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The prefix prepended to session ids to build store keys.
///
/// A non-empty prefix always ends with a single `:` delimiter.
pub struct KeySchema(String);

impl KeySchema {
    pub const DELIMITER: char = ':';

    pub fn new(prefix: &str) -> Self {
        let mut prefix = prefix.to_owned();
        if !prefix.is_empty() && !prefix.ends_with(Self::DELIMITER) {
            prefix.push(Self::DELIMITER);
        }
        Self(prefix)
    }

    /// The normalized prefix.
    pub fn prefix(&self) -> &str {
        &self.0
    }

    /// Build the store key for the given session id.
    pub fn key(&self, id: &SessionId) -> String {
        format!("{}{}", self.0, id.as_str())
    }
}

/// Errors that can occur when interacting with a session storage backend.
pub mod errors {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// The store operation that failed.
    pub enum StoreOperation {
        Get,
        Set,
        Delete,
        Expire,
    }

    impl std::fmt::Display for StoreOperation {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                StoreOperation::Get => "load",
                StoreOperation::Set => "save",
                StoreOperation::Delete => "delete",
                StoreOperation::Expire => "refresh the expiry of",
            };
            f.write_str(s)
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to {operation} the session record stored under `{key}`")]
    /// A session storage backend failed to carry out an operation.
    pub struct StoreError {
        /// The operation that failed.
        pub operation: StoreOperation,
        /// The store key the operation was targeting.
        pub key: String,
        #[source]
        /// What went wrong, as reported by the backend.
        pub source: anyhow::Error,
    }

    impl StoreError {
        pub fn new(
            operation: StoreOperation,
            key: impl Into<String>,
            source: impl Into<anyhow::Error>,
        ) -> Self {
            Self {
                operation,
                key: key.into(),
                source: source.into(),
            }
        }
    }
}
