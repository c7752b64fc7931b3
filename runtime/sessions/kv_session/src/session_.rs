use errors::{InvalidSessionValue, ValueDeserializationError, ValueSerializationError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
/// The state attached to the current session.
///
/// A set of key-value pairs, where values are arbitrary JSON documents.
/// Keys starting with `_`, as well as `isNew`, are reserved: they can be
/// read and written during the request, but they are never persisted.
pub struct Session {
    state: Map<String, Value>,
    is_new: bool,
    serialized: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A brand-new, empty session.
    pub fn new() -> Self {
        Self {
            state: Map::new(),
            is_new: true,
            serialized: None,
        }
    }

    /// A session built out of existing state.
    pub fn from_map(state: Map<String, Value>) -> Self {
        Self {
            state,
            is_new: false,
            serialized: None,
        }
    }

    /// Parse a payload retrieved from the store.
    ///
    /// It fails if the payload isn't a JSON object.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload).map(Self::from_map)
    }

    /// `true` if the session was created during the current request,
    /// rather than being loaded from the store.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Get the value associated with `key`.
    ///
    /// If the value is not found, `None` is returned.
    /// If the value is found, but it cannot be deserialized into the expected type, an error is returned.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ValueDeserializationError> {
        self.get_value(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(|e| ValueDeserializationError {
                key: key.to_owned(),
                source: e,
            })
    }

    /// Get the raw JSON value associated with `key`.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Set a value for the given key.
    ///
    /// If the key already exists, the old raw value is returned.
    /// If the value cannot be serialized, an error is returned.
    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<Value>, ValueSerializationError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| ValueSerializationError {
            key: key.clone(),
            source: e,
        })?;
        Ok(self.insert_value(key, value))
    }

    /// Set a raw JSON value for the given key.
    ///
    /// If the key already exists, the old value is returned.
    pub fn insert_value(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.serialized = None;
        self.state.insert(key.into(), value)
    }

    /// Remove the value associated with `key`.
    ///
    /// If the key exists, the removed value is returned.
    pub fn remove_value(&mut self, key: &str) -> Option<Value> {
        self.serialized = None;
        self.state.shift_remove(key)
    }

    /// Remove all key-value pairs.
    ///
    /// This doesn't delete the session: set it to
    /// [`SessionAssignment::Remove`] if that's your goal.
    pub fn clear(&mut self) {
        self.serialized = None;
        self.state.clear();
    }

    /// The number of fields that will be persisted.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// `true` if there are no fields to be persisted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if there is at least one field to be persisted.
    pub fn is_populated(&self) -> bool {
        !self.is_empty()
    }

    /// Iterate over the fields that will be persisted.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.state.iter().filter(|(key, _)| !is_reserved(key))
    }

    /// The representation of the session that's going to be persisted,
    /// without any reserved field.
    pub fn to_json(&self) -> Map<String, Value> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Check if the session differs from the `previous` payload.
    ///
    /// The comparison is performed on serialized forms. The serialized form
    /// is cached, to be reused by [`Session::save`] if nothing changes in between.
    pub fn changed(&mut self, previous: Option<&str>) -> Result<bool, serde_json::Error> {
        let Some(previous) = previous else {
            return Ok(true);
        };
        Ok(self.save()? != previous)
    }

    /// The serialized form of the session, ready to be persisted.
    pub fn save(&mut self) -> Result<&str, serde_json::Error> {
        let serialized = match self.serialized.take() {
            Some(s) => s,
            None => serde_json::to_string(&PersistedFields(&self.state))?,
        };
        Ok(self.serialized.insert(serialized).as_str())
    }
}

fn is_reserved(key: &str) -> bool {
    key == "isNew" || key.starts_with('_')
}

struct PersistedFields<'a>(&'a Map<String, Value>);

impl Serialize for PersistedFields<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_map(self.0.iter().filter(|(key, _)| !is_reserved(key)))
    }
}

#[derive(Debug, Clone)]
/// The value assigned to the session of the current request.
pub enum SessionAssignment {
    /// Delete the session, both in the store and on the client.
    Remove,
    /// Replace the current session with a new one built from this state.
    Replace(Map<String, Value>),
}

impl From<Session> for SessionAssignment {
    fn from(session: Session) -> Self {
        Self::Replace(session.state)
    }
}

impl From<Option<Session>> for SessionAssignment {
    fn from(session: Option<Session>) -> Self {
        match session {
            Some(s) => s.into(),
            None => Self::Remove,
        }
    }
}

impl TryFrom<Value> for SessionAssignment {
    type Error = InvalidSessionValue;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let kind = match value {
            Value::Null => return Ok(Self::Remove),
            Value::Object(state) => return Ok(Self::Replace(state)),
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
        };
        Err(InvalidSessionValue { kind })
    }
}

/// Errors that can occur when interacting with the session state.
pub mod errors {
    use crate::cookie::errors::InjectResponseCookiesError;
    use crate::store::errors::StoreError;

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to deserialize the value associated with `{key}`")]
    /// The error returned by [`Session::get`][super::Session::get].
    pub struct ValueDeserializationError {
        /// The key of the value that we failed to deserialize.
        pub key: String,
        #[source]
        /// The underlying deserialization error.
        pub source: serde_json::Error,
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to serialize the value associated with `{key}`")]
    /// The error returned by [`Session::insert`][super::Session::insert].
    pub struct ValueSerializationError {
        /// The key of the value that we failed to serialize.
        pub key: String,
        #[source]
        /// The underlying serialization error.
        pub source: serde_json::Error,
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("The session can only be set to `null` or to a JSON object, but a {kind} was provided")]
    /// A session was assigned a JSON value that is neither `null` nor an object.
    pub struct InvalidSessionValue {
        /// The kind of JSON value that was provided.
        pub kind: &'static str,
    }

    /// The error returned when syncing a session with the store at the end of a request.
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    pub enum FinalizeError {
        #[error("Failed to serialize the session state")]
        SerializationError(#[from] serde_json::Error),
        #[error("Failed to save the session state")]
        SaveError(#[from] StoreError),
        #[error("Failed to attach the session cookie to the response")]
        CookieError(#[from] InjectResponseCookiesError),
    }

    /// The error returned by [`SessionMiddleware::handle`][crate::SessionMiddleware::handle].
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    pub enum SessionError<E> {
        /// The request handler failed.
        #[error(transparent)]
        Handler(E),
        /// The request handler succeeded, but the session couldn't be synced with the store.
        #[error("Failed to finalize the session")]
        Finalize(#[source] FinalizeError),
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`SessionMiddleware::new`][crate::SessionMiddleware::new].
    pub enum ConfigError {
        #[error("The session cookie (`{cookie_name}`) is configured to be signed, but no signing key was provided")]
        MissingSigningKey { cookie_name: String },
    }
}
