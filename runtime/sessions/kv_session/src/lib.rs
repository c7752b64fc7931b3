/*!
Cookie-identified sessions, backed by a key-value store.

# How it works

Every client is handed a **session cookie**. The cookie holds nothing but an opaque
**session id**, optionally signed to detect tampering. The state attached to the session
lives server-side, inside a **session storage backend** (e.g. Redis), serialized as a
JSON object and stored under a key derived from the session id.

For every request:

1. The session id is resolved from the request cookies, if the client sent one.
2. The session record is fetched from the store and parsed. If there is no cookie,
   no record or the record can't be parsed, the request starts a brand-new session.
3. The request handler reads and modifies the session. It can also remove it altogether.
4. Once the handler is done, the session is synced with the store:
   - a session that was never accessed is left alone;
   - a removed session is deleted from the store, and the client is told to drop the cookie;
   - a session whose state changed is saved, and the client receives a fresh cookie.

No record is written, and no cookie is set, for requests that don't touch the session.

# Entry points

- [`SessionMiddleware::handle`] wraps an async request handler, taking care of
  loading and finalizing the session for you.
- [`SessionMiddleware::load_from_headers`] and [`SessionMiddleware::finalize`] let
  you drive the two halves yourself, if you're plugging sessions into a framework.

# Storage backends

Backends implement [`SessionStorageBackend`][store::SessionStorageBackend].
Check out `kv_session_redis` and `kv_session_memory_store` for ready-made implementations.

## References

- [RFC 6265](https://datatracker.ietf.org/doc/html/rfc6265);
- [OWASP's session management cheat-sheet](https://cheatsheetseries.owasp.org/cheatsheets/Session_Management_Cheat_Sheet.html).
*/
pub mod config;
pub mod cookie;
mod handle;
mod id;
mod incoming;
mod middleware;
mod session_;
mod store_;

pub use handle::RequestSession;
pub use id::SessionId;
pub use incoming::IncomingSession;
pub use middleware::SessionMiddleware;
pub use session_::{Session, SessionAssignment};
pub use store_::SessionStore;

pub mod store {
    //! Types and traits related to [`SessionStore`][super::SessionStore].
    pub use crate::store_::errors;
    pub use crate::store_::{KeySchema, SessionStorageBackend};
}

pub mod errors {
    //! Errors that can occur while loading, manipulating or finalizing a session.
    pub use crate::session_::errors::*;
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how sessions are managed.
pub struct SessionConfig {
    #[serde(default)]
    /// Configure the session cookie.
    pub cookie: crate::config::SessionCookieConfig,
    #[serde(default)]
    /// Configure how session records are stored.
    pub store: crate::config::SessionStoreConfig,
}
