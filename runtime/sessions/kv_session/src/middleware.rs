use biscotti::config::{CryptoAlgorithm, CryptoRule};
use biscotti::{Key, Processor, ProcessorConfig, RequestCookies, ResponseCookie, ResponseCookies};
use http::{HeaderMap, Request, Response};
use tracing::Level;
use tracing_log_error::log_error;

use crate::cookie::errors::InjectResponseCookiesError;
use crate::cookie::{extract_request_cookies, inject_response_cookies};
use crate::errors::{ConfigError, FinalizeError, SessionError};
use crate::{IncomingSession, RequestSession, SessionConfig, SessionStore};

/// Manages sessions for every request that goes through it.
///
/// Build it once, when your application starts, and share it across requests:
/// the store connection it holds is reused by all of them.
///
/// # Example
///
/// ```rust
/// use biscotti::Key;
/// use http::{Request, Response};
/// use kv_session::{SessionConfig, SessionMiddleware, SessionStore};
/// # use kv_session::store::{SessionStorageBackend, errors::StoreError};
/// # #[derive(Debug)]
/// # struct Backend;
/// # #[async_trait::async_trait]
/// # impl SessionStorageBackend for Backend {
/// #     async fn get(&self, _: &str) -> Result<Option<String>, StoreError> { Ok(None) }
/// #     async fn set(&self, _: &str, _: &str) -> Result<(), StoreError> { Ok(()) }
/// #     async fn delete(&self, _: &str) -> Result<(), StoreError> { Ok(()) }
/// #     async fn expire(&self, _: &str, _: std::time::Duration) -> Result<(), StoreError> { Ok(()) }
/// # }
///
/// # async fn run() {
/// let config = SessionConfig::default();
/// let store = SessionStore::new(Backend, &config.store);
/// let middleware = SessionMiddleware::new(config, store, Some(Key::generate())).unwrap();
///
/// let response = middleware
///     .handle(Request::new(()), async |_request, session| {
///         let session = session.get().expect("The session hasn't been removed");
///         session.insert("visits", 1).unwrap();
///         Ok::<_, std::convert::Infallible>(Response::new(()))
///     })
///     .await
///     .unwrap();
/// assert!(response.headers().contains_key(http::header::SET_COOKIE));
/// # }
/// ```
pub struct SessionMiddleware {
    config: SessionConfig,
    store: SessionStore,
    processor: Processor,
}

impl std::fmt::Debug for SessionMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMiddleware")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("processor", &"<Processor>")
            .finish()
    }
}

impl SessionMiddleware {
    /// Create a new session middleware.
    ///
    /// A signing `key` is required if the session cookie is configured to be signed.
    pub fn new(
        config: SessionConfig,
        store: SessionStore,
        key: Option<Key>,
    ) -> Result<Self, ConfigError> {
        let mut processor_config = ProcessorConfig::default();
        if config.cookie.signed {
            let key = key.ok_or_else(|| ConfigError::MissingSigningKey {
                cookie_name: config.cookie.name.clone(),
            })?;
            processor_config.crypto_rules.push(CryptoRule {
                cookie_names: vec![config.cookie.name.clone()],
                algorithm: CryptoAlgorithm::Signing,
                key,
                fallbacks: vec![],
            });
        }
        tracing::debug!(
            cookie.name = %config.cookie.name,
            cookie.signed = config.cookie.signed,
            store.key_prefix = %config.store.key_prefix,
            store.ttl = ?store.ttl(),
            "Session middleware configured"
        );
        Ok(Self {
            config,
            store,
            processor: processor_config.into(),
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session store in use.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The processor used to sign and verify the session cookie.
    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// Resolve the session id from the request cookies and load the session.
    pub async fn load(&self, cookies: &RequestCookies<'_>) -> RequestSession<'_> {
        let incoming = IncomingSession::extract(cookies, &self.config.cookie);
        RequestSession::load(&self.store, &self.config.cookie, incoming).await
    }

    /// Parse the `Cookie` headers of the request and load the session.
    ///
    /// Unparseable cookies, including session cookies with an invalid
    /// signature, are treated as a missing session cookie.
    pub async fn load_from_headers(&self, headers: &HeaderMap) -> RequestSession<'_> {
        match extract_request_cookies(headers, &self.processor) {
            Ok(cookies) => self.load(&cookies).await,
            Err(e) => {
                log_error!(
                    e,
                    level: Level::WARN,
                    "Failed to parse request cookies, starting a new session."
                );
                RequestSession::load(&self.store, &self.config.cookie, None).await
            }
        }
    }

    /// Sync the session with the store and attach the session cookie, if any,
    /// to the response headers.
    pub async fn finalize(
        &self,
        session: RequestSession<'_>,
        headers: &mut HeaderMap,
    ) -> Result<(), FinalizeError> {
        if let Some(cookie) = session.finalize().await? {
            self.write_cookie(cookie, headers)?;
        }
        Ok(())
    }

    /// Run `next` with the session for `request` in scope.
    ///
    /// The session is synced with the store once `next` completes, whether it
    /// succeeded or not. If `next` fails, its error is returned as is and a
    /// failure to sync the session is only logged.
    pub async fn handle<'a, ReqBody, ResBody, E, Next>(
        &'a self,
        request: Request<ReqBody>,
        next: Next,
    ) -> Result<Response<ResBody>, SessionError<E>>
    where
        Next: AsyncFnOnce(Request<ReqBody>, &mut RequestSession<'a>) -> Result<Response<ResBody>, E>,
    {
        let mut session = self.load_from_headers(request.headers()).await;
        let outcome = next(request, &mut session).await;
        let finalized = session.finalize().await;
        match (outcome, finalized) {
            (Ok(mut response), Ok(cookie)) => {
                if let Some(cookie) = cookie {
                    self.write_cookie(cookie, response.headers_mut())
                        .map_err(|e| SessionError::Finalize(e.into()))?;
                }
                Ok(response)
            }
            (Ok(_), Err(e)) => Err(SessionError::Finalize(e)),
            (Err(e), finalized) => {
                if let Err(finalize_error) = finalized {
                    log_error!(
                        finalize_error,
                        "Failed to sync the session after the request handler failed"
                    );
                }
                Err(SessionError::Handler(e))
            }
        }
    }

    fn write_cookie(
        &self,
        cookie: ResponseCookie<'static>,
        headers: &mut HeaderMap,
    ) -> Result<(), InjectResponseCookiesError> {
        let mut cookies = ResponseCookies::new();
        cookies.insert(cookie);
        inject_response_cookies(headers, cookies, &self.processor, self.config.cookie.overwrite)
    }
}
