use biscotti::{RemovalCookie, ResponseCookie};
use serde_json::Value;
use tracing::Level;
use tracing_log_error::log_error;

use crate::config::SessionCookieConfig;
use crate::errors::{FinalizeError, InvalidSessionValue};
use crate::{IncomingSession, Session, SessionAssignment, SessionId, SessionStore};

/// The session attached to the request currently being processed.
///
/// It's built once per request, by [`RequestSession::load`], and it's
/// consumed by [`RequestSession::finalize`] once the request has been
/// handled, to sync the session with the store.
#[derive(Debug)]
pub struct RequestSession<'store> {
    id: SessionId,
    state: SessionState,
    loaded_payload: Option<String>,
    store: &'store SessionStore,
    config: &'store SessionCookieConfig,
}

#[derive(Debug)]
enum SessionState {
    /// The session has been loaded, but the request handler never accessed it.
    Untouched(Session),
    /// The session has been accessed or replaced by the request handler.
    Active(Session),
    /// The session must be deleted, both server-side and client-side.
    MarkedForDeletion,
}

impl<'store> RequestSession<'store> {
    /// Load the session for the current request.
    ///
    /// It is a continuation of the existing session if the request carried a
    /// session id with a matching record in the store.
    /// It is a brand-new session, with a freshly generated id, otherwise.
    ///
    /// Loading never fails: store errors are logged and treated as a missing record.
    #[tracing::instrument(name = "Load session", level = tracing::Level::TRACE, skip_all)]
    pub async fn load(
        store: &'store SessionStore,
        config: &'store SessionCookieConfig,
        incoming: Option<IncomingSession>,
    ) -> Self {
        let Some(IncomingSession { id }) = incoming else {
            tracing::trace!("No session cookie, starting a new session.");
            return Self::fresh(store, config);
        };
        let payload = match store.get(&id).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::debug!(
                    session.id = %id,
                    "There is no record for the incoming session id, starting a new session."
                );
                return Self::fresh(store, config);
            }
            Err(e) => {
                log_error!(
                    e,
                    level: Level::WARN,
                    "Failed to load the session record, starting a new session."
                );
                return Self::fresh(store, config);
            }
        };
        let (session, loaded_payload) = match Session::from_payload(&payload) {
            Ok(session) => (session, Some(payload)),
            Err(e) => {
                // Records written in an older or corrupted format are discarded,
                // but the session id is kept.
                log_error!(
                    e,
                    level: Level::WARN,
                    "The stored session state is not a JSON object, starting from an empty session."
                );
                (Session::new(), None)
            }
        };
        Self {
            id,
            state: SessionState::Untouched(session),
            loaded_payload,
            store,
            config,
        }
    }

    fn fresh(store: &'store SessionStore, config: &'store SessionCookieConfig) -> Self {
        Self {
            id: SessionId::random(),
            state: SessionState::Untouched(Session::new()),
            loaded_payload: None,
            store,
            config,
        }
    }

    /// The id of the current session.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// `true` if the session has been accessed or assigned during this request.
    pub fn is_touched(&self) -> bool {
        !matches!(self.state, SessionState::Untouched(_))
    }

    /// Access the current session.
    ///
    /// It returns `None` if the session has been removed earlier in the request,
    /// via [`SessionAssignment::Remove`].
    pub fn get(&mut self) -> Option<&mut Session> {
        self.state = match std::mem::replace(&mut self.state, SessionState::MarkedForDeletion) {
            SessionState::Untouched(session) | SessionState::Active(session) => {
                SessionState::Active(session)
            }
            SessionState::MarkedForDeletion => SessionState::MarkedForDeletion,
        };
        match &mut self.state {
            SessionState::Active(session) => Some(session),
            _ => None,
        }
    }

    /// Replace or remove the current session.
    pub fn set(&mut self, assignment: impl Into<SessionAssignment>) {
        self.state = match assignment.into() {
            SessionAssignment::Remove => SessionState::MarkedForDeletion,
            SessionAssignment::Replace(state) => SessionState::Active(Session::from_map(state)),
        };
    }

    /// Replace or remove the current session using a raw JSON value.
    ///
    /// `null` removes the session, an object replaces it.
    /// Any other kind of value is rejected and the session is left untouched.
    pub fn set_json(&mut self, value: Value) -> Result<(), InvalidSessionValue> {
        let assignment = SessionAssignment::try_from(value)?;
        self.set(assignment);
        Ok(())
    }

    /// Remove the session.
    ///
    /// The server-side record will be deleted and the client will receive
    /// an empty session cookie.
    pub fn remove(&mut self) {
        self.set(SessionAssignment::Remove);
    }

    /// Sync the session with the store.
    ///
    /// It returns the cookie that must be attached to the outgoing response, if any.
    ///
    /// - An untouched session, or a brand-new session that's still empty, is left alone.
    /// - A removed session is deleted from the store. Failing to do so is logged,
    ///   but it isn't treated as an error.
    /// - A session whose serialized state differs from what was loaded is saved
    ///   and its expiry refreshed.
    #[tracing::instrument(name = "Finalize session", level = tracing::Level::TRACE, skip_all)]
    pub async fn finalize(self) -> Result<Option<ResponseCookie<'static>>, FinalizeError> {
        let Self {
            id,
            state,
            loaded_payload,
            store,
            config,
        } = self;
        match state {
            SessionState::Untouched(_) => {
                tracing::trace!("The session was never accessed, nothing to do.");
                Ok(None)
            }
            SessionState::MarkedForDeletion => {
                let cookie = removal_cookie(config);
                if let Err(e) = store.delete(&id).await {
                    log_error!(e, "Failed to delete the session record");
                }
                Ok(Some(cookie))
            }
            SessionState::Active(mut session) => {
                if loaded_payload.is_none() && session.is_empty() {
                    tracing::trace!("The session is new and empty, nothing to do.");
                    return Ok(None);
                }
                if !session.changed(loaded_payload.as_deref())? {
                    tracing::trace!("The session is unchanged, nothing to do.");
                    return Ok(None);
                }
                store.set(&id, session.save()?).await?;
                if let Err(e) = store.refresh_expiry(&id).await {
                    log_error!(
                        e,
                        level: Level::WARN,
                        "Failed to refresh the expiry of the session record"
                    );
                }
                Ok(Some(session_cookie(config, store.ttl(), &id)))
            }
        }
    }
}

fn session_cookie(
    config: &SessionCookieConfig,
    ttl: Option<std::time::Duration>,
    id: &SessionId,
) -> ResponseCookie<'static> {
    let mut cookie = with_attributes(ResponseCookie::new(config.name.clone(), id.to_string()), config);
    if let Some(max_age) = config.max_age.or(ttl) {
        cookie = cookie.set_max_age(max_age_attribute(max_age));
    }
    cookie
}

fn removal_cookie(config: &SessionCookieConfig) -> ResponseCookie<'static> {
    with_attributes(RemovalCookie::new(config.name.clone()).into(), config)
}

fn with_attributes(
    mut cookie: ResponseCookie<'static>,
    config: &SessionCookieConfig,
) -> ResponseCookie<'static> {
    if let Some(domain) = config.domain.as_deref() {
        cookie = cookie.set_domain(domain.to_owned());
    }
    if let Some(path) = config.path.as_deref() {
        cookie = cookie.set_path(path.to_owned());
    }
    if let Some(same_site) = config.same_site {
        cookie = cookie.set_same_site(same_site);
    }
    if config.secure {
        cookie = cookie.set_secure(true);
    }
    if config.http_only {
        cookie = cookie.set_http_only(true);
    }
    cookie
}

/// `Max-Age` is expressed in whole seconds: round up, so that the cookie
/// never expires before the record it points to.
fn max_age_attribute(max_age: std::time::Duration) -> jiff::SignedDuration {
    let mut seconds = max_age.as_secs();
    if max_age.subsec_nanos() > 0 {
        seconds = seconds.saturating_add(1);
    }
    jiff::SignedDuration::try_from(std::time::Duration::from_secs(seconds))
        .unwrap_or(jiff::SignedDuration::MAX)
}
