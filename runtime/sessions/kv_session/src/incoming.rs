use crate::{SessionId, config::SessionCookieConfig};
use biscotti::RequestCookies;

/// The session information attached to the incoming request.
///
/// Built using [`IncomingSession::extract`].
#[derive(Debug, Clone)]
pub struct IncomingSession {
    pub(crate) id: SessionId,
}

impl IncomingSession {
    /// Extract a session cookie from the incoming request, if it exists.
    ///
    /// If the cookie is not found, or if its value is empty, this method will return `None`.
    /// Cookies with an invalid signature never make it this far: they are
    /// rejected when parsing the `Cookie` header.
    pub fn extract(cookies: &RequestCookies<'_>, config: &SessionCookieConfig) -> Option<Self> {
        let cookie = cookies.get(&config.name)?;
        let id = SessionId::from_cookie_value(cookie.value());
        if id.is_none() {
            tracing::trace!("The session cookie is empty, ignoring it.");
        }
        id.map(|id| Self { id })
    }

    /// Build an [`IncomingSession`] from a known session id.
    pub fn from_id(id: SessionId) -> Self {
        Self { id }
    }

    /// The session id sent by the client.
    pub fn id(&self) -> &SessionId {
        &self.id
    }
}
