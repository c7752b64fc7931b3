use std::convert::Infallible;

use biscotti::Key;
use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderValue, Request, Response};
use insta::assert_snapshot;
use kv_session::{SessionConfig, SessionMiddleware, errors::SessionError};
use serde_json::json;

use crate::fixtures::{failing_store, spy_store, store};
use crate::helpers::{echo_cookie, set_cookie_headers};
use kv_session::config::SessionStoreConfig;
use kv_session::store::errors::StoreOperation;

static_assertions::assert_impl_all!(SessionMiddleware: Send, Sync);

fn signed_middleware(config: SessionConfig, store: kv_session::SessionStore) -> SessionMiddleware {
    SessionMiddleware::new(config, store, Some(Key::generate())).unwrap()
}

fn request_with(headers: HeaderMap) -> Request<()> {
    let mut request = Request::new(());
    *request.headers_mut() = headers;
    request
}

#[tokio::test]
async fn a_signing_key_is_required_for_signed_cookies() {
    let (store, config) = (store(), SessionConfig::default());
    let Err(err) = SessionMiddleware::new(config, store, None) else {
        panic!("Expected the middleware to reject a missing signing key");
    };
    assert_snapshot!(err, @"The session cookie (`id`) is configured to be signed, but no signing key was provided");
}

#[tokio::test]
async fn no_signing_key_is_required_for_unsigned_cookies() {
    let (store, mut config) = (store(), SessionConfig::default());
    config.cookie.signed = false;

    let middleware = SessionMiddleware::new(config, store, None).unwrap();
    let response = middleware
        .handle(Request::new(()), async |_request, session| {
            session.get().unwrap().insert("a", 1).unwrap();
            Ok::<_, Infallible>(Response::new(()))
        })
        .await
        .unwrap();

    let cookies = set_cookie_headers(response.headers());
    assert_eq!(cookies.len(), 1);
    let mut session = middleware.load_from_headers(&echo_cookie(&cookies[0])).await;
    assert_eq!(session.get().unwrap().get::<u32>("a").unwrap(), Some(1));
}

#[tokio::test]
async fn untouched_sessions_produce_no_cookie() {
    let ((store, call_tracker), config) = (spy_store(), SessionConfig::default());
    let middleware = signed_middleware(config, store);

    let response = middleware
        .handle(Request::new(()), async |_request, _session| {
            Ok::<_, Infallible>(Response::new(()))
        })
        .await
        .unwrap();

    assert!(response.headers().get(SET_COOKIE).is_none());
    call_tracker.assert_store_was_untouched().await;
}

#[tokio::test]
async fn a_signed_session_cookie_is_honoured_on_the_next_request() {
    let (store, config) = (store(), SessionConfig::default());
    let middleware = signed_middleware(config, store);

    let response = middleware
        .handle(Request::new(()), async |_request, session| {
            session.get().unwrap().insert("visits", 1).unwrap();
            Ok::<_, Infallible>(Response::new(()))
        })
        .await
        .unwrap();
    let cookies = set_cookie_headers(response.headers());
    assert_eq!(cookies.len(), 1);

    let response = middleware
        .handle(
            request_with(echo_cookie(&cookies[0])),
            async |_request, session| {
                let state = session.get().unwrap();
                assert!(!state.is_new());
                let visits: u32 = state.get("visits").unwrap().unwrap();
                state.insert("visits", visits + 1).unwrap();
                Ok::<_, Infallible>(Response::new(()))
            },
        )
        .await
        .unwrap();
    let cookies = set_cookie_headers(response.headers());
    assert_eq!(cookies.len(), 1);

    let mut session = middleware.load_from_headers(&echo_cookie(&cookies[0])).await;
    assert_eq!(session.get().unwrap().get::<u32>("visits").unwrap(), Some(2));
}

#[tokio::test]
async fn a_tampered_session_cookie_starts_a_fresh_session() {
    let ((store, call_tracker), config) = (spy_store(), SessionConfig::default());
    let middleware = signed_middleware(config, store);

    let response = middleware
        .handle(Request::new(()), async |_request, session| {
            session.get().unwrap().insert("admin", false).unwrap();
            Ok::<_, Infallible>(Response::new(()))
        })
        .await
        .unwrap();
    let cookies = set_cookie_headers(response.headers());
    call_tracker.reset().await;

    // Swap the signed value for a made-up session id.
    let (name, _) = cookies[0].split_once('=').unwrap();
    let forged = format!("{name}=00000000000000000000000000000000");
    let mut session = middleware.load_from_headers(&echo_cookie(&forged)).await;

    let state = session.get().unwrap();
    assert!(state.is_new());
    assert!(state.is_empty());
    assert_eq!(call_tracker.operation_log().await, Vec::<String>::new());
}

#[tokio::test]
async fn removing_the_session_invalidates_the_client_cookie() {
    let (store, config) = (store(), SessionConfig::default());
    let middleware = signed_middleware(config, store);

    let response = middleware
        .handle(Request::new(()), async |_request, session| {
            session.get().unwrap().insert("user", "ferris").unwrap();
            Ok::<_, Infallible>(Response::new(()))
        })
        .await
        .unwrap();
    let cookies = set_cookie_headers(response.headers());

    let response = middleware
        .handle(
            request_with(echo_cookie(&cookies[0])),
            async |_request, session| {
                session.set_json(serde_json::Value::Null).unwrap();
                Ok::<_, Infallible>(Response::new(()))
            },
        )
        .await
        .unwrap();
    let cookies = set_cookie_headers(response.headers());
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("id="), "{}", cookies[0]);

    let mut session = middleware.load_from_headers(&echo_cookie(&cookies[0])).await;
    assert!(session.get().unwrap().is_new());
}

#[tokio::test]
async fn the_session_cookie_replaces_earlier_set_cookie_headers() {
    let (store, config) = (store(), SessionConfig::default());
    let middleware = signed_middleware(config, store);

    let response = middleware
        .handle(Request::new(()), async |_request, session| {
            session.set_json(json!({"a": 1})).unwrap();
            let mut response = Response::new(());
            let headers = response.headers_mut();
            headers.append(SET_COOKIE, HeaderValue::from_static("id=stale; Path=/"));
            headers.append(SET_COOKIE, HeaderValue::from_static("theme=dark"));
            Ok::<_, Infallible>(response)
        })
        .await
        .unwrap();

    let cookies = set_cookie_headers(response.headers());
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().any(|c| c == "theme=dark"));
    assert!(!cookies.iter().any(|c| c.starts_with("id=stale")));
}

#[tokio::test]
async fn earlier_set_cookie_headers_are_kept_if_overwrite_is_disabled() {
    let (store, mut config) = (store(), SessionConfig::default());
    config.cookie.overwrite = false;
    let middleware = signed_middleware(config, store);

    let response = middleware
        .handle(Request::new(()), async |_request, session| {
            session.set_json(json!({"a": 1})).unwrap();
            let mut response = Response::new(());
            response
                .headers_mut()
                .append(SET_COOKIE, HeaderValue::from_static("id=stale"));
            Ok::<_, Infallible>(response)
        })
        .await
        .unwrap();

    assert_eq!(set_cookie_headers(response.headers()).len(), 2);
}

#[tokio::test]
async fn handler_errors_take_precedence_but_the_session_is_still_synced() {
    let ((store, call_tracker), config) = (spy_store(), SessionConfig::default());
    let middleware = signed_middleware(config, store);

    let outcome = middleware
        .handle(Request::new(()), async |_request, session| {
            session.get().unwrap().insert("a", 1).unwrap();
            Err::<Response<()>, _>("The handler blew up")
        })
        .await;

    let Err(SessionError::Handler(e)) = outcome else {
        panic!("Expected the handler error to be returned");
    };
    assert_eq!(e, "The handler blew up");
    assert_eq!(call_tracker.operation_log().await.len(), 1);
}

#[tokio::test]
async fn handler_errors_win_over_finalize_errors() {
    let ((store, _), config) = (
        failing_store(&SessionStoreConfig::default(), &[StoreOperation::Set]),
        SessionConfig::default(),
    );
    let middleware = signed_middleware(config, store);

    let outcome = middleware
        .handle(Request::new(()), async |_request, session| {
            session.get().unwrap().insert("a", 1).unwrap();
            Err::<Response<()>, _>("The handler blew up")
        })
        .await;

    assert!(matches!(outcome, Err(SessionError::Handler("The handler blew up"))));
}

#[tokio::test]
async fn finalize_errors_are_reported_if_the_handler_succeeds() {
    let ((store, _), config) = (
        failing_store(&SessionStoreConfig::default(), &[StoreOperation::Set]),
        SessionConfig::default(),
    );
    let middleware = signed_middleware(config, store);

    let outcome = middleware
        .handle(Request::new(()), async |_request, session| {
            session.get().unwrap().insert("a", 1).unwrap();
            Ok::<_, Infallible>(Response::new(()))
        })
        .await;

    let Err(err) = outcome else {
        panic!("Expected the save failure to be reported");
    };
    assert_snapshot!(err, @"Failed to finalize the session");
}

#[tokio::test]
async fn sessions_can_be_driven_without_wrapping_the_handler() {
    let (store, config) = (store(), SessionConfig::default());
    let middleware = signed_middleware(config, store);

    let mut session = middleware.load_from_headers(&HeaderMap::new()).await;
    session.get().unwrap().insert("a", 1).unwrap();

    let mut response_headers = HeaderMap::new();
    middleware.finalize(session, &mut response_headers).await.unwrap();
    assert_eq!(set_cookie_headers(&response_headers).len(), 1);
}
