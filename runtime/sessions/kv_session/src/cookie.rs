//! Read and write cookies on `http` header maps, using `biscotti`.
use biscotti::{Processor, RequestCookies, ResponseCookies};
use errors::{ExtractRequestCookiesError, InjectResponseCookiesError};
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};

/// Parse cookies out of the headers of an incoming request.
///
/// Signed cookies are verified by the `processor`.
pub fn extract_request_cookies<'request>(
    headers: &'request HeaderMap,
    processor: &Processor,
) -> Result<RequestCookies<'request>, ExtractRequestCookiesError> {
    let mut cookies = RequestCookies::new();
    for header in headers.get_all(COOKIE).into_iter() {
        let header = header.to_str()?;
        cookies.extend_from_header(header, processor)?;
    }
    Ok(cookies)
}

/// Attach cookies to the headers of an outgoing response.
///
/// If `overwrite` is set, `Set-Cookie` headers that were already present
/// for a cookie with the same name are dropped.
pub fn inject_response_cookies(
    headers: &mut HeaderMap,
    response_cookies: ResponseCookies<'_>,
    processor: &Processor,
    overwrite: bool,
) -> Result<(), InjectResponseCookiesError> {
    let mut values = Vec::new();
    for value in response_cookies.header_values(processor) {
        let header_value =
            HeaderValue::from_str(&value).map_err(|_| InjectResponseCookiesError {
                invalid_header_value: value.clone(),
            })?;
        values.push((cookie_name(&value).to_owned(), header_value));
    }

    if overwrite {
        let existing: Vec<HeaderValue> = headers.get_all(SET_COOKIE).iter().cloned().collect();
        headers.remove(SET_COOKIE);
        for value in existing {
            let replaced = value.to_str().is_ok_and(|v| {
                values
                    .iter()
                    .any(|(name, _)| cookie_name(v) == name.as_str())
            });
            if !replaced {
                headers.append(SET_COOKIE, value);
            }
        }
    }

    for (_, value) in values {
        headers.append(SET_COOKIE, value);
    }
    Ok(())
}

fn cookie_name(set_cookie: &str) -> &str {
    set_cookie
        .split_once('=')
        .map(|(name, _)| name)
        .unwrap_or(set_cookie)
        .trim()
}

/// Errors that can occur when working with cookies.
pub mod errors {
    use http::header::ToStrError;

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error type returned by [`extract_request_cookies`](super::extract_request_cookies).
    pub enum ExtractRequestCookiesError {
        #[error("Some characters in the `Cookie` header aren't printable ASCII characters.")]
        InvalidHeaderValue(#[from] ToStrError),
        #[error("Failed to parse request cookies out of the `Cookie` header.")]
        ParseError(#[from] biscotti::errors::ParseError),
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Some characters in the `Set-Cookie` header value are not printable ASCII characters.")]
    /// The error type returned by [`inject_response_cookies`](super::inject_response_cookies).
    pub struct InjectResponseCookiesError {
        /// The invalid header value.
        pub invalid_header_value: String,
    }
}
