//! Origin URI handling for the login redirects.
//!
//! The origin URI travels from the protected request to the login page, into
//! the state cookie and finally into the post-login redirect. It is encoded
//! on the way out and checked on the way back so the gateway never redirects
//! off-site.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use url::Url;

/// Characters escaped in a query parameter value. `/` and `?` stay readable.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'?')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

/// The login URL for an unauthenticated request to `origin`.
pub fn login_redirect(login_path: &str, origin: &str) -> String {
    format!("{login_path}?origin_uri={}", encode(origin))
}

/// The selection page link for `provider`, keeping `origin` if present.
pub fn provider_link(login_path: &str, origin: Option<&str>, provider: &str) -> String {
    match origin.filter(|o| !o.is_empty()) {
        Some(origin) => format!(
            "{login_path}?origin_uri={}&provider={}",
            encode(origin),
            encode(provider)
        ),
        None => format!("{login_path}?provider={}", encode(provider)),
    }
}

/// Whether `candidate` is a path on this host.
///
/// Rejects absolute and protocol-relative URLs, backslashes and encoded
/// variants of those.
pub fn is_local_path(candidate: &str) -> bool {
    let Ok(decoded) = percent_decode_str(candidate).decode_utf8() else {
        return false;
    };

    if !decoded.starts_with('/') || decoded.starts_with("//") {
        return false;
    }
    if decoded.contains("://") || decoded.contains('\\') {
        return false;
    }

    Url::parse("http://localhost")
        .and_then(|base| base.join(&decoded))
        .is_ok_and(|joined| joined.host_str() == Some("localhost"))
}

/// Where to send the user after login: `origin` if it is local, `/` otherwise.
pub fn local_origin(origin: Option<&str>) -> String {
    match origin {
        Some(origin) if is_local_path(origin) => origin.to_string(),
        Some(origin) => {
            tracing::warn!(origin_uri = %origin, "ignoring non-local origin_uri");
            "/".to_string()
        }
        None => "/".to_string(),
    }
}
