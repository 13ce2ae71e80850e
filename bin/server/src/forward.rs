//! Reverse forwarding of authenticated requests to the upstream service.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use oidc_proxy_access::{ConfigError, Session};
use rootcause::prelude::Report;
use url::Url;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Forwards requests to one upstream base URL.
#[derive(Debug, Clone)]
pub struct Forwarder {
    upstream: Url,
    client: reqwest::Client,
    pass_access_token: bool,
    withheld_cookies: Vec<String>,
}

impl Forwarder {
    pub fn new(upstream: Url, client: reqwest::Client) -> Self {
        Self {
            upstream,
            client,
            pass_access_token: false,
            withheld_cookies: Vec::new(),
        }
    }

    /// Cookies that are removed from requests before they go upstream.
    #[must_use]
    pub fn with_withheld_cookies(mut self, names: Vec<String>) -> Self {
        self.withheld_cookies = names;
        self
    }

    /// Sends the session's access token upstream as a bearer token.
    #[must_use]
    pub fn with_pass_access_token(mut self, pass: bool) -> Self {
        self.pass_access_token = pass;
        self
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// The upstream URL for an inbound request URI. The request path is
    /// appended to the upstream base path.
    fn target(&self, uri: &Uri) -> Url {
        let mut url = self.upstream.clone();
        let base = self.upstream.path().trim_end_matches('/');
        url.set_path(&format!("{base}{}", uri.path()));
        url.set_query(uri.query());
        url
    }
}

/// The client used for upstream requests. Redirects are passed back to the
/// browser instead of being followed.
pub fn upstream_client() -> Result<reqwest::Client, Report<ConfigError>> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| ConfigError::Load {
            details: format!("failed to create upstream client: {e}"),
        })?;
    Ok(client)
}

/// Removes hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP.iter().chain(named.iter()) {
        headers.remove(name);
    }
}

/// Drops the cookies named in `withheld` from the `Cookie` headers, folding
/// what remains into a single header.
fn withhold_cookies(headers: &mut HeaderMap, withheld: &[String]) {
    if withheld.is_empty() || !headers.contains_key(header::COOKIE) {
        return;
    }

    let kept: Vec<String> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let name = pair.split_once('=').map_or(*pair, |(name, _)| name);
            !withheld.iter().any(|w| w == name.trim())
        })
        .map(str::to_string)
        .collect();

    headers.remove(header::COOKIE);
    if kept.is_empty() {
        return;
    }
    match HeaderValue::from_str(&kept.join("; ")) {
        Ok(value) => {
            headers.insert(header::COOKIE, value);
        }
        Err(_) => tracing::warn!("dropping unforwardable cookie header"),
    }
}

fn add_forwarded_headers(headers: &mut HeaderMap, peer: Option<SocketAddr>) {
    if let Some(peer) = peer {
        let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {}", peer.ip()),
            None => peer.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if let Some(host) = headers.get(header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }
    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
}

/// Forwards `request` upstream and streams the answer back.
pub async fn proxy(State(forwarder): State<Arc<Forwarder>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let target = forwarder.target(&parts.uri);

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    withhold_cookies(&mut headers, &forwarder.withheld_cookies);
    add_forwarded_headers(
        &mut headers,
        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr),
    );
    headers.remove(header::HOST);

    let session = parts.extensions.get::<Session>();
    if let Some(session) = session.filter(|_| forwarder.pass_access_token) {
        match HeaderValue::from_str(&format!("Bearer {}", session.tokens().access_token())) {
            Ok(value) => {
                headers.insert(header::AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!("access token is not a valid header value"),
        }
    }

    let upstream = forwarder
        .client
        .request(parts.method.clone(), target.clone())
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    let upstream = match upstream {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::warn!(method = %parts.method, path = %target.path(), error = %e, "upstream request failed");
            return (StatusCode::BAD_GATEWAY, "bad gateway").into_response();
        }
    };

    let mut response = Response::builder().status(upstream.status());
    if let Some(response_headers) = response.headers_mut() {
        *response_headers = upstream.headers().clone();
        strip_hop_by_hop(response_headers);
    }
    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to build upstream response");
            StatusCode::BAD_GATEWAY.into_response()
        })
}
