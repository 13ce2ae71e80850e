//! Per-request dispatch.
//!
//! [`gate`] runs in front of every handler. Gateway paths are answered here;
//! every other path is a protected resource and only reaches the inner
//! service with a valid [`Session`] in the request extensions.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use oidc_proxy_access::Session;

use super::{Gateway, oidc, redirect, routes};
use crate::{debug, error::GatewayError};

/// The gateway middleware.
///
/// Dispatch order, first match wins: debug path, logout path, login path,
/// callback path, protected resource.
pub async fn gate(
    State(gateway): State<Arc<Gateway>>,
    mut request: Request,
    next: Next,
) -> Response {
    let settings = gateway.settings();
    let path = request.uri().path().to_owned();

    if settings.debug_path() == Some(path.as_str()) {
        if let Some(session) = gateway.resolve_session(request.headers()) {
            request.extensions_mut().insert(session);
        }
        return debug::session_info(request).await;
    }
    if path == settings.logout_path() {
        return routes::logout(&gateway, request.headers()).await;
    }
    if path == settings.login_path() {
        return routes::login(&gateway, request.uri(), request.headers())
            .unwrap_or_else(IntoResponse::into_response);
    }
    if path == settings.callback_path() {
        return routes::callback(&gateway, request.uri(), request.headers()).await;
    }

    protected(&gateway, request, next).await
}

async fn protected(gateway: &Gateway, mut request: Request, next: Next) -> Response {
    let Some(session) = gateway.resolve_session(request.headers()) else {
        return unauthenticated(gateway, &request);
    };

    if session.tokens().is_valid() {
        request.extensions_mut().insert(session);
        return next.run(request).await;
    }

    tracing::debug!(provider = %session.provider(), "access token expired");
    let renewed = match oidc::refresh(gateway.registry(), &session, gateway.http()).await {
        Ok(renewed) => renewed,
        Err(report) => {
            tracing::info!(provider = %session.provider(), error = %report, "session refresh failed");
            return unauthenticated(gateway, &request);
        }
    };

    let cookies = gateway.cookies();
    let jar = match cookies.set(
        cookies.jar(request.headers()),
        gateway.settings().session_cookie(),
        &renewed,
        gateway.settings().session_max_age(),
    ) {
        Ok(jar) => jar,
        Err(report) => {
            return GatewayError::CookieWrite {
                details: report.to_string(),
            }
            .into_response();
        }
    };

    request.extensions_mut().insert::<Session>(renewed);
    (jar, next.run(request).await).into_response()
}

/// Sends safe requests to the login page and refuses the rest.
fn unauthenticated(gateway: &Gateway, request: &Request) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return GatewayError::Unauthorized.into_response();
    }

    let origin = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    Redirect::to(&redirect::login_redirect(
        gateway.settings().login_path(),
        origin,
    ))
    .into_response()
}
