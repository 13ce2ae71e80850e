//! Login, callback and logout flows.

use askama::Template;
use axum::{
    extract::Query,
    http::{HeaderMap, StatusCode, Uri, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use oidc_proxy_access::{LoginState, ProviderError, Session};
use serde::Deserialize;

use super::{Gateway, STATE_COOKIE, oidc, redirect};
use crate::error::GatewayError;

const LOGGED_OUT: &str = "logged out";

/// Query parameters of the login path.
#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    provider: Option<String>,
    origin_uri: Option<String>,
}

/// Query parameters the provider sends to the callback.
#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
    state: Option<String>,
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

fn query<T: serde::de::DeserializeOwned + Default>(uri: &Uri) -> T {
    Query::<T>::try_from_uri(uri)
        .map(|Query(query)| query)
        .unwrap_or_default()
}

/// Starts a login.
///
/// Without a `provider` parameter the provider selection page is shown.
/// Otherwise a fresh login state is stored in the state cookie and the user
/// is sent to the provider's authorization endpoint.
pub fn login(gateway: &Gateway, uri: &Uri, headers: &HeaderMap) -> Result<Response, GatewayError> {
    let LoginQuery {
        provider,
        origin_uri,
    } = query(uri);

    let Some(name) = provider.filter(|p| !p.is_empty()) else {
        return Ok(selection_page(gateway, origin_uri.as_deref()));
    };
    let provider = gateway
        .registry()
        .get(&name)
        .ok_or_else(|| GatewayError::UnknownProvider {
            provider: name.clone(),
        })?;

    let state = oidc::new_state();
    let login = LoginState::new(state.clone(), origin_uri, name);
    let cookies = gateway.cookies();
    let jar = cookies
        .set(
            cookies.jar(headers),
            STATE_COOKIE,
            &login,
            gateway.settings().state_max_age(),
        )
        .map_err(|report| GatewayError::CookieWrite {
            details: report.to_string(),
        })?;

    let url = oidc::authorization_url(provider, &state);
    tracing::debug!(provider = %provider.name(), "redirecting to authorization endpoint");
    Ok((jar, Redirect::to(url.as_str())).into_response())
}

/// The provider selection page.
#[derive(Template)]
#[template(path = "select_provider.html")]
struct SelectionPage<'a> {
    providers: Vec<ProviderLink<'a>>,
}

struct ProviderLink<'a> {
    href: String,
    label: &'a str,
}

fn selection_page(gateway: &Gateway, origin: Option<&str>) -> Response {
    let login_path = gateway.settings().login_path();
    let page = SelectionPage {
        providers: gateway
            .registry()
            .iter()
            .map(|provider| ProviderLink {
                href: redirect::provider_link(login_path, origin, provider.name()),
                label: provider.display_name(),
            })
            .collect(),
    };

    match page.render() {
        Ok(page) => ([(header::CACHE_CONTROL, "no-cache")], Html(page)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to render provider selection page");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Completes a login.
///
/// The state cookie is removed on every outcome, so a callback can never be
/// replayed.
pub async fn callback(gateway: &Gateway, uri: &Uri, headers: &HeaderMap) -> Response {
    let cookies = gateway.cookies();
    let jar = cookies.delete(cookies.jar(headers), STATE_COOKIE);

    let (session, origin) = match complete_login(gateway, uri, headers).await {
        Ok(done) => done,
        Err(err) => return (jar, err).into_response(),
    };

    match cookies.set(
        jar.clone(),
        gateway.settings().session_cookie(),
        &session,
        gateway.settings().session_max_age(),
    ) {
        Ok(jar) => (jar, Redirect::to(&origin)).into_response(),
        Err(report) => (
            jar,
            GatewayError::CookieWrite {
                details: report.to_string(),
            },
        )
            .into_response(),
    }
}

async fn complete_login(
    gateway: &Gateway,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<(Session, String), GatewayError> {
    let login = match gateway.cookies().get::<LoginState>(
        headers,
        STATE_COOKIE,
        gateway.settings().state_max_age(),
    ) {
        Ok(Some(login)) => login,
        Ok(None) => return Err(GatewayError::StateCookieMissing),
        Err(report) => {
            tracing::debug!(error = %report, "rejecting state cookie");
            return Err(GatewayError::InvalidStateCookie);
        }
    };

    let CallbackQuery {
        state,
        code,
        error,
        error_description,
    } = query(uri);

    if !login.matches(state.as_deref().unwrap_or_default()) {
        tracing::warn!(provider = %login.provider(), "callback state mismatch");
        return Err(GatewayError::StateMismatch);
    }

    if let Some(error) = error.filter(|e| !e.is_empty()) {
        return Err(GatewayError::ProviderRejected {
            error,
            description: error_description.filter(|d| !d.is_empty()),
        });
    }

    let provider = gateway.registry().get(login.provider()).ok_or_else(|| {
        GatewayError::UnknownProvider {
            provider: login.provider().to_string(),
        }
    })?;
    let code = code
        .filter(|c| !c.is_empty())
        .ok_or(GatewayError::MissingCode)?;

    let session = oidc::establish_session(provider, &code, gateway.http())
        .await
        .map_err(|report| match report.current_context() {
            ProviderError::MissingIdToken { .. } => GatewayError::MissingIdToken,
            ProviderError::InvalidIdToken { details, .. } => GatewayError::InvalidIdToken {
                details: details.clone(),
            },
            ProviderError::TokenExchange { details, .. } => GatewayError::TokenExchange {
                details: details.clone(),
            },
            other => GatewayError::TokenExchange {
                details: other.to_string(),
            },
        })?;

    Ok((session, redirect::local_origin(login.origin_uri())))
}

/// Ends the session.
///
/// The session cookie is removed first and unconditionally. Revocation is
/// best effort; a configured end-session endpoint takes over the response.
pub async fn logout(gateway: &Gateway, headers: &HeaderMap) -> Response {
    let cookies = gateway.cookies();
    let jar = cookies.delete(cookies.jar(headers), gateway.settings().session_cookie());

    let Some(session) = gateway.resolve_session(headers) else {
        return (jar, LOGGED_OUT).into_response();
    };
    let Some(provider) = gateway.registry().get(session.provider()) else {
        tracing::debug!(provider = %session.provider(), "session provider no longer registered");
        return (jar, LOGGED_OUT).into_response();
    };

    if let Err(report) = oidc::revoke(provider, &session, gateway.http()).await {
        tracing::warn!(provider = %provider.name(), error = %report, "token revocation failed");
    }

    if let Some(url) = oidc::end_session_url(provider, &session) {
        return (jar, Redirect::to(url.as_str())).into_response();
    }

    (jar, LOGGED_OUT).into_response()
}
