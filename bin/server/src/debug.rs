//! Session summary page.
//!
//! Served on the debug path and, when no upstream is configured, for every
//! authenticated request.

use axum::{
    Json,
    extract::Request,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use oidc_proxy_access::Session;
use serde::Serialize;
use serde_json::Value;

/// What the summary shows. Token values themselves are never included.
#[derive(Debug, Serialize)]
struct SessionSummary {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
    access_token_valid: bool,
    has_refresh_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_token_claims: Option<Value>,
}

impl SessionSummary {
    fn anonymous() -> Self {
        Self {
            authenticated: false,
            provider: None,
            token_type: None,
            expiry: None,
            access_token_valid: false,
            has_refresh_token: false,
            id_token_claims: None,
        }
    }

    fn of(session: &Session) -> Self {
        let tokens = session.tokens();
        Self {
            authenticated: true,
            provider: Some(session.provider().to_string()),
            token_type: Some(tokens.token_type().to_string()),
            expiry: tokens.expiry(),
            access_token_valid: tokens.is_valid(),
            has_refresh_token: tokens.refresh_token().is_some(),
            id_token_claims: session.id_token().and_then(claims),
        }
    }
}

/// Decodes the payload of a JWT without verifying it. Display only.
fn claims(jwt: &str) -> Option<Value> {
    let payload = jwt.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Renders the session attached to `request` as JSON.
pub async fn session_info(request: Request) -> Response {
    let summary = request
        .extensions()
        .get::<Session>()
        .map_or_else(SessionSummary::anonymous, SessionSummary::of);
    Json(summary).into_response()
}
