//! Error types for the gateway's HTTP surface and process startup.
//!
//! `GatewayError` is the only error a client ever sees. It maps the domain
//! errors from `oidc_proxy_access` to a status code and a plain-text body.
//! Cookie encoding failures are logged but not echoed.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use oidc_proxy_access::ConfigError;
use rootcause::prelude::Report;

/// Terminal failures of a single gateway request.
#[derive(Debug)]
pub enum GatewayError {
    /// An unsafe method reached a protected path without a usable session.
    Unauthorized,
    /// The login or callback named a provider that is not registered.
    UnknownProvider { provider: String },
    /// The callback arrived without a state cookie.
    StateCookieMissing,
    /// The state cookie failed verification or expired.
    InvalidStateCookie,
    /// The callback `state` does not match the stored login state.
    StateMismatch,
    /// The provider redirected back with an `error` parameter.
    ProviderRejected {
        error: String,
        description: Option<String>,
    },
    /// The callback carried neither a code nor an error.
    MissingCode,
    /// The authorization code exchange failed.
    TokenExchange { details: String },
    /// An OIDC token response carried no identity token.
    MissingIdToken,
    /// The identity token failed verification.
    InvalidIdToken { details: String },
    /// A cookie could not be encoded.
    CookieWrite { details: String },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::UnknownProvider { provider } => write!(f, "unknown provider {provider}"),
            Self::StateCookieMissing => write!(f, "state cookie missing"),
            Self::InvalidStateCookie => write!(f, "invalid state cookie"),
            Self::StateMismatch => write!(f, "state mismatch"),
            Self::ProviderRejected { error, description } => match description {
                Some(description) => write!(f, "{error}: {description}"),
                None => write!(f, "{error}"),
            },
            Self::MissingCode => write!(f, "missing authorization code"),
            Self::TokenExchange { details } => write!(f, "token exchange failed: {details}"),
            Self::MissingIdToken => write!(f, "missing id_token"),
            Self::InvalidIdToken { details } => write!(f, "invalid id_token: {details}"),
            Self::CookieWrite { details } => write!(f, "failed to write cookie: {details}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// The HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UnknownProvider { .. }
            | Self::StateCookieMissing
            | Self::InvalidStateCookie
            | Self::StateMismatch
            | Self::MissingCode => StatusCode::BAD_REQUEST,
            Self::ProviderRejected { .. }
            | Self::TokenExchange { .. }
            | Self::MissingIdToken
            | Self::InvalidIdToken { .. }
            | Self::CookieWrite { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::TokenExchange { .. } | Self::InvalidIdToken { .. } | Self::MissingIdToken => {
                tracing::error!(error = %self, "login failed");
                self.to_string()
            }
            Self::CookieWrite { details } => {
                tracing::error!(error = %details, "cookie write failed");
                "internal server error".to_string()
            }
            Self::ProviderRejected { .. } => {
                tracing::warn!(error = %self, "provider rejected login");
                self.to_string()
            }
            _ => {
                tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
                self.to_string()
            }
        };

        (status, message).into_response()
    }
}

/// Failures that stop the process before it serves any request.
///
/// The underlying [`ConfigError`] stays in the report chain below
/// [`StartupError::Config`].
#[derive(Debug)]
pub enum StartupError {
    /// The configuration is incomplete or invalid.
    Config,
    /// The listen address could not be resolved or bound.
    Bind { addr: String, details: String },
    /// The TLS certificate or key could not be loaded.
    Tls { details: String },
    /// The server stopped with an I/O error.
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "invalid configuration"),
            Self::Bind { addr, details } => write!(f, "failed to bind to {addr}: {details}"),
            Self::Tls { details } => write!(f, "failed to load tls certificate: {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

impl StartupError {
    /// Wraps a configuration failure, keeping it as the cause.
    pub fn config(report: Report<ConfigError>) -> Report<Self> {
        report.context(Self::Config)
    }
}
