//! The authentication gateway.
//!
//! This module provides:
//! - The provider registry, built once at startup from configuration plus
//!   OIDC discovery
//! - The cookie codec holding sessions and in-flight logins
//! - The login, callback and logout flows
//! - The gateway middleware deciding, per request, whether to run one of the
//!   flows or let the request through to the protected service
//!
//! # Statelessness
//!
//! Nothing is stored server side. The session cookie is the session and the
//! state cookie is the login in progress; both are signed or encrypted by
//! [`CookieCodec`]. The registry is immutable after startup, so requests share
//! it without locking.

pub mod cookie;
pub mod discovery;
pub mod middleware;
pub mod oidc;
pub mod redirect;
pub mod registry;
pub mod routes;

#[cfg(test)]
pub(crate) mod test_support;

use std::time::Duration;

use axum::http::HeaderMap;
use oidc_proxy_access::Session;
use url::Url;

pub use cookie::{CookieCodec, CookieMode, SecureCookies};
pub use middleware::gate;
pub use registry::{ProviderRegistry, RegisteredProvider};

/// Name of the cookie holding the in-flight [`LoginState`](oidc_proxy_access::LoginState).
pub const STATE_COOKIE: &str = "state";

/// Paths, cookie names and lifetimes used by the gateway.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    login_path: String,
    logout_path: String,
    debug_path: Option<String>,
    callback_url: Url,
    session_cookie: String,
    session_max_age: Duration,
    state_max_age: Duration,
}

impl GatewaySettings {
    /// Creates settings with the default paths and lifetimes.
    #[must_use]
    pub fn new(callback_url: Url) -> Self {
        Self {
            login_path: "/login".to_string(),
            logout_path: "/logout".to_string(),
            debug_path: Some("/debug".to_string()),
            callback_url,
            session_cookie: "oprox".to_string(),
            session_max_age: Duration::from_secs(30 * 24 * 60 * 60),
            state_max_age: Duration::from_secs(10 * 60),
        }
    }

    #[must_use]
    pub fn with_login_path(mut self, path: String) -> Self {
        self.login_path = path;
        self
    }

    #[must_use]
    pub fn with_logout_path(mut self, path: String) -> Self {
        self.logout_path = path;
        self
    }

    /// Sets the session introspection path; `None` disables it.
    #[must_use]
    pub fn with_debug_path(mut self, path: Option<String>) -> Self {
        self.debug_path = path.filter(|p| !p.is_empty());
        self
    }

    #[must_use]
    pub fn with_session_cookie(mut self, name: String) -> Self {
        self.session_cookie = name;
        self
    }

    #[must_use]
    pub fn with_session_max_age(mut self, max_age: Duration) -> Self {
        self.session_max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_state_max_age(mut self, max_age: Duration) -> Self {
        self.state_max_age = max_age;
        self
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn logout_path(&self) -> &str {
        &self.logout_path
    }

    pub fn debug_path(&self) -> Option<&str> {
        self.debug_path.as_deref()
    }

    pub fn callback_url(&self) -> &Url {
        &self.callback_url
    }

    /// The path the provider redirects back to, taken from the callback URL.
    pub fn callback_path(&self) -> &str {
        self.callback_url.path()
    }

    pub fn session_cookie(&self) -> &str {
        &self.session_cookie
    }

    pub fn session_max_age(&self) -> Duration {
        self.session_max_age
    }

    pub fn state_max_age(&self) -> Duration {
        self.state_max_age
    }
}

/// Shared gateway state.
pub struct Gateway {
    registry: ProviderRegistry,
    cookies: CookieCodec,
    settings: GatewaySettings,
    http: reqwest::Client,
}

impl Gateway {
    /// Creates a gateway. `http` is used for every call to a provider.
    pub fn new(
        registry: ProviderRegistry,
        cookies: CookieCodec,
        settings: GatewaySettings,
        http: reqwest::Client,
    ) -> Self {
        Self {
            registry,
            cookies,
            settings,
            http,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cookies(&self) -> &CookieCodec {
        &self.cookies
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Reads the session cookie.
    ///
    /// A missing, tampered or expired cookie all mean "no session".
    pub fn resolve_session(&self, headers: &HeaderMap) -> Option<Session> {
        match self.cookies.get::<Session>(
            headers,
            self.settings.session_cookie(),
            self.settings.session_max_age(),
        ) {
            Ok(Some(session)) => Some(session),
            Ok(None) => {
                tracing::debug!("no session cookie");
                None
            }
            Err(report) => {
                tracing::debug!(error = %report, "ignoring unreadable session cookie");
                None
            }
        }
    }
}
