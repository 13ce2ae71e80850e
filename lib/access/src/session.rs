//! Authenticated session model.
//!
//! A session is what the gateway keeps in the session cookie after a
//! successful login: the provider that authenticated the user, the token set
//! it issued, and for OIDC providers the raw identity token.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Tokens that expire within this window are treated as already expired, so a
/// request is never forwarded with a token that dies in flight.
const EXPIRY_SKEW: TimeDelta = TimeDelta::seconds(10);

/// An OAuth2 token set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    access_token: String,
    token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
}

impl Tokens {
    /// Creates a token set with no refresh token and no expiry.
    #[must_use]
    pub fn new(access_token: String, token_type: String) -> Self {
        Self {
            access_token,
            token_type,
            refresh_token: None,
            expiry: None,
        }
    }

    /// Sets (or clears) the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token.filter(|t| !t.is_empty());
        self
    }

    /// Sets the expiry relative to now.
    #[must_use]
    pub fn expiring_in(mut self, lifetime: Duration) -> Self {
        self.expiry = TimeDelta::from_std(lifetime)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta));
        self
    }

    /// Sets an absolute expiry.
    #[must_use]
    pub fn with_expiry(mut self, expiry: Option<DateTime<Utc>>) -> Self {
        self.expiry = expiry;
        self
    }

    /// Returns the access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the token type, usually `Bearer`.
    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Returns the refresh token, if the provider issued one.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Returns the access token expiry, if the provider reported one.
    #[must_use]
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// Whether the access token is usable right now.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Whether the access token is usable at `now`.
    ///
    /// A token without an expiry never expires.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expiry {
            None => true,
            Some(expiry) => expiry > now + EXPIRY_SKEW,
        }
    }
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    provider: String,
    tokens: Tokens,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
}

impl Session {
    /// Creates a session for the provider registered under `provider`.
    #[must_use]
    pub fn new(provider: String, tokens: Tokens, id_token: Option<String>) -> Self {
        Self {
            provider,
            tokens,
            id_token: id_token.filter(|t| !t.is_empty()),
        }
    }

    /// Returns the registry key of the authenticating provider.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Returns the token set.
    #[must_use]
    pub fn tokens(&self) -> &Tokens {
        &self.tokens
    }

    /// Returns the raw identity token, if any.
    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    /// Builds the session that replaces this one after a token refresh.
    ///
    /// Providers commonly omit the refresh token and identity token from a
    /// refresh response; the previous values carry over in that case.
    #[must_use]
    pub fn renewed(&self, mut tokens: Tokens, id_token: Option<String>) -> Self {
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = self.tokens.refresh_token.clone();
        }
        let id_token = id_token
            .filter(|t| !t.is_empty())
            .or_else(|| self.id_token.clone());
        Self {
            provider: self.provider.clone(),
            tokens,
            id_token,
        }
    }
}
