//! In-flight login record.
//!
//! Stored in the short-lived state cookie between the redirect to the
//! provider and the callback.

use serde::{Deserialize, Serialize};

/// The state of a login that has been started but not completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    /// The CSRF token sent as the OAuth2 `state` parameter.
    state: String,
    /// Where to send the user once the login completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin_uri: Option<String>,
    /// Registry key of the provider the user is logging in with.
    provider: String,
}

impl LoginState {
    #[must_use]
    pub fn new(state: String, origin_uri: Option<String>, provider: String) -> Self {
        Self {
            state,
            origin_uri: origin_uri.filter(|o| !o.is_empty()),
            provider,
        }
    }

    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    #[must_use]
    pub fn origin_uri(&self) -> Option<&str> {
        self.origin_uri.as_deref()
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Whether `state` echoed back by the provider matches this login.
    #[must_use]
    pub fn matches(&self, state: &str) -> bool {
        !self.state.is_empty() && self.state == state
    }
}
