//! Identity provider configuration.
//!
//! A `Provider` is the static description of one OAuth2 / OpenID Connect
//! identity provider, as read from the environment or the provider file.
//! Endpoint URLs may be given explicitly, discovered from the issuer, or both;
//! see [`Endpoints::merge`] for the precedence rules.

use std::collections::BTreeMap;

use rootcause::Report;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The endpoint set of a provider.
///
/// Every endpoint is independently optional. An empty string is treated the
/// same as an absent value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(
        default,
        rename = "authorization_endpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub authorization: Option<String>,
    #[serde(
        default,
        rename = "token_endpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<String>,
    #[serde(
        default,
        rename = "introspection_endpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub introspection: Option<String>,
    #[serde(
        default,
        rename = "userinfo_endpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub userinfo: Option<String>,
    #[serde(
        default,
        rename = "end_session_endpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_session: Option<String>,
    #[serde(
        default,
        rename = "revocation_endpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub revocation: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn fill(slot: &mut Option<String>, fallback: &Option<String>) {
    if non_empty(slot).is_none() {
        if let Some(value) = non_empty(fallback) {
            *slot = Some(value.to_string());
        }
    }
}

impl Endpoints {
    /// Fills every empty endpoint from `discovered`.
    ///
    /// Non-empty values already present are never overwritten, so merging the
    /// same discovered set twice is the same as merging it once.
    pub fn merge(&mut self, discovered: &Endpoints) {
        fill(&mut self.authorization, &discovered.authorization);
        fill(&mut self.token, &discovered.token);
        fill(&mut self.introspection, &discovered.introspection);
        fill(&mut self.userinfo, &discovered.userinfo);
        fill(&mut self.end_session, &discovered.end_session);
        fill(&mut self.revocation, &discovered.revocation);
    }

    /// Returns the authorization endpoint, if set.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        non_empty(&self.authorization)
    }

    /// Returns the token endpoint, if set.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        non_empty(&self.token)
    }

    /// Returns the introspection endpoint, if set.
    #[must_use]
    pub fn introspection(&self) -> Option<&str> {
        non_empty(&self.introspection)
    }

    /// Returns the userinfo endpoint, if set.
    #[must_use]
    pub fn userinfo(&self) -> Option<&str> {
        non_empty(&self.userinfo)
    }

    /// Returns the RP-initiated logout endpoint, if set.
    #[must_use]
    pub fn end_session(&self) -> Option<&str> {
        non_empty(&self.end_session)
    }

    /// Returns the token revocation endpoint, if set.
    #[must_use]
    pub fn revocation(&self) -> Option<&str> {
        non_empty(&self.revocation)
    }
}

/// Configuration for one identity provider.
///
/// Providers without an issuer URL are plain OAuth2: no discovery happens and
/// no identity token is required or verified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Human readable label shown on the provider selection page.
    #[serde(default, rename = "name", alias = "display_name")]
    display_name: Option<String>,
    /// The OIDC issuer URL, used for discovery and identity token checks.
    #[serde(default)]
    issuer_url: Option<String>,
    /// The OAuth2 client ID registered with the provider.
    #[serde(default)]
    client_id: String,
    /// The OAuth2 client secret.
    #[serde(default)]
    client_secret: String,
    /// Scopes to request, in order.
    #[serde(default)]
    scopes: Vec<String>,
    /// Extra query parameters for the authorization request.
    #[serde(default)]
    authorization_parameters: BTreeMap<String, Vec<String>>,
    /// Extra form parameters for the token request.
    #[serde(default)]
    token_parameters: BTreeMap<String, Vec<String>>,
    /// Explicitly configured endpoints.
    #[serde(flatten)]
    endpoints: Endpoints,
}

impl Provider {
    /// Creates a provider with the given client credentials and nothing else.
    #[must_use]
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
            ..Self::default()
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: String) -> Self {
        self.display_name = Some(name);
        self
    }

    /// Sets the issuer URL, enabling discovery and identity token checks.
    #[must_use]
    pub fn with_issuer_url(mut self, issuer_url: String) -> Self {
        self.issuer_url = Some(issuer_url);
        self
    }

    /// Replaces the scopes, dropping duplicates while keeping order.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes.clear();
        for scope in scopes {
            self = self.add_scope(scope);
        }
        self
    }

    /// Adds a scope unless it is already requested.
    #[must_use]
    pub fn add_scope(mut self, scope: String) -> Self {
        if !scope.is_empty() && !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Adds one value of an authorization request parameter.
    #[must_use]
    pub fn with_authorization_parameter(mut self, name: String, value: String) -> Self {
        self.authorization_parameters
            .entry(name)
            .or_default()
            .push(value);
        self
    }

    /// Adds one value of a token request parameter.
    #[must_use]
    pub fn with_token_parameter(mut self, name: String, value: String) -> Self {
        self.token_parameters.entry(name).or_default().push(value);
        self
    }

    /// Sets the explicitly configured endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Returns the display name, if one is configured.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref().filter(|n| !n.is_empty())
    }

    /// Returns the issuer URL, if this is an OIDC provider.
    #[must_use]
    pub fn issuer_url(&self) -> Option<&str> {
        self.issuer_url.as_deref().filter(|u| !u.is_empty())
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the requested scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Returns the extra authorization request parameters.
    #[must_use]
    pub fn authorization_parameters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.authorization_parameters
    }

    /// Returns the extra token request parameters.
    #[must_use]
    pub fn token_parameters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.token_parameters
    }

    /// Returns the configured endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Returns the endpoints mutably, for merging in discovered values.
    pub fn endpoints_mut(&mut self) -> &mut Endpoints {
        &mut self.endpoints
    }
}

/// Parses a provider file: a JSON object mapping registry keys to providers.
///
/// `source` names the file in error messages.
pub fn parse_provider_set(
    source: &str,
    json: &str,
) -> Result<BTreeMap<String, Provider>, Report<ConfigError>> {
    let providers: BTreeMap<String, Provider> =
        serde_json::from_str(json).map_err(|e| ConfigError::ProviderFile {
            path: source.to_string(),
            details: e.to_string(),
        })?;
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovered() -> Endpoints {
        Endpoints {
            authorization: Some("https://idp.example.com/authorize".to_string()),
            token: Some("https://idp.example.com/token".to_string()),
            introspection: Some("https://idp.example.com/introspect".to_string()),
            userinfo: Some("https://idp.example.com/userinfo".to_string()),
            end_session: Some("https://idp.example.com/logout".to_string()),
            revocation: Some("https://idp.example.com/revoke".to_string()),
        }
    }

    #[test]
    fn merge_fills_empty_endpoints() {
        let mut endpoints = Endpoints::default();
        endpoints.merge(&discovered());
        assert_eq!(endpoints, discovered());
    }

    #[test]
    fn merge_keeps_explicit_endpoints() {
        let mut endpoints = Endpoints {
            token: Some("https://override.example.com/token".to_string()),
            revocation: Some("https://override.example.com/revoke".to_string()),
            ..Endpoints::default()
        };
        endpoints.merge(&discovered());

        assert_eq!(endpoints.token(), Some("https://override.example.com/token"));
        assert_eq!(
            endpoints.revocation(),
            Some("https://override.example.com/revoke")
        );
        assert_eq!(
            endpoints.authorization(),
            Some("https://idp.example.com/authorize")
        );
    }

    #[test]
    fn merge_treats_empty_string_as_unset() {
        let mut endpoints = Endpoints {
            token: Some(String::new()),
            ..Endpoints::default()
        };
        endpoints.merge(&discovered());
        assert_eq!(endpoints.token(), Some("https://idp.example.com/token"));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut once = Endpoints {
            userinfo: Some("https://override.example.com/userinfo".to_string()),
            ..Endpoints::default()
        };
        once.merge(&discovered());

        let mut twice = once.clone();
        twice.merge(&discovered());

        assert_eq!(once, twice);
    }

    #[test]
    fn merge_does_not_copy_empty_discovered_values() {
        let mut endpoints = Endpoints::default();
        endpoints.merge(&Endpoints {
            revocation: Some(String::new()),
            ..Endpoints::default()
        });
        assert_eq!(endpoints.revocation, None);
    }

    #[test]
    fn add_scope_does_not_duplicate() {
        let provider = Provider::new("client".to_string(), String::new())
            .with_scopes(vec![
                "openid".to_string(),
                "email".to_string(),
                "openid".to_string(),
            ])
            .add_scope("email".to_string())
            .add_scope("profile".to_string());

        assert_eq!(provider.scopes(), ["openid", "email", "profile"]);
    }

    #[test]
    fn empty_issuer_means_plain_oauth2() {
        let provider =
            Provider::new("client".to_string(), String::new()).with_issuer_url(String::new());
        assert!(provider.issuer_url().is_none());
    }

    #[test]
    fn multi_valued_parameters_accumulate() {
        let provider = Provider::new("client".to_string(), String::new())
            .with_authorization_parameter("resource".to_string(), "a".to_string())
            .with_authorization_parameter("resource".to_string(), "b".to_string())
            .with_token_parameter("audience".to_string(), "api".to_string());

        assert_eq!(
            provider.authorization_parameters().get("resource"),
            Some(&vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            provider.token_parameters().get("audience"),
            Some(&vec!["api".to_string()])
        );
    }

    #[test]
    fn provider_file_deserializes() {
        let json = r#"{
            "acme": {
                "name": "ACME Corp",
                "issuer_url": "https://idp.acme.test",
                "client_id": "proxy",
                "client_secret": "s3cret",
                "scopes": ["openid", "email"],
                "authorization_parameters": {"prompt": ["consent"]},
                "token_parameters": {"audience": ["api"]},
                "token_endpoint": "https://token.acme.test/token"
            },
            "github": {
                "client_id": "gh",
                "authorization_endpoint": "https://github.com/login/oauth/authorize",
                "token_endpoint": "https://github.com/login/oauth/access_token"
            }
        }"#;

        let providers = parse_provider_set("providers.json", json).expect("parse");
        assert_eq!(providers.len(), 2);

        let acme = &providers["acme"];
        assert_eq!(acme.display_name(), Some("ACME Corp"));
        assert_eq!(acme.issuer_url(), Some("https://idp.acme.test"));
        assert_eq!(acme.client_secret(), "s3cret");
        assert_eq!(acme.scopes(), ["openid", "email"]);
        assert_eq!(
            acme.endpoints().token(),
            Some("https://token.acme.test/token")
        );
        assert_eq!(acme.endpoints().authorization(), None);

        let github = &providers["github"];
        assert!(github.issuer_url().is_none());
        assert!(github.display_name().is_none());
        assert!(github.scopes().is_empty());
    }

    #[test]
    fn display_name_alias_is_accepted() {
        let json = r#"{"corp": {"display_name": "Corp SSO", "client_id": "c"}}"#;
        let providers = parse_provider_set("inline", json).expect("parse");
        assert_eq!(providers["corp"].display_name(), Some("Corp SSO"));
    }

    #[test]
    fn malformed_provider_file_is_config_error() {
        let result = parse_provider_set("broken.json", "{ not json");
        let report = result.expect_err("should fail");
        assert!(matches!(
            report.current_context(),
            ConfigError::ProviderFile { path, .. } if path == "broken.json"
        ));
    }
}
