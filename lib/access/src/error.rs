//! Error types for the access crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ConfigError`: Startup failures (fatal, the process never serves)
//! - `CookieError`: Cookie codec failures (always degrade to "no value")
//! - `ProviderError`: Failures talking to an identity provider

use std::fmt;

/// Errors raised while assembling the gateway configuration.
///
/// Any of these aborts startup; there is no partially initialized registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A provider has no client id.
    MissingClientId { provider: String },
    /// A required endpoint is empty after discovery and overrides.
    MissingEndpoint {
        provider: String,
        endpoint: &'static str,
    },
    /// A configured or discovered URL does not parse.
    InvalidUrl {
        provider: String,
        field: &'static str,
        details: String,
    },
    /// Fetching the issuer's metadata or key set failed.
    Discovery { provider: String, details: String },
    /// The discovery document names a different issuer.
    IssuerMismatch {
        provider: String,
        expected: String,
        found: String,
    },
    /// Neither the environment nor a provider file configured a provider.
    NoProviders,
    /// No callback URL was configured.
    MissingCallbackUrl,
    /// The callback URL does not parse as an absolute URL.
    InvalidCallbackUrl { details: String },
    /// Cookie key material has an unsupported length.
    InvalidCookieKey { name: &'static str, length: usize },
    /// The provider configuration file could not be read or parsed.
    ProviderFile { path: String, details: String },
    /// The upstream URL does not parse.
    InvalidUpstream { details: String },
    /// Only one of the TLS certificate and key was configured.
    IncompleteTls { missing: &'static str },
    /// Loading settings from the environment failed.
    Load { details: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingClientId { provider } => {
                write!(f, "client id missing in configuration of provider '{provider}'")
            }
            Self::MissingEndpoint { provider, endpoint } => {
                write!(f, "{endpoint} endpoint not set for provider '{provider}'")
            }
            Self::InvalidUrl {
                provider,
                field,
                details,
            } => {
                write!(f, "invalid {field} for provider '{provider}': {details}")
            }
            Self::Discovery { provider, details } => {
                write!(f, "OIDC discovery failed for provider '{provider}': {details}")
            }
            Self::IssuerMismatch {
                provider,
                expected,
                found,
            } => {
                write!(
                    f,
                    "provider '{provider}' issuer mismatch: expected '{expected}', discovered '{found}'"
                )
            }
            Self::NoProviders => write!(f, "no configured providers"),
            Self::MissingCallbackUrl => write!(f, "callback url not set"),
            Self::InvalidCallbackUrl { details } => {
                write!(f, "invalid callback url: {details}")
            }
            Self::InvalidCookieKey { name, length } => {
                write!(
                    f,
                    "{name} has invalid key length {length}. a length of 32 or 64 is required"
                )
            }
            Self::ProviderFile { path, details } => {
                write!(f, "failed to read provider config '{path}': {details}")
            }
            Self::InvalidUpstream { details } => write!(f, "invalid upstream url: {details}"),
            Self::IncompleteTls { missing } => {
                write!(f, "tls {missing} not set, both certificate and key are required")
            }
            Self::Load { details } => write!(f, "failed to load configuration: {details}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors from the secure cookie codec.
///
/// The gateway never surfaces these to the client; a cookie that fails to
/// decode is treated exactly like a missing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieError {
    /// The cookie is present but failed authentication (tampered or foreign key).
    Invalid { name: String },
    /// The cookie authenticated but is older than its maximum age.
    Expired { name: String },
    /// The value could not be serialized.
    Encode { name: String, details: String },
    /// The authenticated payload could not be deserialized.
    Decode { name: String, details: String },
}

impl fmt::Display for CookieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { name } => write!(f, "cookie '{name}' failed verification"),
            Self::Expired { name } => write!(f, "cookie '{name}' has expired"),
            Self::Encode { name, details } => {
                write!(f, "failed to encode cookie '{name}': {details}")
            }
            Self::Decode { name, details } => {
                write!(f, "failed to decode cookie '{name}': {details}")
            }
        }
    }
}

impl std::error::Error for CookieError {}

/// Errors from identity provider interactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider is not (or no longer) registered.
    UnknownProvider { provider: String },
    /// The session cannot be renewed because it carries no refresh token.
    NoRefreshToken,
    /// The authorization code exchange failed.
    TokenExchange { provider: String, details: String },
    /// The refresh grant failed.
    Refresh { provider: String, details: String },
    /// An OIDC provider answered the code exchange without an identity token.
    MissingIdToken { provider: String },
    /// The identity token failed signature, issuer, audience or expiry checks.
    InvalidIdToken { provider: String, details: String },
    /// Token revocation failed.
    Revocation { provider: String, details: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider { provider } => write!(f, "unknown provider {provider}"),
            Self::NoRefreshToken => {
                write!(
                    f,
                    "token expired or missing and no refresh token available"
                )
            }
            Self::TokenExchange { provider, details } => {
                write!(f, "token exchange with '{provider}' failed: {details}")
            }
            Self::Refresh { provider, details } => {
                write!(f, "token refresh with '{provider}' failed: {details}")
            }
            Self::MissingIdToken { provider } => {
                write!(f, "missing id_token in response from '{provider}'")
            }
            Self::InvalidIdToken { provider, details } => {
                write!(f, "failed to validate id_token from '{provider}': {details}")
            }
            Self::Revocation { provider, details } => {
                write!(f, "revocation at '{provider}' failed: {details}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_client_id_names_provider() {
        let err = ConfigError::MissingClientId {
            provider: "acme".to_string(),
        };
        assert!(err.to_string().contains("client id missing"));
        assert!(err.to_string().contains("acme"));
    }

    #[test]
    fn missing_endpoint_names_endpoint() {
        let err = ConfigError::MissingEndpoint {
            provider: "acme".to_string(),
            endpoint: "token",
        };
        assert_eq!(
            err.to_string(),
            "token endpoint not set for provider 'acme'"
        );
    }

    #[test]
    fn cookie_key_error_mentions_lengths() {
        let err = ConfigError::InvalidCookieKey {
            name: "cookie hash key",
            length: 12,
        };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("32 or 64"));
    }

    #[test]
    fn cookie_errors_name_the_cookie() {
        let err = CookieError::Invalid {
            name: "oprox".to_string(),
        };
        assert!(err.to_string().contains("oprox"));

        let err = CookieError::Expired {
            name: "state".to_string(),
        };
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn no_refresh_token_display() {
        assert_eq!(
            ProviderError::NoRefreshToken.to_string(),
            "token expired or missing and no refresh token available"
        );
    }

    #[test]
    fn provider_error_carries_cause() {
        let err = ProviderError::TokenExchange {
            provider: "acme".to_string(),
            details: "invalid_grant".to_string(),
        };
        assert!(err.to_string().contains("acme"));
        assert!(err.to_string().contains("invalid_grant"));
    }
}
