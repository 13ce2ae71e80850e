//! OpenID Connect discovery.
//!
//! Fetches the issuer's metadata document and its published signing keys.
//! Runs once per OIDC provider at startup; keys are not refreshed afterwards.

use oidc_proxy_access::{ConfigError, Endpoints};
use openidconnect::core::CoreJsonWebKeySet;
use rootcause::prelude::Report;
use serde::Deserialize;
use tracing::instrument;

/// The subset of the discovery document the gateway uses.
#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    #[serde(default)]
    jwks_uri: Option<String>,
    #[serde(flatten)]
    endpoints: Endpoints,
}

/// What discovery learned about an issuer.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub endpoints: Endpoints,
    pub keys: CoreJsonWebKeySet,
}

/// The metadata document URL for `issuer`.
pub fn metadata_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

fn same_issuer(configured: &str, discovered: &str) -> bool {
    configured.trim_end_matches('/') == discovered.trim_end_matches('/')
}

/// Fetches the metadata and key set of `issuer` for the provider `provider`.
#[instrument(skip_all, fields(provider = %provider, issuer = %issuer))]
pub async fn discover(
    provider: &str,
    issuer: &str,
    http: &reqwest::Client,
) -> Result<Discovered, Report<ConfigError>> {
    let failed = |details: String| ConfigError::Discovery {
        provider: provider.to_string(),
        details,
    };

    let metadata: ProviderMetadata = http
        .get(metadata_url(issuer))
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| failed(format!("failed to fetch provider metadata: {e}")))?
        .json()
        .await
        .map_err(|e| failed(format!("invalid provider metadata: {e}")))?;

    if !same_issuer(issuer, &metadata.issuer) {
        return Err(ConfigError::IssuerMismatch {
            provider: provider.to_string(),
            expected: issuer.to_string(),
            found: metadata.issuer,
        }
        .into());
    }

    let jwks_uri = metadata
        .jwks_uri
        .filter(|u| !u.is_empty())
        .ok_or_else(|| failed("provider metadata has no jwks_uri".to_string()))?;

    let keys: CoreJsonWebKeySet = http
        .get(&jwks_uri)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| failed(format!("failed to fetch key set: {e}")))?
        .json()
        .await
        .map_err(|e| failed(format!("invalid key set: {e}")))?;

    tracing::debug!(keys = keys.keys().len(), "discovered provider metadata");

    Ok(Discovered {
        endpoints: metadata.endpoints,
        keys,
    })
}
