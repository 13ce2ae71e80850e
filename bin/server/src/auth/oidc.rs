//! Provider protocol calls: authorization request, code exchange, identity
//! token verification, refresh, revocation and RP-initiated logout.

use std::time::Duration;

use oauth2::{
    AuthorizationCode, CsrfToken, RefreshToken, RequestTokenError, Scope, TokenResponse,
    basic::{BasicErrorResponse, BasicTokenType},
};
use oidc_proxy_access::{ConfigError, ProviderError, Session, Tokens};
use openidconnect::{
    ClientId, ClientSecret, Nonce,
    core::{CoreIdToken, CoreIdTokenVerifier, CoreJwsSigningAlgorithm},
};
use rootcause::prelude::Report;
use tracing::instrument;
use url::Url;

use super::registry::{ProviderRegistry, ProviderTokenResponse, RegisteredProvider};

/// Builds the client used for every provider call.
///
/// Redirects are not followed and every request is bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, Report<ConfigError>> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::Load {
            details: format!("failed to create HTTP client: {e}"),
        })?;
    Ok(client)
}

/// A fresh CSRF state: 20 random bytes, base64url without padding.
pub fn new_state() -> String {
    CsrfToken::new_random_len(20).secret().clone()
}

/// The provider authorization URL for a login carrying `state`.
pub fn authorization_url(provider: &RegisteredProvider, state: &str) -> Url {
    let mut request = provider
        .client()
        .authorize_url(|| CsrfToken::new(state.to_string()));

    for scope in provider.provider().scopes() {
        request = request.add_scope(Scope::new(scope.clone()));
    }
    for (name, values) in provider.provider().authorization_parameters() {
        for value in values {
            request = request.add_extra_param(name.clone(), value.clone());
        }
    }

    let (url, _) = request.url();
    url
}

fn token_type(token_type: &BasicTokenType) -> String {
    match token_type {
        BasicTokenType::Bearer => "Bearer".to_string(),
        BasicTokenType::Mac => "MAC".to_string(),
        BasicTokenType::Extension(other) => other.clone(),
    }
}

fn tokens(response: &ProviderTokenResponse) -> Tokens {
    let tokens = Tokens::new(
        response.access_token().secret().clone(),
        token_type(response.token_type()),
    )
    .with_refresh_token(response.refresh_token().map(|t| t.secret().clone()));
    match response.expires_in() {
        Some(lifetime) => tokens.expiring_in(lifetime),
        None => tokens,
    }
}

fn describe<RE: std::error::Error>(err: RequestTokenError<RE, BasicErrorResponse>) -> String {
    match err {
        RequestTokenError::ServerResponse(response) => response.to_string(),
        RequestTokenError::Request(e) => format!("request failed: {e}"),
        RequestTokenError::Parse(e, _) => format!("invalid token response: {e}"),
        RequestTokenError::Other(details) => details,
    }
}

/// Exchanges an authorization code and builds the resulting session.
///
/// For OIDC providers the token response must carry an identity token, which
/// is verified before the session is returned.
#[instrument(skip_all, fields(provider = %provider.name()))]
pub async fn establish_session(
    provider: &RegisteredProvider,
    code: &str,
    http: &reqwest::Client,
) -> Result<Session, Report<ProviderError>> {
    let mut request = provider
        .client()
        .exchange_code(AuthorizationCode::new(code.to_string()));
    for (name, values) in provider.provider().token_parameters() {
        for value in values {
            request = request.add_extra_param(name.clone(), value.clone());
        }
    }

    let response = request
        .request_async(http)
        .await
        .map_err(|e| ProviderError::TokenExchange {
            provider: provider.name().to_string(),
            details: describe(e),
        })?;

    let id_token = response
        .extra_fields()
        .id_token
        .clone()
        .filter(|t| !t.is_empty());

    if provider.verification().is_some() {
        let Some(raw) = id_token.as_deref() else {
            return Err(ProviderError::MissingIdToken {
                provider: provider.name().to_string(),
            }
            .into());
        };
        let subject = verify_id_token(provider, raw)?;
        tracing::info!(subject = %subject, "identity token verified");
    }

    let session = Session::new(provider.name().to_string(), tokens(&response), id_token);
    tracing::info!(
        refresh_token = session.tokens().refresh_token().is_some(),
        expiry = ?session.tokens().expiry(),
        "tokens issued"
    );
    Ok(session)
}

/// Verifies signature, issuer, audience and expiry of an identity token and
/// returns its subject.
pub fn verify_id_token(
    provider: &RegisteredProvider,
    raw: &str,
) -> Result<String, Report<ProviderError>> {
    let invalid = |details: String| ProviderError::InvalidIdToken {
        provider: provider.name().to_string(),
        details,
    };

    let verification = provider
        .verification()
        .ok_or_else(|| invalid("provider has no issuer".to_string()))?;

    let id_token: CoreIdToken = serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| invalid(format!("malformed token: {e}")))?;

    let client_id = ClientId::new(provider.provider().client_id().to_string());
    let client_secret = provider.provider().client_secret();
    let mut algorithms = vec![
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256,
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha384,
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha512,
        CoreJwsSigningAlgorithm::RsaSsaPssSha256,
        CoreJwsSigningAlgorithm::EcdsaP256Sha256,
        CoreJwsSigningAlgorithm::EcdsaP384Sha384,
    ];
    // a MAC keyed with an empty secret proves nothing
    let verifier = if client_secret.is_empty() {
        CoreIdTokenVerifier::new_public_client(
            client_id,
            verification.issuer.clone(),
            verification.keys.clone(),
        )
    } else {
        algorithms.push(CoreJwsSigningAlgorithm::HmacSha256);
        CoreIdTokenVerifier::new_confidential_client(
            client_id,
            ClientSecret::new(client_secret.to_string()),
            verification.issuer.clone(),
            verification.keys.clone(),
        )
    };
    let verifier = verifier.set_allowed_algs(algorithms);

    // nonces are not used by this gateway
    let claims = id_token
        .claims(&verifier, |_: Option<&Nonce>| -> Result<(), String> { Ok(()) })
        .map_err(|e| invalid(e.to_string()))?;

    Ok(claims.subject().as_str().to_string())
}

/// Renews an expired session with its refresh token.
///
/// Only the refresh token is sent. The renewed session keeps the provider and,
/// when the response omits them, the previous refresh and identity tokens.
#[instrument(skip_all, fields(provider = %session.provider()))]
pub async fn refresh(
    registry: &ProviderRegistry,
    session: &Session,
    http: &reqwest::Client,
) -> Result<Session, Report<ProviderError>> {
    let Some(refresh_token) = session.tokens().refresh_token() else {
        return Err(ProviderError::NoRefreshToken.into());
    };
    let provider =
        registry
            .get(session.provider())
            .ok_or_else(|| ProviderError::UnknownProvider {
                provider: session.provider().to_string(),
            })?;

    let refresh_token = RefreshToken::new(refresh_token.to_string());
    let response = provider
        .client()
        .exchange_refresh_token(&refresh_token)
        .request_async(http)
        .await
        .map_err(|e| ProviderError::Refresh {
            provider: provider.name().to_string(),
            details: describe(e),
        })?;

    let renewed = session.renewed(tokens(&response), response.extra_fields().id_token.clone());
    tracing::info!(
        rotated = response.refresh_token().is_some(),
        expiry = ?renewed.tokens().expiry(),
        "access token refreshed"
    );
    Ok(renewed)
}

/// Revokes the session's refresh token (or access token if it has none).
///
/// Does nothing when the provider has no revocation endpoint.
#[instrument(skip_all, fields(provider = %provider.name()))]
pub async fn revoke(
    provider: &RegisteredProvider,
    session: &Session,
    http: &reqwest::Client,
) -> Result<(), Report<ProviderError>> {
    let Some(endpoint) = provider.provider().endpoints().revocation() else {
        return Ok(());
    };
    let failed = |details: String| ProviderError::Revocation {
        provider: provider.name().to_string(),
        details,
    };

    let token = session
        .tokens()
        .refresh_token()
        .unwrap_or(session.tokens().access_token());
    let response = http
        .post(endpoint)
        .form(&[
            ("token", token),
            ("client_id", provider.provider().client_id()),
            ("client_secret", provider.provider().client_secret()),
        ])
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    if !(status.is_success() || status.is_redirection()) {
        return Err(failed(format!("unexpected status {status}")).into());
    }

    tracing::debug!("token revoked");
    Ok(())
}

/// The RP-initiated logout URL, with `id_token_hint` when the session has an
/// identity token.
pub fn end_session_url(provider: &RegisteredProvider, session: &Session) -> Option<Url> {
    let endpoint = provider.provider().endpoints().end_session()?;
    let mut url = Url::parse(endpoint).ok()?;
    if let Some(id_token) = session.id_token() {
        url.query_pairs_mut().append_pair("id_token_hint", id_token);
    }
    Some(url)
}
