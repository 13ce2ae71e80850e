//! The provider registry.
//!
//! Built once before serving starts and never mutated afterwards. Building is
//! all or nothing: a single misconfigured provider aborts startup.

use std::collections::BTreeMap;

use oauth2::{
    AuthUrl, Client, ClientId, ClientSecret, EndpointNotSet, EndpointSet, ExtraTokenFields,
    RedirectUrl, StandardRevocableToken, StandardTokenResponse, TokenUrl,
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenType,
    },
};
use oidc_proxy_access::{ConfigError, Provider};
use openidconnect::{IssuerUrl, core::CoreJsonWebKeySet};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use super::discovery;

/// Extra token response field carrying the OIDC identity token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenField {}

pub type ProviderTokenResponse = StandardTokenResponse<IdTokenField, BasicTokenType>;

/// OAuth2 client with authorization and token endpoints set.
pub type ProviderClient = Client<
    BasicErrorResponse,
    ProviderTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// What is needed to verify identity tokens of an OIDC provider.
#[derive(Debug, Clone)]
pub struct IdTokenVerification {
    pub issuer: IssuerUrl,
    pub keys: CoreJsonWebKeySet,
}

/// A provider ready to be used by the login flows.
#[derive(Debug)]
pub struct RegisteredProvider {
    name: String,
    provider: Provider,
    client: ProviderClient,
    verification: Option<IdTokenVerification>,
}

fn parse_url<T>(
    provider: &str,
    field: &'static str,
    value: &str,
    parse: impl FnOnce(String) -> Result<T, url::ParseError>,
) -> Result<T, ConfigError> {
    parse(value.to_string()).map_err(|e| ConfigError::InvalidUrl {
        provider: provider.to_string(),
        field,
        details: e.to_string(),
    })
}

fn require_client_id(name: &str, provider: &Provider) -> Result<(), ConfigError> {
    if provider.client_id().is_empty() {
        return Err(ConfigError::MissingClientId {
            provider: name.to_string(),
        });
    }
    Ok(())
}

impl RegisteredProvider {
    /// Registers `provider` with its final endpoint set.
    ///
    /// `keys` must be present for OIDC providers (those with an issuer).
    pub fn new(
        name: String,
        provider: Provider,
        redirect_url: &RedirectUrl,
        keys: Option<CoreJsonWebKeySet>,
    ) -> Result<Self, Report<ConfigError>> {
        require_client_id(&name, &provider)?;

        let endpoints = provider.endpoints();
        let authorization =
            endpoints
                .authorization()
                .ok_or_else(|| ConfigError::MissingEndpoint {
                    provider: name.clone(),
                    endpoint: "authorization",
                })?;
        let token = endpoints
            .token()
            .ok_or_else(|| ConfigError::MissingEndpoint {
                provider: name.clone(),
                endpoint: "token",
            })?;

        let auth_url = parse_url(&name, "authorization endpoint", authorization, AuthUrl::new)?;
        let token_url = parse_url(&name, "token endpoint", token, TokenUrl::new)?;
        for (field, value) in [
            ("revocation endpoint", endpoints.revocation()),
            ("end_session endpoint", endpoints.end_session()),
        ] {
            if let Some(value) = value {
                parse_url(&name, field, value, |v| Url::parse(&v))?;
            }
        }

        let mut client = Client::new(ClientId::new(provider.client_id().to_string()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url.clone());
        if !provider.client_secret().is_empty() {
            client = client.set_client_secret(ClientSecret::new(
                provider.client_secret().to_string(),
            ));
        }

        let verification = match provider.issuer_url() {
            Some(issuer) => {
                let issuer = parse_url(&name, "issuer url", issuer, IssuerUrl::new)?;
                let keys = keys.ok_or_else(|| ConfigError::Discovery {
                    provider: name.clone(),
                    details: "no signing keys".to_string(),
                })?;
                Some(IdTokenVerification { issuer, keys })
            }
            None => None,
        };

        Ok(Self {
            name,
            provider,
            client,
            verification,
        })
    }

    /// Discovers the provider's endpoints if it has an issuer, then registers
    /// it. Explicitly configured endpoints win over discovered ones.
    #[instrument(skip_all, fields(provider = %name))]
    pub async fn build(
        name: String,
        mut provider: Provider,
        redirect_url: &RedirectUrl,
        http: &reqwest::Client,
    ) -> Result<Self, Report<ConfigError>> {
        require_client_id(&name, &provider)?;

        let keys = match provider.issuer_url() {
            Some(issuer) => {
                let discovered = discovery::discover(&name, issuer, http).await?;
                provider.endpoints_mut().merge(&discovered.endpoints);
                Some(discovered.keys)
            }
            None => None,
        };

        Self::new(name, provider, redirect_url, keys)
    }

    /// The registry key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The label for the selection page, falling back to the registry key.
    pub fn display_name(&self) -> &str {
        self.provider.display_name().unwrap_or(&self.name)
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    /// Identity token verification material; `None` for plain OAuth2.
    pub fn verification(&self) -> Option<&IdTokenVerification> {
        self.verification.as_ref()
    }
}

/// All configured providers, by registry key.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, RegisteredProvider>,
}

impl ProviderRegistry {
    /// Builds the registry, discovering every OIDC provider in turn.
    pub async fn build(
        configs: BTreeMap<String, Provider>,
        callback_url: &Url,
        http: &reqwest::Client,
    ) -> Result<Self, Report<ConfigError>> {
        let redirect_url = RedirectUrl::from_url(callback_url.clone());

        let mut providers = BTreeMap::new();
        for (name, provider) in configs {
            let registered =
                RegisteredProvider::build(name.clone(), provider, &redirect_url, http).await?;
            tracing::info!(
                provider = %name,
                display_name = %registered.display_name(),
                issuer = registered.provider().issuer_url().unwrap_or("-"),
                "registered provider"
            );
            providers.insert(name, registered);
        }

        Ok(Self { providers })
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredProvider> {
        self.providers.get(name)
    }

    /// Providers in registry key order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProvider> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
