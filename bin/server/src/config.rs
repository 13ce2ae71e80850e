//! Centralized server configuration.
//!
//! Loaded via the `config` crate from `OIDC_PROXY_*` environment variables,
//! e.g. `OIDC_PROXY_CLIENT_ID` or `OIDC_PROXY_CALLBACK_URL`. Command line
//! flags take precedence over the environment.
//!
//! Values are kept as written: client ids, secrets and key material that look
//! like numbers are never reinterpreted.

use std::{collections::BTreeMap, collections::HashMap, path::PathBuf, time::Duration};

use clap::Parser;
use oidc_proxy_access::{ConfigError, Provider, parse_provider_set};
use rootcause::prelude::Report;
use serde::Deserialize;
use url::Url;

use crate::auth::{CookieCodec, GatewaySettings};

/// Environment variable prefix.
const ENV_PREFIX: &str = "OIDC_PROXY";

/// Registry key of the provider configured directly in the environment.
pub const DEFAULT_PROVIDER: &str = "default";

/// Command line flags, each overriding the `OIDC_PROXY_*` variable of the
/// same name.
#[derive(Debug, Default, Parser)]
#[command(name = "oidc-proxy", version, about = "OpenID Connect / OAuth2 reverse proxy")]
pub struct Cli {
    /// Listen address
    #[arg(long)]
    pub addr: Option<String>,
    /// TLS certificate chain (PEM)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,
    /// TLS private key (PEM)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
    /// Url of the upstream; without one the session summary is served
    #[arg(long)]
    pub upstream: Option<String>,
    /// Callback URL
    #[arg(long)]
    pub callback_url: Option<String>,
    /// OIDC issuer url of the default provider
    #[arg(long)]
    pub issuer_url: Option<String>,
    /// Client id of the default provider
    #[arg(long)]
    pub client_id: Option<String>,
    /// Client secret of the default provider
    #[arg(long)]
    pub client_secret: Option<String>,
    /// Comma separated scopes of the default provider
    #[arg(long)]
    pub scopes: Option<String>,
    /// Provider configuration file
    #[arg(long)]
    pub provider_config: Option<PathBuf>,
    /// Cookie hash key
    #[arg(long)]
    pub cookie_hash_key: Option<String>,
    /// Cookie encryption key
    #[arg(long)]
    pub cookie_enc_key: Option<String>,
}

impl Cli {
    /// The flags that were given, keyed by configuration field.
    fn overrides(&self) -> Vec<(&'static str, String)> {
        let path = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string());
        [
            ("addr", self.addr.clone()),
            ("tls_cert", path(&self.tls_cert)),
            ("tls_key", path(&self.tls_key)),
            ("upstream", self.upstream.clone()),
            ("callback_url", self.callback_url.clone()),
            ("issuer_url", self.issuer_url.clone()),
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
            ("scopes", self.scopes.clone()),
            ("provider_config", path(&self.provider_config)),
            ("cookie_hash_key", self.cookie_hash_key.clone()),
            ("cookie_enc_key", self.cookie_enc_key.clone()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
        .collect()
    }
}

/// Certificate and key files for serving HTTPS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Serve HTTPS with this certificate chain and key.
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,

    /// Base URL authenticated requests are forwarded to. Without one, the
    /// session summary is served instead.
    #[serde(default)]
    pub upstream: Option<String>,

    /// Absolute URL the providers redirect back to.
    #[serde(default)]
    pub callback_url: Option<String>,

    #[serde(default)]
    pub issuer_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: String,
    /// Comma separated scopes of the default provider.
    #[serde(default = "default_scopes")]
    pub scopes: String,

    /// JSON file with additional providers.
    #[serde(default)]
    pub provider_config: Option<PathBuf>,

    #[serde(default)]
    pub cookie_hash_key: Option<String>,
    #[serde(default)]
    pub cookie_enc_key: Option<String>,
    #[serde(default = "default_session_cookie_name")]
    pub session_cookie_name: String,
    #[serde(default = "default_session_max_age_seconds")]
    pub session_max_age_seconds: u64,
    #[serde(default = "default_state_max_age_seconds")]
    pub state_max_age_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
    #[serde(default)]
    pub cookie_domain: Option<String>,

    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
    /// Session summary path; empty disables it.
    #[serde(default = "default_debug_path")]
    pub debug_path: String,

    /// Timeout of every outbound call to a provider.
    #[serde(default = "default_provider_timeout_seconds")]
    pub provider_timeout_seconds: u64,

    /// Whether to send the access token upstream as a bearer token.
    #[serde(default)]
    pub pass_access_token: bool,
}

fn default_addr() -> String {
    "localhost:8080".to_string()
}

fn default_scopes() -> String {
    "openid,email,profile,offline_access".to_string()
}

fn default_session_cookie_name() -> String {
    "oprox".to_string()
}

fn default_session_max_age_seconds() -> u64 {
    30 * 24 * 60 * 60
}

fn default_state_max_age_seconds() -> u64 {
    10 * 60
}

fn default_secure_cookies() -> bool {
    true
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_logout_path() -> String {
    "/logout".to_string()
}

fn default_debug_path() -> String {
    "/debug".to_string()
}

fn default_provider_timeout_seconds() -> u64 {
    10
}

impl ServerConfig {
    /// Loads configuration from environment variables overridden by `cli`.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed into its field.
    pub fn from_env(cli: &Cli) -> Result<Self, Report<ConfigError>> {
        Self::load(None, cli)
    }

    /// Loads configuration from `vars` instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, Report<ConfigError>> {
        Self::load(Some(vars), &Cli::default())
    }

    fn load(
        vars: Option<HashMap<String, String>>,
        cli: &Cli,
    ) -> Result<Self, Report<ConfigError>> {
        let failed = |e: config::ConfigError| ConfigError::Load {
            details: e.to_string(),
        };

        // strings stay strings; typed fields parse during deserialization
        let mut builder = config::Config::builder().add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .source(vars),
        );
        for (key, value) in cli.overrides() {
            builder = builder.set_override(key, value).map_err(failed)?;
        }

        let loaded = builder
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(failed)?;
        Ok(loaded)
    }

    /// Scopes of the default provider.
    pub fn scope_list(&self) -> Vec<String> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Every configured provider: the provider file entries plus the
    /// `default` provider when a client id is set in the environment.
    ///
    /// # Errors
    ///
    /// Fails if the provider file cannot be read or parsed, or if no provider
    /// is configured at all.
    pub fn providers(&self) -> Result<BTreeMap<String, Provider>, Report<ConfigError>> {
        let mut providers = match &self.provider_config {
            Some(path) => {
                let source = path.display().to_string();
                let json = std::fs::read_to_string(path).map_err(|e| ConfigError::ProviderFile {
                    path: source.clone(),
                    details: e.to_string(),
                })?;
                parse_provider_set(&source, &json)?
            }
            None => BTreeMap::new(),
        };

        if let Some(client_id) = self.client_id.as_ref().filter(|id| !id.is_empty()) {
            let mut provider = Provider::new(client_id.clone(), self.client_secret.clone())
                .with_scopes(self.scope_list());
            if let Some(issuer) = self.issuer_url.as_ref().filter(|i| !i.is_empty()) {
                provider = provider.with_issuer_url(issuer.clone());
            }
            providers.insert(DEFAULT_PROVIDER.to_string(), provider);
        }

        if providers.is_empty() {
            return Err(ConfigError::NoProviders.into());
        }
        Ok(providers)
    }

    /// Paths, cookie names and lifetimes of the gateway.
    pub fn gateway_settings(&self) -> Result<GatewaySettings, Report<ConfigError>> {
        let raw = self
            .callback_url
            .as_ref()
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingCallbackUrl)?;
        let callback_url = Url::parse(raw).map_err(|e| ConfigError::InvalidCallbackUrl {
            details: e.to_string(),
        })?;

        Ok(GatewaySettings::new(callback_url)
            .with_login_path(self.login_path.clone())
            .with_logout_path(self.logout_path.clone())
            .with_debug_path(Some(self.debug_path.clone()))
            .with_session_cookie(self.session_cookie_name.clone())
            .with_session_max_age(Duration::from_secs(self.session_max_age_seconds))
            .with_state_max_age(Duration::from_secs(self.state_max_age_seconds)))
    }

    /// The cookie codec for the configured key material.
    pub fn cookie_codec(&self) -> Result<CookieCodec, Report<ConfigError>> {
        let codec = CookieCodec::from_key_material(
            self.cookie_hash_key.as_deref().map(str::as_bytes),
            self.cookie_enc_key.as_deref().map(str::as_bytes),
        )?;
        Ok(codec
            .with_secure(self.secure_cookies)
            .with_domain(self.cookie_domain.clone()))
    }

    /// The upstream base URL, if any.
    pub fn upstream(&self) -> Result<Option<Url>, Report<ConfigError>> {
        match self.upstream.as_deref().filter(|u| !u.is_empty()) {
            Some(raw) => Url::parse(raw).map(Some).map_err(|e| {
                ConfigError::InvalidUpstream {
                    details: e.to_string(),
                }
                .into()
            }),
            None => Ok(None),
        }
    }

    /// The TLS files to serve HTTPS with, if any.
    ///
    /// # Errors
    ///
    /// Fails when only one of certificate and key is configured.
    pub fn tls(&self) -> Result<Option<TlsFiles>, Report<ConfigError>> {
        let set = |p: &Option<PathBuf>| p.clone().filter(|p| !p.as_os_str().is_empty());
        match (set(&self.tls_cert), set(&self.tls_key)) {
            (Some(cert), Some(key)) => Ok(Some(TlsFiles { cert, key })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(ConfigError::IncompleteTls { missing: "key" }.into()),
            (None, Some(_)) => Err(ConfigError::IncompleteTls {
                missing: "certificate",
            }
            .into()),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }
}
