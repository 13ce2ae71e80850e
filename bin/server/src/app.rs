//! Router assembly.

use std::sync::Arc;

use axum::{Router, middleware};
use oidc_proxy_access::ConfigError;
use rootcause::prelude::Report;

use crate::{
    auth::{self, Gateway, ProviderRegistry, STATE_COOKIE, oidc},
    config::ServerConfig,
    debug,
    forward::{self, Forwarder},
    logging,
};

/// The gateway in front of `forwarder`, or in front of the session summary
/// when there is no upstream.
pub fn router(gateway: Arc<Gateway>, forwarder: Option<Arc<Forwarder>>) -> Router {
    let inner = match forwarder {
        Some(forwarder) => Router::new().fallback(forward::proxy).with_state(forwarder),
        None => Router::new().fallback(debug::session_info),
    };

    inner
        .layer(middleware::from_fn_with_state(gateway, auth::gate))
        .layer(middleware::from_fn(logging::log_requests))
}

/// Builds the complete application from configuration.
///
/// Runs OIDC discovery for every provider with an issuer; any failure aborts
/// startup.
pub async fn build(config: &ServerConfig) -> Result<Router, Report<ConfigError>> {
    let settings = config.gateway_settings()?;
    let http = oidc::http_client(config.provider_timeout())?;
    let registry =
        ProviderRegistry::build(config.providers()?, settings.callback_url(), &http).await?;
    let cookies = config.cookie_codec()?;

    let forwarder = match config.upstream()? {
        Some(upstream) => Some(Arc::new(
            Forwarder::new(upstream, forward::upstream_client()?)
                .with_pass_access_token(config.pass_access_token)
                .with_withheld_cookies(vec![
                    settings.session_cookie().to_string(),
                    STATE_COOKIE.to_string(),
                ]),
        )),
        None => {
            tracing::warn!("no upstream configured, serving the session summary");
            None
        }
    };

    tracing::info!(
        providers = registry.len(),
        callback = %settings.callback_url(),
        upstream = forwarder.as_ref().map(|f| f.upstream().as_str()),
        "gateway configured"
    );

    let gateway = Arc::new(Gateway::new(registry, cookies, settings, http));
    Ok(router(gateway, forwarder))
}
