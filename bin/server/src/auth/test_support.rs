//! Fixtures shared by the gateway tests: a mock identity provider, identity
//! token signing and cookie plumbing.

use std::{
    collections::BTreeMap,
    sync::{Arc, OnceLock},
    time::Duration,
};

use axum::{
    Extension, Router,
    http::{HeaderMap, header::SET_COOKIE},
    middleware,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, Key};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use oidc_proxy_access::{Endpoints, Provider, Session};
use rsa::{
    RsaPrivateKey,
    pkcs1::{EncodeRsaPrivateKey, LineEnding},
    traits::PublicKeyParts,
};
use serde_json::{Value, json};
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use super::{CookieCodec, CookieMode, Gateway, GatewaySettings, ProviderRegistry, oidc};

pub(crate) const CLIENT_ID: &str = "proxy-client";
pub(crate) const CLIENT_SECRET: &str = "0123456789abcdef0123456789abcdef";
pub(crate) const CALLBACK_URL: &str = "http://proxy.test/oauth2/callback";

pub(crate) fn test_codec(mode: CookieMode) -> CookieCodec {
    CookieCodec::new(Key::derive_from(&[42u8; 64]), mode)
}

/// Parses every `Set-Cookie` header of `response`, keyed by cookie name.
pub(crate) fn set_cookies(response: &Response) -> BTreeMap<String, Cookie<'static>> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| Cookie::parse(v.to_string()).ok())
        .map(|c| (c.name().to_string(), c))
        .collect()
}

pub(crate) fn is_removal(cookie: &Cookie<'_>) -> bool {
    cookie.max_age() == Some(time::Duration::ZERO)
}

/// Builds the `Cookie` request header a browser would send back.
pub(crate) fn cookie_header(cookies: &BTreeMap<String, Cookie<'static>>) -> String {
    cookies
        .values()
        .filter(|c| !is_removal(c))
        .map(|c| format!("{}={}", c.name(), c.value()))
        .collect::<Vec<_>>()
        .join("; ")
}

pub(crate) async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub(crate) fn location(response: &Response) -> String {
    response
        .headers()
        .get(axum::http::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

pub(crate) fn sign_id_token(claims: &Value, secret: &str) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("sign id token")
}

/// An RSA key an identity provider signs tokens with.
pub(crate) struct RsaSigningKey {
    kid: String,
    encoding_key: EncodingKey,
    jwk: Value,
}

impl RsaSigningKey {
    fn generate(kid: &str) -> Self {
        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, 2048).expect("failed to generate RSA private key");
        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("failed to encode private key as PEM");
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .expect("failed to create encoding key");

        let public_key = private_key.to_public_key();
        let jwk = json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        });

        Self {
            kid: kid.to_string(),
            encoding_key,
            jwk,
        }
    }

    /// The public half as a JWK.
    pub(crate) fn jwk(&self) -> &Value {
        &self.jwk
    }

    /// An RS256 token over `claims`, naming this key in its header.
    pub(crate) fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).expect("sign id token")
    }
}

const SIGNING_KID: &str = "signing-key-1";

/// The key the mock provider publishes in its JWKS.
pub(crate) fn published_key() -> &'static RsaSigningKey {
    static KEY: OnceLock<RsaSigningKey> = OnceLock::new();
    KEY.get_or_init(|| RsaSigningKey::generate(SIGNING_KID))
}

/// A key claiming the published key's `kid` that the provider never published.
pub(crate) fn unpublished_key() -> &'static RsaSigningKey {
    static KEY: OnceLock<RsaSigningKey> = OnceLock::new();
    KEY.get_or_init(|| RsaSigningKey::generate(SIGNING_KID))
}

/// A wiremock-backed identity provider.
pub(crate) struct MockProvider {
    pub(crate) server: MockServer,
}

impl MockProvider {
    pub(crate) async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub(crate) fn issuer(&self) -> String {
        self.server.uri()
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server.uri())
    }

    /// Discovery document advertising authorization, token and revocation
    /// endpoints, but no end-session endpoint.
    pub(crate) fn discovery_document(&self) -> Value {
        json!({
            "issuer": self.issuer(),
            "authorization_endpoint": self.url("/authorize"),
            "token_endpoint": self.url("/token"),
            "revocation_endpoint": self.url("/revoke"),
            "userinfo_endpoint": self.url("/userinfo"),
            "jwks_uri": self.url("/jwks"),
        })
    }

    pub(crate) async fn mount_discovery(&self, document: Value) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"keys": [published_key().jwk()]})),
            )
            .mount(&self.server)
            .await;
    }

    /// Mounts a token endpoint that answers `body` only after `delay`.
    pub(crate) async fn mount_slow_token(&self, body: Value, delay: Duration) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Mounts a token endpoint answering `body`, expecting exactly `calls` hits.
    pub(crate) async fn mount_token(&self, body: Value, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    pub(crate) async fn mount_revocation(&self, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .respond_with(ResponseTemplate::new(200))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// An OIDC provider whose endpoints come from discovery.
    pub(crate) fn oidc_provider(&self) -> Provider {
        Provider::new(CLIENT_ID.to_string(), CLIENT_SECRET.to_string())
            .with_display_name("ACME".to_string())
            .with_issuer_url(self.issuer())
            .with_scopes(vec!["openid".to_string(), "email".to_string()])
    }

    /// A plain OAuth2 provider with static endpoints on this server.
    pub(crate) fn oauth2_provider(&self) -> Provider {
        Provider::new(CLIENT_ID.to_string(), CLIENT_SECRET.to_string())
            .with_scopes(vec!["read".to_string()])
            .with_endpoints(Endpoints {
                authorization: Some(self.url("/authorize")),
                token: Some(self.url("/token")),
                ..Endpoints::default()
            })
    }

    pub(crate) fn id_token_claims(&self) -> Value {
        let now = Utc::now().timestamp();
        json!({
            "iss": self.issuer(),
            "sub": "user-1",
            "aud": CLIENT_ID,
            "iat": now,
            "exp": now + 3600,
            "email": "user@example.com",
        })
    }

    /// A valid identity token for [`Self::oidc_provider`].
    pub(crate) fn id_token(&self) -> String {
        sign_id_token(&self.id_token_claims(), CLIENT_SECRET)
    }
}

pub(crate) fn settings() -> GatewaySettings {
    GatewaySettings::new(Url::parse(CALLBACK_URL).expect("callback url"))
}

pub(crate) fn http() -> reqwest::Client {
    oidc::http_client(Duration::from_secs(5)).expect("http client")
}

pub(crate) async fn gateway(providers: BTreeMap<String, Provider>) -> Arc<Gateway> {
    gateway_with_http(providers, http()).await
}

/// A gateway whose provider calls go through `http`.
pub(crate) async fn gateway_with_http(
    providers: BTreeMap<String, Provider>,
    http: reqwest::Client,
) -> Arc<Gateway> {
    let settings = settings();
    let registry = ProviderRegistry::build(providers, settings.callback_url(), &http)
        .await
        .expect("registry");
    Arc::new(Gateway::new(
        registry,
        test_codec(CookieMode::Private),
        settings,
        http,
    ))
}

/// The `Cookie` header carrying `session` for `gateway`.
pub(crate) fn session_cookie(gateway: &Gateway, session: &Session) -> String {
    let cookies = gateway.cookies();
    let jar = cookies
        .set(
            cookies.jar(&HeaderMap::new()),
            gateway.settings().session_cookie(),
            session,
            gateway.settings().session_max_age(),
        )
        .expect("set session");
    cookie_header(&set_cookies(&(jar, ()).into_response()))
}

/// The gateway in front of a handler answering `<provider>:<access token>`
/// of the session it was handed.
pub(crate) fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .fallback(|Extension(session): Extension<Session>| async move {
            format!("{}:{}", session.provider(), session.tokens().access_token())
        })
        .layer(middleware::from_fn_with_state(gateway, super::gate))
}
