//! Tamper-proof cookie storage for the session and login state.
//!
//! Values are JSON, wrapped in an envelope carrying their issue time. The
//! private jar encrypts (AES-GCM) the JSON as is; the signed jar signs (HMAC)
//! its base64url encoding. A cookie that fails authentication is reported as
//! [`CookieError::Invalid`], never decoded. Cookies larger than browsers
//! store are refused when written.

use std::{convert::Infallible, fmt, time::Duration};

use axum::{
    http::{HeaderMap, header::SET_COOKIE},
    response::{IntoResponse, IntoResponseParts, ResponseParts},
};
use axum_extra::extract::cookie::{
    Cookie, CookieJar, Key, PrivateCookieJar, SameSite, SignedCookieJar,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use oidc_proxy_access::{ConfigError, CookieError};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::Duration as TimeDuration;

/// How cookie values are protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieMode {
    /// HMAC signed; the value is readable by the client.
    Signed,
    /// Authenticated encryption; the value is opaque to the client.
    Private,
}

/// Largest `name=value` pair browsers are required to store.
pub const MAX_COOKIE_SIZE: usize = 4096;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    iat: i64,
    val: T,
}

/// Reads and writes gateway cookies.
#[derive(Clone)]
pub struct CookieCodec {
    key: Key,
    mode: CookieMode,
    secure: bool,
    domain: Option<String>,
}

impl fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieCodec")
            .field("mode", &self.mode)
            .field("secure", &self.secure)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

fn check_key_length(name: &'static str, material: &[u8]) -> Result<(), ConfigError> {
    match material.len() {
        32 | 64 => Ok(()),
        length => Err(ConfigError::InvalidCookieKey { name, length }),
    }
}

impl CookieCodec {
    /// Creates a codec using `key` directly.
    #[must_use]
    pub fn new(key: Key, mode: CookieMode) -> Self {
        Self {
            key,
            mode,
            secure: true,
            domain: None,
        }
    }

    /// Creates a codec from configured key material.
    ///
    /// With an encryption key the codec encrypts; without one it only signs.
    /// Without a hash key a random one is generated, so cookies do not survive
    /// a restart.
    pub fn from_key_material(
        hash_key: Option<&[u8]>,
        enc_key: Option<&[u8]>,
    ) -> Result<Self, Report<ConfigError>> {
        let mut material = match hash_key {
            Some(hash_key) => {
                check_key_length("cookie hash key", hash_key)?;
                hash_key.to_vec()
            }
            None => {
                tracing::warn!(
                    "no cookie hash key configured, generated a random one; sessions will not survive a restart"
                );
                Key::generate().master().to_vec()
            }
        };

        let mode = match enc_key {
            Some(enc_key) => {
                check_key_length("cookie encryption key", enc_key)?;
                material.extend_from_slice(enc_key);
                CookieMode::Private
            }
            None => {
                tracing::warn!("no cookie encryption key configured, cookies are signed only");
                CookieMode::Signed
            }
        };

        Ok(Self::new(Key::derive_from(&material), mode))
    }

    /// Sets the `Secure` attribute on written cookies.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets the `Domain` attribute on written cookies.
    #[must_use]
    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain.filter(|d| !d.is_empty());
        self
    }

    #[must_use]
    pub fn mode(&self) -> CookieMode {
        self.mode
    }

    /// Opens the request's cookies for writing a response.
    #[must_use]
    pub fn jar(&self, headers: &HeaderMap) -> SecureCookies {
        match self.mode {
            CookieMode::Signed => {
                SecureCookies::Signed(SignedCookieJar::from_headers(headers, self.key.clone()))
            }
            CookieMode::Private => {
                SecureCookies::Private(PrivateCookieJar::from_headers(headers, self.key.clone()))
            }
        }
    }

    /// Reads the cookie `name` from the request.
    ///
    /// Returns `Ok(None)` when the cookie is absent and an error when it is
    /// present but tampered, expired or undecodable.
    pub fn get<T: DeserializeOwned>(
        &self,
        headers: &HeaderMap,
        name: &str,
        max_age: Duration,
    ) -> Result<Option<T>, Report<CookieError>> {
        if CookieJar::from_headers(headers).get(name).is_none() {
            return Ok(None);
        }

        let Some(cookie) = self.jar(headers).get(name) else {
            return Err(CookieError::Invalid {
                name: name.to_string(),
            }
            .into());
        };

        let envelope: Envelope<T> = self.decode(name, cookie.value())?;
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        if Utc::now().timestamp().saturating_sub(envelope.iat) > max_age {
            return Err(CookieError::Expired {
                name: name.to_string(),
            }
            .into());
        }

        Ok(Some(envelope.val))
    }

    /// Adds cookie `name` holding `value` to `jar`.
    pub fn set<T: Serialize>(
        &self,
        jar: SecureCookies,
        name: &str,
        value: &T,
        max_age: Duration,
    ) -> Result<SecureCookies, Report<CookieError>> {
        self.set_issued_at(jar, name, value, max_age, Utc::now().timestamp())
    }

    fn set_issued_at<T: Serialize>(
        &self,
        jar: SecureCookies,
        name: &str,
        value: &T,
        max_age: Duration,
        iat: i64,
    ) -> Result<SecureCookies, Report<CookieError>> {
        let encoded = self.encode(name, &Envelope { iat, val: value })?;
        let max_age = TimeDuration::seconds(i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX));
        let jar = jar.add(self.build(name, encoded, max_age));

        let size = jar.encoded_size(name).unwrap_or_default();
        if size > MAX_COOKIE_SIZE {
            return Err(CookieError::Encode {
                name: name.to_string(),
                details: format!("value is too long ({size} > {MAX_COOKIE_SIZE} bytes)"),
            }
            .into());
        }
        Ok(jar)
    }

    /// Adds a removal cookie for `name` to `jar`.
    #[must_use]
    pub fn delete(&self, jar: SecureCookies, name: &str) -> SecureCookies {
        jar.add(self.build(name, String::new(), TimeDuration::ZERO))
    }

    fn build(&self, name: &str, value: String, max_age: TimeDuration) -> Cookie<'static> {
        let mut cookie = Cookie::build((name.to_string(), value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(max_age);
        if let Some(domain) = &self.domain {
            cookie = cookie.domain(domain.clone());
        }
        cookie.build()
    }

    fn encode<T: Serialize>(&self, name: &str, value: &T) -> Result<String, CookieError> {
        let failed = |details: String| CookieError::Encode {
            name: name.to_string(),
            details,
        };
        match self.mode {
            CookieMode::Private => serde_json::to_string(value).map_err(|e| failed(e.to_string())),
            CookieMode::Signed => serde_json::to_vec(value)
                .map(|json| URL_SAFE_NO_PAD.encode(json))
                .map_err(|e| failed(e.to_string())),
        }
    }

    fn decode<T: DeserializeOwned>(&self, name: &str, value: &str) -> Result<T, CookieError> {
        let failed = |details: String| CookieError::Decode {
            name: name.to_string(),
            details,
        };
        match self.mode {
            CookieMode::Private => serde_json::from_str(value).map_err(|e| failed(e.to_string())),
            CookieMode::Signed => {
                let json = URL_SAFE_NO_PAD
                    .decode(value)
                    .map_err(|e| failed(e.to_string()))?;
                serde_json::from_slice(&json).map_err(|e| failed(e.to_string()))
            }
        }
    }
}

/// Cookies to send with a response, protected the way the codec is configured.
#[derive(Clone, Debug)]
pub enum SecureCookies {
    Signed(SignedCookieJar),
    Private(PrivateCookieJar),
}

impl SecureCookies {
    fn get(&self, name: &str) -> Option<Cookie<'static>> {
        match self {
            Self::Signed(jar) => jar.get(name),
            Self::Private(jar) => jar.get(name),
        }
    }

    fn add(self, cookie: Cookie<'static>) -> Self {
        match self {
            Self::Signed(jar) => Self::Signed(jar.add(cookie)),
            Self::Private(jar) => Self::Private(jar.add(cookie)),
        }
    }

    /// Size of the protected `name=value` pair this jar writes for `name`.
    fn encoded_size(&self, name: &str) -> Option<usize> {
        let response = (self.clone(), ()).into_response();
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.split_once(';').map_or(v, |(pair, _)| pair))
            .find(|pair| {
                pair.split_once('=')
                    .is_some_and(|(cookie_name, _)| cookie_name == name)
            })
            .map(str::len)
    }
}

impl IntoResponseParts for SecureCookies {
    type Error = Infallible;

    fn into_response_parts(self, res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        match self {
            Self::Signed(jar) => jar.into_response_parts(res),
            Self::Private(jar) => jar.into_response_parts(res),
        }
    }
}
