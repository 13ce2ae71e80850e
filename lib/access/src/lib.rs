//! Provider configuration, session model, and error types for oidc-proxy.
//!
//! This crate provides:
//! - Identity provider configuration (`Provider`, `Endpoints`)
//! - The cookie-resident login records (`Session`, `Tokens`, `LoginState`)
//! - The error taxonomy shared by the gateway (`ConfigError`, `CookieError`,
//!   `ProviderError`)
//!
//! Nothing in here performs I/O. The gateway in `oidc-proxy-server` owns the
//! network calls and the cookie codec and uses these types as its vocabulary.
//!
//! # Example
//!
//! ```
//! use oidc_proxy_access::{Endpoints, Provider, Session, Tokens};
//! use std::time::Duration;
//!
//! let provider = Provider::new("my-client".to_string(), "secret".to_string())
//!     .with_display_name("ACME Corp".to_string())
//!     .with_endpoints(Endpoints {
//!         authorization: Some("https://idp.example.com/authorize".to_string()),
//!         token: Some("https://idp.example.com/token".to_string()),
//!         ..Endpoints::default()
//!     });
//! assert!(provider.issuer_url().is_none());
//!
//! let tokens = Tokens::new("access".to_string(), "Bearer".to_string())
//!     .with_refresh_token(Some("refresh".to_string()))
//!     .expiring_in(Duration::from_secs(3600));
//! let session = Session::new("acme".to_string(), tokens, None);
//!
//! assert!(session.tokens().is_valid());
//! assert_eq!(session.provider(), "acme");
//! ```

pub mod error;
pub mod login_state;
pub mod provider;
pub mod session;

// Re-export main types at crate root
pub use error::{ConfigError, CookieError, ProviderError};
pub use login_state::LoginState;
pub use provider::{Endpoints, Provider, parse_provider_set};
pub use session::{Session, Tokens};
