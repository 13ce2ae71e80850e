//! oidc-proxy gateway server.
//!
//! An authenticating reverse proxy: every request either runs one of the
//! login, callback or logout flows, or is checked for a valid session and
//! forwarded upstream.

pub mod app;
pub mod auth;
pub mod config;
pub mod debug;
pub mod error;
pub mod forward;
pub mod logging;
