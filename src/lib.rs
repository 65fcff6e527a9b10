//! Mock OAuth 2.0 / OpenID Connect provider for exercising client
//! integrations.
//!
//! The server speaks the authorization-code (with PKCE), client-credentials,
//! password and refresh-token grants over protocol-compliant wire formats,
//! but holds no real cryptographic identity: ID tokens use `alg=none`, the
//! JWKS is empty, and a single configured user/client pair authenticates
//! every flow. Embed it in tests via [`MockServer::builder`] or run the
//! `oidc-mock` binary configured through `AUTH_*` environment variables.

pub mod config;
pub mod error;
pub mod pkce;
pub mod store;

mod authorize;
mod idtoken;
mod oidc;
mod server;
mod token;

pub use config::Config;
pub use error::OAuthError;
pub use server::{AppState, MockServer, MockServerBuilder, router};
pub use store::{AuthCode, CredentialStore, RefreshToken, Session};
