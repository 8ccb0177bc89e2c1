//! # auth-oidc (OpenID Connect Relying Party)
//!
//! `auth-oidc` drives the OAuth 2.0 authorization-code grant against a single
//! external OpenID Connect provider and turns the provider's identity token into
//! an [`AuthContext`](api::handlers::oidc::AuthContext) stored in the browser
//! session.
//!
//! ## Flows
//!
//! - **Login:** `GET {prefix}/login?target_to=...` registers a pending state in the
//!   session and sends the browser to the authorization endpoint. The provider
//!   returns to `{prefix}/login_callback`, where the state is consumed, the code is
//!   exchanged for tokens, and the identity context is written.
//! - **Logout:** `GET {prefix}/logout?target_to=...` sends the browser to the
//!   end-session endpoint with the stored id token as `id_token_hint`. The provider
//!   returns to `{prefix}/logout_callback`, which consumes the state and clears the
//!   identity context.
//!
//! ## State Tokens
//!
//! Every flow is bound to the browser session through a single-use state token.
//! A state is consumed the moment its callback arrives, so a replayed callback is
//! always rejected, and abandoned states expire after a configurable TTL.
//!
//! ## Identity Token Trust
//!
//! Without `--jwks-uri` the id token claims are decoded **without** signature
//! verification, trusting the back-channel TLS connection to the token endpoint.
//! Configure a JWKS URI to require RS256 signatures, audience and issuer checks.
//!
//! All callback failures are answered with the same `403 Access denied` response;
//! the reason is only logged.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
