//! OpenID Connect relying-party flows.
//!
//! ## Flow Overview
//!
//! 1. `/login` registers a [`PendingState`] in the browser session and sends the
//!    browser to the authorization endpoint with the encoded state.
//! 2. `/login_callback` consumes the state, exchanges the code at the token
//!    endpoint, decodes the id token and stores a fresh [`AuthContext`].
//! 3. `/logout` sends the browser to the end-session endpoint with the stored id
//!    token as hint and a new state.
//! 4. `/logout_callback` consumes that state and resets the [`AuthContext`].
//!
//! Every callback failure, whatever the cause, is answered with the same
//! access-denied reply. The cause is logged together with the received
//! parameter names.
//!
//! ## Session Layout
//!
//! The session holds a JSON map per namespace: pending states live under
//! `auth_oidc` and the identity context under `auth`.

pub mod claims;
pub mod config;
pub mod context;
pub mod error;
pub mod jwks;
pub mod login;
pub mod logout;
pub mod provider;
pub mod reply;
pub mod session;
pub mod state;
pub mod state_token;
pub mod token;
pub mod types;

#[cfg(test)]
mod tests;

pub use self::config::{AuthorizationMethod, OidcConfig, ProviderEndpoints};
pub use self::context::{
    AuthContext, IdentityContextStore, PROVIDER_ID, ProviderAttributes, SessionContextStore,
};
pub use self::error::OidcError;
pub use self::jwks::{IdTokenVerifier, Jwks};
pub use self::provider::{
    AuthProviderRegistry, HttpUserResolver, InMemoryProviderRegistry, NoopUserResolver,
    ProviderRoutes, UserResolver,
};
pub use self::reply::AccessReplies;
pub use self::session::{SESSION_COOKIE_NAME, Session, SessionStore};
pub use self::state::{OidcState, PendingFlow};
pub use self::state_token::{PendingState, StateTokenManager};
