//! Canonical identity record kept in the session after a successful login.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::error;

use super::{
    session::{Session, extract_session_id},
    state::OidcState,
    types::ContextResponse,
};

pub const PROVIDER_ID: &str = "oidc";

/// Session namespace holding the [`AuthContext`].
pub const CONTEXT_NAMESPACE: &str = "auth";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttributes {
    /// Display name: `preferred_username`, falling back to `sub`.
    pub nameid: String,
    pub raw_claims: Map<String, Value>,
    /// The raw id token, replayed as `id_token_hint` on logout.
    pub session_index: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    pub authenticated: bool,
    pub error_message: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub provider_id: String,
    pub provider_attributes: ProviderAttributes,
    pub local_user_id: Option<String>,
}

impl Default for AuthContext {
    fn default() -> Self {
        Self {
            authenticated: false,
            error_message: String::new(),
            expires_at: None,
            provider_id: PROVIDER_ID.to_string(),
            provider_attributes: ProviderAttributes::default(),
            local_user_id: None,
        }
    }
}

impl AuthContext {
    #[must_use]
    pub fn authenticated(
        expires_at: DateTime<Utc>,
        provider_attributes: ProviderAttributes,
        local_user_id: Option<String>,
    ) -> Self {
        Self {
            authenticated: true,
            error_message: String::new(),
            expires_at: Some(expires_at),
            provider_id: PROVIDER_ID.to_string(),
            provider_attributes,
            local_user_id,
        }
    }
}

/// Read/write contract for the identity record of one session.
///
/// Implementations run while the session lock is held and must not block.
pub trait IdentityContextStore: Send + Sync {
    /// Current context, or the unauthenticated default.
    ///
    /// # Errors
    /// Returns an error if a stored context cannot be decoded.
    fn get(&self, session: &Session) -> Result<AuthContext, serde_json::Error>;

    /// Replace the context.
    ///
    /// # Errors
    /// Returns an error if the context cannot be encoded.
    fn set(&self, session: &mut Session, context: &AuthContext) -> Result<(), serde_json::Error>;
}

/// Keeps the context in the session under [`CONTEXT_NAMESPACE`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionContextStore;

impl IdentityContextStore for SessionContextStore {
    fn get(&self, session: &Session) -> Result<AuthContext, serde_json::Error> {
        Ok(session
            .namespace::<AuthContext>(CONTEXT_NAMESPACE)?
            .unwrap_or_default())
    }

    fn set(&self, session: &mut Session, context: &AuthContext) -> Result<(), serde_json::Error> {
        session.set_namespace(CONTEXT_NAMESPACE, context)
    }
}

#[utoipa::path(
    get,
    path = "/context",
    responses(
        (status = 200, description = "Identity context of the current session", body = ContextResponse),
        (status = 204, description = "Session is not authenticated"),
        (status = 500, description = "Session data could not be read"),
    ),
    tag = "oidc"
)]
pub async fn context(headers: HeaderMap, oidc: Extension<Arc<OidcState>>) -> impl IntoResponse {
    let session_id = extract_session_id(&headers);
    let identity = oidc.identity();
    let current = oidc
        .sessions()
        .with_existing(session_id.as_deref(), |session| identity.get(session))
        .await;

    match current {
        None => StatusCode::NO_CONTENT.into_response(),
        Some(Err(err)) => {
            error!("Failed to read identity context: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Some(Ok(context)) if !context.authenticated => StatusCode::NO_CONTENT.into_response(),
        Some(Ok(context)) => (StatusCode::OK, Json(ContextResponse::from(&context))).into_response(),
    }
}
