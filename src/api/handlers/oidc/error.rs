use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, warn};

use super::{claims::ClaimsError, jwks::VerifyError, reply::AccessReplies, state_token::StateError};

/// Why a callback was refused. Only logged; the browser always gets the same reply.
#[derive(Debug, Error)]
pub enum OidcError {
    #[error("callback has no state parameter")]
    MissingState,
    #[error("callback state is invalid, unknown, or expired")]
    InvalidState,
    #[error("callback has no code parameter")]
    MissingCode,
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),
    #[error("provider returned error {error}: {description}")]
    ProviderError { error: String, description: String },
    #[error("token response has no id_token")]
    MissingIdToken,
    #[error("id token rejected: {0}")]
    InvalidIdToken(String),
    #[error("id token has no sub claim")]
    MissingSubject,
    #[error("internal error: {0}")]
    Internal(String),
}

impl OidcError {
    /// Faults on our side rather than a refused login.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<StateError> for OidcError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Invalid | StateError::Unknown => Self::InvalidState,
            StateError::Exhausted(_) | StateError::Session(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<ClaimsError> for OidcError {
    fn from(err: ClaimsError) -> Self {
        Self::InvalidIdToken(err.to_string())
    }
}

impl From<VerifyError> for OidcError {
    fn from(err: VerifyError) -> Self {
        Self::InvalidIdToken(err.to_string())
    }
}

/// Log why a callback failed and render the reply the browser sees.
///
/// Refused logins get the generic access-denied reply; internal faults a bare 500.
pub(super) fn reject(
    replies: &AccessReplies,
    err: &OidcError,
    params: &HashMap<String, String>,
) -> Response {
    let mut received: Vec<&str> = params.keys().map(String::as_str).collect();
    received.sort_unstable();
    let received = received.join(",");
    let provider_error = params.get("error").map(String::as_str).unwrap_or_default();
    let provider_description = params
        .get("error_description")
        .map(String::as_str)
        .unwrap_or_default();

    if err.is_internal() {
        error!(error = %err, params = %received, "OIDC callback failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    warn!(
        error = %err,
        params = %received,
        provider_error = %provider_error,
        provider_error_description = %provider_description,
        "OIDC callback rejected"
    );
    replies.access_denied_reply()
}
