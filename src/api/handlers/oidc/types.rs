use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};

use super::context::AuthContext;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginQuery {
    /// Opaque continuation token; where to send the browser when the flow completes.
    #[serde(default)]
    pub target_to: String,
}

/// Parameters the provider appends to the redirect URI.
///
/// Only documents the endpoint; the handlers read the raw query map so a
/// missing parameter can be told apart from a malformed one.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[allow(dead_code)]
pub struct CallbackQuery {
    /// State issued when the flow started.
    pub state: Option<String>,
    /// Authorization code (login only).
    pub code: Option<String>,
    /// OAuth error code, when the provider refused the request.
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContextResponse {
    pub authenticated: bool,
    pub provider_id: String,
    pub nameid: String,
    pub expires_at: Option<String>,
    pub local_user_id: Option<String>,
    #[schema(value_type = Object)]
    pub claims: Map<String, Value>,
}

impl From<&AuthContext> for ContextResponse {
    fn from(context: &AuthContext) -> Self {
        Self {
            authenticated: context.authenticated,
            provider_id: context.provider_id.clone(),
            nameid: context.provider_attributes.nameid.clone(),
            expires_at: context.expires_at.map(|at| at.to_rfc3339()),
            local_user_id: context.local_user_id.clone(),
            claims: context.provider_attributes.raw_claims.clone(),
        }
    }
}
