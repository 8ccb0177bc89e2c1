use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};
use url::Url;

use super::{
    config::OidcConfig,
    context::AuthContext,
    error::{OidcError, reject},
    login::non_empty,
    reply::see_other,
    session::{attach_session_cookie, extract_session_id},
    state::OidcState,
    types::{CallbackQuery, LoginQuery},
};

/// End-session URL for a logout identified by `external_state`.
///
/// The hint is left out when there is no current login to end.
///
/// # Errors
/// Returns an error if the end-session endpoint is not an absolute URL.
pub fn end_session_url(
    config: &OidcConfig,
    id_token_hint: &str,
    external_state: &str,
) -> Result<String, url::ParseError> {
    let mut url = Url::parse(&config.endpoints().end_session)?;
    {
        let mut query = url.query_pairs_mut();
        if !id_token_hint.is_empty() {
            query.append_pair("id_token_hint", id_token_hint);
        }
        query.append_pair("post_logout_redirect_uri", &config.logout_callback_url());
        query.append_pair("state", external_state);
    }
    Ok(url.into())
}

#[utoipa::path(
    get,
    path = "/logout",
    params(LoginQuery),
    responses(
        (status = 303, description = "Redirect to the provider's end-session endpoint"),
        (status = 500, description = "The flow could not be started"),
    ),
    tag = "oidc"
)]
#[instrument(skip(headers, query, oidc))]
pub async fn logout(
    headers: HeaderMap,
    query: Query<LoginQuery>,
    oidc: Extension<Arc<OidcState>>,
) -> Response {
    let session_id = extract_session_id(&headers);
    let flow = match oidc
        .generate_state(session_id.as_deref(), &query.target_to)
        .await
    {
        Ok(flow) => flow,
        Err(err) => {
            error!("Failed to start OIDC logout: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let config = oidc.config();
    let location =
        match end_session_url(config, &flow.id_token_hint, &flow.pending.external_state) {
            Ok(location) => location,
            Err(err) => {
                error!("Invalid end-session endpoint: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

    let mut response = see_other(&location);
    if flow.new_session {
        attach_session_cookie(
            &mut response,
            &flow.session_id,
            Duration::from_secs(config.session_ttl_seconds()),
            config.session_cookie_secure(),
        );
    }
    response
}

#[utoipa::path(
    get,
    path = "/logout_callback",
    params(CallbackQuery),
    responses(
        (status = 303, description = "Logout completed, redirect to the continuation target"),
        (status = 403, description = "Access denied"),
        (status = 500, description = "Session data could not be read or written"),
    ),
    tag = "oidc"
)]
#[instrument(skip(headers, query, oidc))]
pub async fn logout_callback(
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
    oidc: Extension<Arc<OidcState>>,
) -> Response {
    let Query(params) = query;
    let session_id = extract_session_id(&headers);
    match process_logout_callback(&oidc, session_id.as_deref(), &params).await {
        Ok(target) => oidc.replies().logout_success_redirect(&target),
        Err(err) => reject(oidc.replies(), &err, &params),
    }
}

/// Consume the logout state, drop the identity context, and return the
/// continuation token.
///
/// # Errors
/// Returns [`OidcError::MissingState`] or [`OidcError::InvalidState`] for a bad
/// state, [`OidcError::Internal`] if the session cannot be written.
pub async fn process_logout_callback(
    oidc: &OidcState,
    session_id: Option<&str>,
    params: &HashMap<String, String>,
) -> Result<String, OidcError> {
    let state = non_empty(params, "state").ok_or(OidcError::MissingState)?;
    let pending = oidc.consume_state(session_id, state).await?;
    oidc.store_context(session_id, &AuthContext::default()).await?;

    info!("OIDC logout completed");
    Ok(pending.continuation_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::oidc::config::ProviderEndpoints;
    use secrecy::SecretString;

    fn config() -> OidcConfig {
        OidcConfig::new(
            "https://rp.example.test".to_string(),
            ProviderEndpoints {
                authorization: "https://idp.example.test/authorize".to_string(),
                token: "https://idp.example.test/token".to_string(),
                end_session: "https://idp.example.test/logout".to_string(),
            },
            "client-1".to_string(),
            SecretString::from("secret".to_string()),
        )
    }

    fn query(location: &str) -> Result<HashMap<String, String>, url::ParseError> {
        Ok(Url::parse(location)?.query_pairs().into_owned().collect())
    }

    #[test]
    fn end_session_url_carries_hint_and_state() -> Result<(), url::ParseError> {
        let location = end_session_url(&config(), "raw.id.token", "S1")?;
        assert!(location.starts_with("https://idp.example.test/logout?"));
        let pairs = query(&location)?;
        assert_eq!(pairs.get("id_token_hint").map(String::as_str), Some("raw.id.token"));
        assert_eq!(
            pairs.get("post_logout_redirect_uri").map(String::as_str),
            Some("https://rp.example.test/logout_callback")
        );
        assert_eq!(pairs.get("state").map(String::as_str), Some("S1"));
        Ok(())
    }

    #[test]
    fn end_session_url_omits_empty_hint() -> Result<(), url::ParseError> {
        let pairs = query(&end_session_url(&config(), "", "S1")?)?;
        assert!(!pairs.contains_key("id_token_hint"));
        assert_eq!(pairs.get("state").map(String::as_str), Some("S1"));
        Ok(())
    }
}
