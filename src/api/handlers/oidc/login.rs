use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use chrono::DateTime;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};
use url::Url;

use super::{
    claims::IdentityAssertion,
    config::{AuthorizationMethod, OidcConfig},
    context::{AuthContext, ProviderAttributes},
    error::{OidcError, reject},
    reply::see_other,
    session::{attach_session_cookie, extract_session_id},
    state::OidcState,
    types::{CallbackQuery, LoginQuery},
};
use crate::api::handlers::now_unix_seconds;

/// Request sent to the provider's authorization endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub action: String,
    pub parameters: Vec<(String, String)>,
}

impl AuthorizationRequest {
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The action URL with every parameter appended to its query string.
    ///
    /// # Errors
    /// Returns an error if the action is not an absolute URL.
    pub fn redirect_url(&self) -> Result<String, url::ParseError> {
        let mut url = Url::parse(&self.action)?;
        url.query_pairs_mut().extend_pairs(
            self.parameters
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        );
        Ok(url.into())
    }

    /// Self-submitting HTML form posting the parameters to the action.
    #[must_use]
    pub fn form_post_html(&self) -> String {
        let mut inputs = String::new();
        for (name, value) in &self.parameters {
            let _ = writeln!(
                inputs,
                r#"<input type="hidden" name="{}" value="{}">"#,
                escape_html(name),
                escape_html(value)
            );
        }
        format!(
            "<!DOCTYPE html>\n<html>\n<head><title>Signing in</title></head>\n\
             <body onload=\"document.forms[0].submit()\">\n\
             <form method=\"post\" action=\"{}\">\n{inputs}\
             <noscript><button type=\"submit\">Continue</button></noscript>\n\
             </form>\n</body>\n</html>\n",
            escape_html(&self.action)
        )
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Authorization-code request for a flow identified by `external_state`.
#[must_use]
pub fn build_authorization_request(config: &OidcConfig, external_state: &str) -> AuthorizationRequest {
    AuthorizationRequest {
        action: config.endpoints().authorization.clone(),
        parameters: vec![
            ("response_type".to_string(), "code".to_string()),
            ("client_id".to_string(), config.client_id().to_string()),
            ("redirect_uri".to_string(), config.login_callback_url()),
            ("scope".to_string(), config.scope()),
            ("state".to_string(), external_state.to_string()),
        ],
    }
}

#[utoipa::path(
    get,
    path = "/login",
    params(LoginQuery),
    responses(
        (status = 303, description = "Redirect to the provider's authorization endpoint"),
        (status = 200, description = "Auto-submitting form posting to the authorization endpoint", content_type = "text/html"),
        (status = 500, description = "The flow could not be started"),
    ),
    tag = "oidc"
)]
#[instrument(skip(headers, query, oidc))]
pub async fn login(
    headers: HeaderMap,
    query: Query<LoginQuery>,
    oidc: Extension<Arc<OidcState>>,
) -> impl IntoResponse {
    let session_id = extract_session_id(&headers);
    let flow = match oidc
        .generate_state(session_id.as_deref(), &query.target_to)
        .await
    {
        Ok(flow) => flow,
        Err(err) => {
            error!("Failed to start OIDC login: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let config = oidc.config();
    let request = build_authorization_request(config, &flow.pending.external_state);
    let mut response = match config.authorization_method() {
        AuthorizationMethod::Redirect => match request.redirect_url() {
            Ok(location) => see_other(&location),
            Err(err) => {
                error!("Invalid authorization endpoint: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
        AuthorizationMethod::FormPost => Html(request.form_post_html()).into_response(),
    };

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
    path = "/login_callback",
    params(CallbackQuery),
    responses(
        (status = 303, description = "Login succeeded, redirect to the continuation target"),
        (status = 403, description = "Access denied"),
        (status = 500, description = "Session data could not be read or written"),
    ),
    tag = "oidc"
)]
#[instrument(skip(headers, query, oidc))]
pub async fn login_callback(
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
    oidc: Extension<Arc<OidcState>>,
) -> Response {
    let Query(params) = query;
    let session_id = extract_session_id(&headers);
    match process_login_callback(&oidc, session_id.as_deref(), &params).await {
        Ok(target) => oidc.replies().access_success_redirect(&target),
        Err(err) => reject(oidc.replies(), &err, &params),
    }
}

/// Run the login callback for the parameters the provider sent back and
/// return the continuation token of the completed flow.
///
/// The pending state is consumed before anything else can fail, so a state is
/// never accepted twice. Nothing is written to the identity context unless the
/// whole flow succeeds.
///
/// # Errors
/// Returns the first [`OidcError`] the flow hit.
pub async fn process_login_callback(
    oidc: &OidcState,
    session_id: Option<&str>,
    params: &HashMap<String, String>,
) -> Result<String, OidcError> {
    let state = non_empty(params, "state").ok_or(OidcError::MissingState)?;
    let pending = oidc.consume_state(session_id, state).await?;
    let code = non_empty(params, "code").ok_or(OidcError::MissingCode)?;

    let config = oidc.config();
    let token = oidc
        .token_client()
        .exchange(code, &config.login_callback_url())
        .await?;
    let id_token = token
        .id_token
        .filter(|token| !token.is_empty())
        .ok_or(OidcError::MissingIdToken)?;

    let claims = oidc.decode_id_token(&id_token).await?;
    let assertion = IdentityAssertion::from_claims(claims).ok_or(OidcError::MissingSubject)?;

    let expires_at = assertion.expires_at_or(now_unix_seconds(), config.default_expiry_seconds());
    let expires_at = DateTime::from_timestamp(expires_at, 0)
        .ok_or_else(|| OidcError::InvalidIdToken(format!("exp out of range: {expires_at}")))?;

    let nameid = assertion.display_name().to_string();
    let local_user_id = oidc.resolve_user(&nameid).await;

    let context = AuthContext::authenticated(
        expires_at,
        ProviderAttributes {
            nameid: nameid.clone(),
            raw_claims: assertion.claims,
            session_index: id_token,
        },
        local_user_id,
    );
    oidc.store_context(session_id, &context).await?;

    info!(nameid = %nameid, "OIDC login completed");
    Ok(pending.continuation_token)
}

pub(super) fn non_empty<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}
