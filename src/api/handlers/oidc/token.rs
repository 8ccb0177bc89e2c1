//! Back-channel authorization-code exchange.

use anyhow::{Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{config::OidcConfig, error::OidcError};

/// Token endpoint response; unknown fields are ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

pub struct TokenClient {
    client: Client,
    endpoint: String,
    client_id: String,
    client_secret: SecretString,
}

impl TokenClient {
    /// Build the HTTP client for the configured token endpoint.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &OidcConfig) -> Result<Self> {
        if !config.token_endpoint_verify() {
            warn!(
                endpoint = %config.endpoints().token,
                "TLS certificate verification is disabled for the token endpoint"
            );
        }

        let client = Client::builder()
            .use_rustls_tls()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(config.token_timeout_seconds()))
            .danger_accept_invalid_certs(!config.token_endpoint_verify())
            .build()
            .context("Failed to build token endpoint HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoints().token.clone(),
            client_id: config.client_id().to_string(),
            client_secret: config.client_secret().clone(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Exchange an authorization code for tokens. No retries.
    ///
    /// # Errors
    /// Returns [`OidcError::ProviderError`] when the response carries an OAuth
    /// `error` (at any status), and [`OidcError::TokenExchangeFailed`] on transport
    /// failure, an undecodable body, or a non-2xx status without an error body.
    #[instrument(skip(self, code), fields(endpoint = %self.endpoint))]
    pub async fn exchange(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse, OidcError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&form)
            .send()
            .await
            .map_err(|err| OidcError::TokenExchangeFailed(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| OidcError::TokenExchangeFailed(err.to_string()))?;
        debug!(status = %status, "token endpoint responded");

        let Ok(tokens) = serde_json::from_str::<TokenResponse>(&body) else {
            return Err(OidcError::TokenExchangeFailed(format!(
                "undecodable token response (status {status})"
            )));
        };

        if let Some(error) = tokens.error {
            return Err(OidcError::ProviderError {
                error,
                description: tokens.error_description.unwrap_or_default(),
            });
        }

        if !status.is_success() {
            return Err(OidcError::TokenExchangeFailed(format!(
                "token endpoint returned {status}"
            )));
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::oidc::config::ProviderEndpoints;
    use axum::{
        Form, Json, Router,
        http::{HeaderMap, StatusCode, header::AUTHORIZATION},
        response::IntoResponse,
        routing::post,
    };
    use serde_json::json;
    use std::collections::HashMap;

    async fn serve(app: Router) -> anyhow::Result<String> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{addr}/token"))
    }

    fn token_client(endpoint: String) -> anyhow::Result<TokenClient> {
        let config = OidcConfig::new(
            "http://app.example.test".to_string(),
            ProviderEndpoints {
                authorization: "http://idp.example.test/authorize".to_string(),
                token: endpoint,
                end_session: "http://idp.example.test/logout".to_string(),
            },
            "client".to_string(),
            SecretString::from("s3cret".to_string()),
        )
        .with_token_timeout_seconds(2);
        TokenClient::new(&config)
    }

    #[tokio::test]
    async fn exchange_posts_form_with_basic_auth() -> anyhow::Result<()> {
        let app = Router::new().route(
            "/token",
            post(
                |headers: HeaderMap, Form(form): Form<HashMap<String, String>>| async move {
                    let auth = headers
                        .get(AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    // base64("client:s3cret")
                    let ok = auth == "Basic Y2xpZW50OnMzY3JldA=="
                        && form.get("grant_type").map(String::as_str) == Some("authorization_code")
                        && form.get("code").map(String::as_str) == Some("XYZ")
                        && form.get("redirect_uri").map(String::as_str)
                            == Some("http://app.example.test/login_callback");
                    if ok {
                        Json(json!({"id_token": "a.b.c", "token_type": "Bearer"})).into_response()
                    } else {
                        StatusCode::BAD_REQUEST.into_response()
                    }
                },
            ),
        );
        let client = token_client(serve(app).await?)?;

        let tokens = client
            .exchange("XYZ", "http://app.example.test/login_callback")
            .await?;
        assert_eq!(tokens.id_token.as_deref(), Some("a.b.c"));
        assert_eq!(tokens.token_type.as_deref(), Some("Bearer"));
        Ok(())
    }

    #[tokio::test]
    async fn oauth_error_body_is_a_provider_error_at_any_status() -> anyhow::Result<()> {
        let app = Router::new().route(
            "/token",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant", "error_description": "code used"})),
                )
            }),
        );
        let client = token_client(serve(app).await?)?;
        let result = client.exchange("XYZ", "http://app.example.test/cb").await;
        assert!(matches!(
            result,
            Err(OidcError::ProviderError { ref error, ref description })
                if error == "invalid_grant" && description == "code used"
        ));

        let app = Router::new().route(
            "/token",
            post(|| async { Json(json!({"error": "invalid_grant"})) }),
        );
        let client = token_client(serve(app).await?)?;
        assert!(matches!(
            client.exchange("XYZ", "http://app.example.test/cb").await,
            Err(OidcError::ProviderError { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn non_success_without_error_body_fails() -> anyhow::Result<()> {
        let app = Router::new().route(
            "/token",
            post(|| async { (StatusCode::BAD_GATEWAY, Json(json!({"id_token": "a.b.c"}))) }),
        );
        let client = token_client(serve(app).await?)?;
        assert!(matches!(
            client.exchange("XYZ", "http://app.example.test/cb").await,
            Err(OidcError::TokenExchangeFailed(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_body_fails() -> anyhow::Result<()> {
        let app = Router::new().route("/token", post(|| async { "<html>oops</html>" }));
        let client = token_client(serve(app).await?)?;
        assert!(matches!(
            client.exchange("XYZ", "http://app.example.test/cb").await,
            Err(OidcError::TokenExchangeFailed(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_fails() -> anyhow::Result<()> {
        let client = token_client("http://127.0.0.1:9/token".to_string())?;
        assert!(matches!(
            client.exchange("XYZ", "http://app.example.test/cb").await,
            Err(OidcError::TokenExchangeFailed(_))
        ));
        Ok(())
    }
}
