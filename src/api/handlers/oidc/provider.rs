//! Collaborators outside the flow: the auth-provider registry and the lookup
//! from a provider-asserted name to a local user id.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProviderRoutes {
    pub provider_id: String,
    pub login_route: String,
    pub logout_route: String,
}

/// Registry of auth providers the host application can offer.
pub trait AuthProviderRegistry: Send + Sync {
    fn register_auth_provider(&self, provider_id: &str, login_route: &str, logout_route: &str);
    fn unregister_auth_provider(&self, provider_id: &str);
    fn providers(&self) -> Vec<ProviderRoutes>;
}

#[derive(Debug, Default)]
pub struct InMemoryProviderRegistry {
    providers: RwLock<BTreeMap<String, ProviderRoutes>>,
}

impl AuthProviderRegistry for InMemoryProviderRegistry {
    fn register_auth_provider(&self, provider_id: &str, login_route: &str, logout_route: &str) {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        providers.insert(
            provider_id.to_string(),
            ProviderRoutes {
                provider_id: provider_id.to_string(),
                login_route: login_route.to_string(),
                logout_route: logout_route.to_string(),
            },
        );
    }

    fn unregister_auth_provider(&self, provider_id: &str) {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        providers.remove(provider_id);
    }

    fn providers(&self) -> Vec<ProviderRoutes> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        providers.values().cloned().collect()
    }
}

/// Resolves a provider-asserted display name to a local user id.
#[async_trait]
pub trait UserResolver: Send + Sync {
    /// `Ok(None)` when the user is unknown.
    ///
    /// # Errors
    /// Returns an error if the lookup itself failed.
    async fn user_from_provider(&self, name: &str) -> Result<Option<String>>;
}

/// Never resolves anyone.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopUserResolver;

#[async_trait]
impl UserResolver for NoopUserResolver {
    async fn user_from_provider(&self, _name: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Looks users up with `POST {url}` and a `{"name": ...}` body.
///
/// `200 {"id": ...}` resolves, `404` means unknown, anything else is an error.
#[derive(Clone, Debug)]
pub struct HttpUserResolver {
    client: Client,
    url: String,
}

impl HttpUserResolver {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build user lookup HTTP client")?;
        Ok(Self { client, url })
    }
}

#[derive(Deserialize)]
struct LookupResponse {
    id: Value,
}

#[async_trait]
impl UserResolver for HttpUserResolver {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn user_from_provider(&self, name: &str) -> Result<Option<String>> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "name": name }))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("no local user for provider name");
                Ok(None)
            }
            status if status.is_success() => {
                let body: LookupResponse = response.json().await?;
                match body.id {
                    Value::String(id) if !id.is_empty() => Ok(Some(id)),
                    Value::Number(id) => Ok(Some(id.to_string())),
                    Value::Null => Ok(None),
                    other => Err(anyhow!("unexpected user id in lookup response: {other}")),
                }
            }
            status => Err(anyhow!("user lookup failed: {status}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode as AxumStatus, response::IntoResponse, routing::post};

    #[test]
    fn registry_registers_and_unregisters() {
        let registry = InMemoryProviderRegistry::default();
        registry.register_auth_provider("oidc", "/login", "/logout");
        assert_eq!(
            registry.providers(),
            vec![ProviderRoutes {
                provider_id: "oidc".to_string(),
                login_route: "/login".to_string(),
                logout_route: "/logout".to_string(),
            }]
        );

        registry.register_auth_provider("oidc", "/auth/login", "/auth/logout");
        assert_eq!(registry.providers().len(), 1);
        assert_eq!(registry.providers()[0].login_route, "/auth/login");

        registry.unregister_auth_provider("oidc");
        assert!(registry.providers().is_empty());
    }

    #[tokio::test]
    async fn noop_resolver_is_always_absent() -> Result<()> {
        assert_eq!(NoopUserResolver.user_from_provider("alice").await?, None);
        Ok(())
    }

    async fn lookup_server() -> Result<String> {
        let app = Router::new().route(
            "/lookup",
            post(|Json(body): Json<Value>| async move {
                match body.get("name").and_then(Value::as_str) {
                    Some("alice") => Json(json!({"id": "42"})).into_response(),
                    Some("bob") => Json(json!({"id": 7})).into_response(),
                    Some("broken") => AxumStatus::INTERNAL_SERVER_ERROR.into_response(),
                    _ => AxumStatus::NOT_FOUND.into_response(),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{addr}/lookup"))
    }

    #[tokio::test]
    async fn http_resolver_maps_responses() -> Result<()> {
        let resolver = HttpUserResolver::new(lookup_server().await?, Duration::from_secs(2))?;
        assert_eq!(resolver.user_from_provider("alice").await?, Some("42".to_string()));
        assert_eq!(resolver.user_from_provider("bob").await?, Some("7".to_string()));
        assert_eq!(resolver.user_from_provider("carol").await?, None);
        assert!(resolver.user_from_provider("broken").await.is_err());
        Ok(())
    }
}
