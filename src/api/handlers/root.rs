use axum::{extract::Extension, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::handlers::oidc::{AuthProviderRegistry, ProviderRoutes};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Root {
    name: String,
    version: String,
    providers: Vec<ProviderRoutes>,
}

#[utoipa::path(
    get,
    path= "/",
    responses (
        (status = 200, description = "Registered auth providers", body = Root)
    ),
    tag = "oidc",
)]
/// List the auth providers the host application can offer.
pub async fn root(registry: Extension<Arc<dyn AuthProviderRegistry>>) -> Json<Root> {
    Json(Root {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: registry.providers(),
    })
}
