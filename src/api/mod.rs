use crate::api::handlers::{
    health,
    oidc::{AuthProviderRegistry, OidcState, PROVIDER_ID},
};
use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::options,
};
use std::{future::Future, sync::Arc};
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, debug_span, error, info};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
pub mod openapi;

/// Assemble the HTTP application: documented routes, Swagger UI and the
/// shared layers.
pub fn app(oidc: Arc<OidcState>, registry: Arc<dyn AuthProviderRegistry>) -> Router {
    let (router, openapi) = openapi::api_router(oidc.config().url_prefix()).split_for_parts();

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(oidc))
                .layer(Extension(registry)),
        )
}

/// Bind `[::]:port` and serve until Ctrl+C or SIGTERM.
///
/// # Errors
/// Returns an error if the server fails to start
pub async fn new(
    port: u16,
    oidc: Arc<OidcState>,
    registry: Arc<dyn AuthProviderRegistry>,
) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    serve(listener, oidc, registry, shutdown_signal()).await
}

/// Serve on `listener` until `shutdown` resolves.
///
/// The provider is registered for the lifetime of the server.
///
/// # Errors
/// Returns an error if serving fails
pub async fn serve<F>(
    listener: TcpListener,
    oidc: Arc<OidcState>,
    registry: Arc<dyn AuthProviderRegistry>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = oidc.config();
    registry.register_auth_provider(
        PROVIDER_ID,
        &config.route("/login"),
        &config.route("/logout"),
    );

    let app = app(oidc, registry.clone());
    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await;

    registry.unregister_auth_provider(PROVIDER_ID);
    info!("Gracefully shutdown");

    Ok(served?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let method = request.method().as_str();
    let path = request.uri().path();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(path, MatchedPath::as_str);
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", method, route, path, request_id)
}
