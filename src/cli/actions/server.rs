use crate::{
    api::{
        self,
        handlers::oidc::{
            AuthProviderRegistry, InMemoryProviderRegistry, OidcConfig, OidcState,
            ProviderEndpoints,
        },
    },
    cli::commands::{oidc, session},
};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub oidc: oidc::Options,
    pub session: session::Options,
}

/// Build the relying-party configuration from parsed arguments.
#[must_use]
pub fn oidc_config(args: &Args) -> OidcConfig {
    let options = &args.oidc;
    OidcConfig::new(
        options.public_url.clone(),
        ProviderEndpoints {
            authorization: options.authorization_endpoint.clone(),
            token: options.token_endpoint.clone(),
            end_session: options.end_session_endpoint.clone(),
        },
        options.client_id.clone(),
        options.client_secret.clone(),
    )
    .with_url_prefix(&options.url_prefix)
    .with_issuer(options.issuer.clone())
    .with_token_endpoint_verify(options.token_endpoint_verify)
    .with_scopes(options.scopes.clone())
    .with_jwks_uri(options.jwks_uri.clone())
    .with_authorization_method(options.authorization_method)
    .with_token_timeout_seconds(options.token_timeout_seconds)
    .with_default_expiry_seconds(options.default_expiry_seconds)
    .with_pending_state_ttl_seconds(args.session.pending_state_ttl_seconds)
    .with_session_ttl_seconds(args.session.session_ttl_seconds)
    .with_default_target(options.default_target.clone())
    .with_allowed_redirect_hosts(options.allowed_redirect_hosts.clone())
    .with_user_lookup_url(options.user_lookup_url.clone())
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, the JWKS cannot be set up,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let state = OidcState::initialize(oidc_config(&args)).await?;
    let registry: Arc<dyn AuthProviderRegistry> = Arc::new(InMemoryProviderRegistry::default());

    api::new(args.port, Arc::new(state), registry).await
}

fn log_startup_args(args: &Args) {
    let options = &args.oidc;
    let or_none = |value: &Option<String>| value.clone().unwrap_or_else(|| "none".to_string());
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("public_url", options.public_url.clone()),
        (
            "url_prefix",
            if options.url_prefix.is_empty() {
                "/".to_string()
            } else {
                options.url_prefix.clone()
            },
        ),
        ("issuer", or_none(&options.issuer)),
        ("authorization_endpoint", options.authorization_endpoint.clone()),
        ("token_endpoint", options.token_endpoint.clone()),
        (
            "token_endpoint_verify",
            options.token_endpoint_verify.to_string(),
        ),
        ("end_session_endpoint", options.end_session_endpoint.clone()),
        ("client_id", options.client_id.clone()),
        ("client_secret", "REDACTED".to_string()),
        ("scope", options.scopes.join(" ")),
        ("jwks_uri", or_none(&options.jwks_uri)),
        (
            "authorization_method",
            options.authorization_method.to_string(),
        ),
        ("default_target", options.default_target.clone()),
        (
            "allowed_redirect_hosts",
            options.allowed_redirect_hosts.join(","),
        ),
        ("user_lookup_url", or_none(&options.user_lookup_url)),
        (
            "session_ttl_seconds",
            args.session.session_ttl_seconds.to_string(),
        ),
        (
            "pending_state_ttl_seconds",
            args.session.pending_state_ttl_seconds.to_string(),
        ),
    ];
    info!("{}", format_entries("Startup configuration", &entries));
}

fn format_entries(title: &str, entries: &[(&str, String)]) -> String {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    message
}

fn short_commit(hash: &str) -> String {
    hash.trim().chars().take(7).collect()
}
