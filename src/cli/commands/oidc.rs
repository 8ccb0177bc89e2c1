use crate::api::handlers::oidc::AuthorizationMethod;
use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command, builder::BoolishValueParser};
use secrecy::SecretString;

pub const ARG_PUBLIC_URL: &str = "public-url";
pub const ARG_URL_PREFIX: &str = "url-prefix";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_AUTHORIZATION_ENDPOINT: &str = "authorization-endpoint";
pub const ARG_TOKEN_ENDPOINT: &str = "token-endpoint";
pub const ARG_TOKEN_ENDPOINT_VERIFY: &str = "token-endpoint-verify";
pub const ARG_END_SESSION_ENDPOINT: &str = "end-session-endpoint";
pub const ARG_CLIENT_ID: &str = "client-id";
pub const ARG_CLIENT_SECRET: &str = "client-secret";
pub const ARG_SCOPE: &str = "scope";
pub const ARG_JWKS_URI: &str = "jwks-uri";
pub const ARG_TOKEN_TIMEOUT_SECONDS: &str = "token-timeout-seconds";
pub const ARG_DEFAULT_EXPIRY_SECONDS: &str = "default-expiry-seconds";
pub const ARG_AUTHORIZATION_METHOD: &str = "authorization-method";
pub const ARG_DEFAULT_TARGET: &str = "default-target";
pub const ARG_ALLOWED_REDIRECT_HOSTS: &str = "allowed-redirect-hosts";
pub const ARG_USER_LOOKUP_URL: &str = "user-lookup-url";

#[derive(Debug, Clone)]
pub struct Options {
    pub public_url: String,
    pub url_prefix: String,
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub token_endpoint_verify: bool,
    pub end_session_endpoint: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub scopes: Vec<String>,
    pub jwks_uri: Option<String>,
    pub token_timeout_seconds: u64,
    pub default_expiry_seconds: u64,
    pub authorization_method: AuthorizationMethod,
    pub default_target: String,
    pub allowed_redirect_hosts: Vec<String>,
    pub user_lookup_url: Option<String>,
}

impl Options {
    /// Parse relying-party arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing or empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // Helper to filter empty strings which clap might pass through if env vars are set to ""
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let required = |id: &str| {
            get_non_empty(id).with_context(|| format!("missing required argument: --{id}"))
        };

        Ok(Self {
            public_url: required(ARG_PUBLIC_URL)?,
            url_prefix: get_non_empty(ARG_URL_PREFIX).unwrap_or_default(),
            issuer: get_non_empty(ARG_ISSUER),
            authorization_endpoint: required(ARG_AUTHORIZATION_ENDPOINT)?,
            token_endpoint: required(ARG_TOKEN_ENDPOINT)?,
            token_endpoint_verify: matches
                .get_one::<bool>(ARG_TOKEN_ENDPOINT_VERIFY)
                .copied()
                .unwrap_or(true),
            end_session_endpoint: required(ARG_END_SESSION_ENDPOINT)?,
            client_id: required(ARG_CLIENT_ID)?,
            client_secret: SecretString::from(required(ARG_CLIENT_SECRET)?),
            scopes: get_non_empty(ARG_SCOPE)
                .map(|scope| split_list(&scope))
                .unwrap_or_default(),
            jwks_uri: get_non_empty(ARG_JWKS_URI),
            token_timeout_seconds: matches
                .get_one::<u64>(ARG_TOKEN_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(10),
            default_expiry_seconds: matches
                .get_one::<u64>(ARG_DEFAULT_EXPIRY_SECONDS)
                .copied()
                .unwrap_or(86_400),
            authorization_method: matches
                .get_one::<AuthorizationMethod>(ARG_AUTHORIZATION_METHOD)
                .copied()
                .unwrap_or_default(),
            default_target: get_non_empty(ARG_DEFAULT_TARGET).unwrap_or_else(|| "/".to_string()),
            allowed_redirect_hosts: get_non_empty(ARG_ALLOWED_REDIRECT_HOSTS)
                .map(|hosts| split_list(&hosts))
                .unwrap_or_default(),
            user_lookup_url: get_non_empty(ARG_USER_LOOKUP_URL),
        })
    }
}

/// Split a comma or space separated list, dropping empty items.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_provider_args(command);
    let command = with_client_args(command);
    with_flow_args(command)
}

fn with_provider_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Expected id token issuer (iss)")
                .env("AUTH_OIDC_ISSUER"),
        )
        .arg(
            Arg::new(ARG_AUTHORIZATION_ENDPOINT)
                .long(ARG_AUTHORIZATION_ENDPOINT)
                .help("Provider authorization endpoint")
                .env("AUTH_OIDC_AUTHORIZATION_ENDPOINT")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ENDPOINT)
                .long(ARG_TOKEN_ENDPOINT)
                .help("Provider token endpoint")
                .env("AUTH_OIDC_TOKEN_ENDPOINT")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ENDPOINT_VERIFY)
                .long(ARG_TOKEN_ENDPOINT_VERIFY)
                .help("Verify the token endpoint TLS certificate")
                .env("AUTH_OIDC_TOKEN_ENDPOINT_VERIFY")
                .action(ArgAction::Set)
                .default_value("true")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_END_SESSION_ENDPOINT)
                .long(ARG_END_SESSION_ENDPOINT)
                .help("Provider end-session endpoint")
                .env("AUTH_OIDC_END_SESSION_ENDPOINT")
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWKS_URI)
                .long(ARG_JWKS_URI)
                .help("Provider JWKS URI; enables id token signature verification")
                .long_help(
                    "Provider JWKS URI. When set, id tokens must be RS256-signed by a key from this keyset, carry the\nclient id in `aud`, and match --issuer when configured.\n\nThe keyset is cached (TTL ~5 minutes) and refreshed on unknown `kid` with a cooldown.\nWithout it, id token claims are trusted without signature verification.",
                )
                .env("AUTH_OIDC_JWKS_URI"),
        )
        .arg(
            Arg::new(ARG_TOKEN_TIMEOUT_SECONDS)
                .long(ARG_TOKEN_TIMEOUT_SECONDS)
                .help("Timeout for token endpoint and user lookup requests")
                .env("AUTH_OIDC_TOKEN_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_client_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CLIENT_ID)
                .long(ARG_CLIENT_ID)
                .help("OAuth client id")
                .env("AUTH_OIDC_CLIENT_ID")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CLIENT_SECRET)
                .long(ARG_CLIENT_SECRET)
                .help("OAuth client secret")
                .env("AUTH_OIDC_CLIENT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_SCOPE)
                .long(ARG_SCOPE)
                .help("Requested scopes, space or comma separated (default: openid profile email)")
                .env("AUTH_OIDC_SCOPE"),
        )
        .arg(
            Arg::new(ARG_AUTHORIZATION_METHOD)
                .long(ARG_AUTHORIZATION_METHOD)
                .help("How the browser is sent to the provider: redirect or form_post")
                .env("AUTH_OIDC_AUTHORIZATION_METHOD")
                .default_value("redirect")
                .value_parser(clap::value_parser!(AuthorizationMethod)),
        )
}

fn with_flow_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PUBLIC_URL)
                .long(ARG_PUBLIC_URL)
                .help("Externally visible base URL of this service, used to build callback URLs")
                .env("AUTH_OIDC_PUBLIC_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_URL_PREFIX)
                .long(ARG_URL_PREFIX)
                .help("Path prefix for the login and logout endpoints, example: /auth")
                .env("AUTH_OIDC_URL_PREFIX"),
        )
        .arg(
            Arg::new(ARG_DEFAULT_EXPIRY_SECONDS)
                .long(ARG_DEFAULT_EXPIRY_SECONDS)
                .help("Login lifetime when the id token has no exp claim")
                .env("AUTH_OIDC_DEFAULT_EXPIRY_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_DEFAULT_TARGET)
                .long(ARG_DEFAULT_TARGET)
                .help("Where to send the browser when target_to is missing or not allowed")
                .env("AUTH_OIDC_DEFAULT_TARGET")
                .default_value("/"),
        )
        .arg(
            Arg::new(ARG_ALLOWED_REDIRECT_HOSTS)
                .long(ARG_ALLOWED_REDIRECT_HOSTS)
                .help("Hosts absolute target_to URLs may point at, comma separated")
                .env("AUTH_OIDC_ALLOWED_REDIRECT_HOSTS"),
        )
        .arg(
            Arg::new(ARG_USER_LOOKUP_URL)
                .long(ARG_USER_LOOKUP_URL)
                .help("URL resolving provider user names to local user ids (POST {\"name\": ...})")
                .env("AUTH_OIDC_USER_LOOKUP_URL"),
        )
}
