//! Relying-party configuration.

use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::fmt;
use std::str::FromStr;
use url::Url;

use super::state_token::DEFAULT_PENDING_STATE_TTL_SECONDS;

pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "profile", "email"];
const DEFAULT_TOKEN_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_EXPIRY_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_SESSION_TTL_SECONDS: u64 = 12 * 60 * 60;
const DEFAULT_TARGET: &str = "/";

/// How the browser is sent to the authorization endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthorizationMethod {
    /// `303 See Other` with the parameters in the query string.
    #[default]
    Redirect,
    /// Auto-submitting HTML form posting the parameters.
    FormPost,
}

impl AuthorizationMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Redirect => "redirect",
            Self::FormPost => "form_post",
        }
    }
}

impl fmt::Display for AuthorizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthorizationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redirect" => Ok(Self::Redirect),
            "form_post" | "form-post" => Ok(Self::FormPost),
            other => Err(format!("invalid authorization method: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorization: String,
    pub token: String,
    pub end_session: String,
}

#[derive(Clone, Debug)]
pub struct OidcConfig {
    public_url: String,
    url_prefix: String,
    issuer: Option<String>,
    endpoints: ProviderEndpoints,
    token_endpoint_verify: bool,
    client_id: String,
    client_secret: SecretString,
    scopes: Vec<String>,
    jwks_uri: Option<String>,
    authorization_method: AuthorizationMethod,
    token_timeout_seconds: u64,
    default_expiry_seconds: u64,
    pending_state_ttl_seconds: u64,
    session_ttl_seconds: u64,
    default_target: String,
    allowed_redirect_hosts: Vec<String>,
    user_lookup_url: Option<String>,
}

impl OidcConfig {
    #[must_use]
    pub fn new(
        public_url: String,
        endpoints: ProviderEndpoints,
        client_id: String,
        client_secret: SecretString,
    ) -> Self {
        Self {
            public_url: public_url.trim_end_matches('/').to_string(),
            url_prefix: String::new(),
            issuer: None,
            endpoints,
            token_endpoint_verify: true,
            client_id,
            client_secret,
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            jwks_uri: None,
            authorization_method: AuthorizationMethod::default(),
            token_timeout_seconds: DEFAULT_TOKEN_TIMEOUT_SECONDS,
            default_expiry_seconds: DEFAULT_EXPIRY_SECONDS,
            pending_state_ttl_seconds: DEFAULT_PENDING_STATE_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            default_target: DEFAULT_TARGET.to_string(),
            allowed_redirect_hosts: Vec::new(),
            user_lookup_url: None,
        }
    }

    #[must_use]
    pub fn with_url_prefix(mut self, prefix: &str) -> Self {
        self.url_prefix = normalize_prefix(prefix);
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: Option<String>) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_token_endpoint_verify(mut self, verify: bool) -> Self {
        self.token_endpoint_verify = verify;
        self
    }

    /// Replace the requested scopes; an empty list keeps the defaults.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        let scopes: Vec<String> = scopes
            .into_iter()
            .map(|scope| scope.trim().to_string())
            .filter(|scope| !scope.is_empty())
            .collect();
        if !scopes.is_empty() {
            self.scopes = scopes;
        }
        self
    }

    #[must_use]
    pub fn with_jwks_uri(mut self, jwks_uri: Option<String>) -> Self {
        self.jwks_uri = jwks_uri;
        self
    }

    #[must_use]
    pub fn with_authorization_method(mut self, method: AuthorizationMethod) -> Self {
        self.authorization_method = method;
        self
    }

    #[must_use]
    pub fn with_token_timeout_seconds(mut self, seconds: u64) -> Self {
        self.token_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_default_expiry_seconds(mut self, seconds: u64) -> Self {
        self.default_expiry_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_pending_state_ttl_seconds(mut self, seconds: u64) -> Self {
        self.pending_state_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_default_target(mut self, target: String) -> Self {
        self.default_target = target;
        self
    }

    #[must_use]
    pub fn with_allowed_redirect_hosts(mut self, hosts: Vec<String>) -> Self {
        self.allowed_redirect_hosts = hosts
            .into_iter()
            .map(|host| host.trim().to_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn with_user_lookup_url(mut self, url: Option<String>) -> Self {
        self.user_lookup_url = url;
        self
    }

    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    #[must_use]
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    #[must_use]
    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    #[must_use]
    pub fn token_endpoint_verify(&self) -> bool {
        self.token_endpoint_verify
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Space-joined scope parameter.
    #[must_use]
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    #[must_use]
    pub fn jwks_uri(&self) -> Option<&str> {
        self.jwks_uri.as_deref()
    }

    #[must_use]
    pub fn authorization_method(&self) -> AuthorizationMethod {
        self.authorization_method
    }

    #[must_use]
    pub fn token_timeout_seconds(&self) -> u64 {
        self.token_timeout_seconds
    }

    #[must_use]
    pub fn default_expiry_seconds(&self) -> u64 {
        self.default_expiry_seconds
    }

    #[must_use]
    pub fn pending_state_ttl_seconds(&self) -> u64 {
        self.pending_state_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn default_target(&self) -> &str {
        &self.default_target
    }

    #[must_use]
    pub fn allowed_redirect_hosts(&self) -> &[String] {
        &self.allowed_redirect_hosts
    }

    #[must_use]
    pub fn user_lookup_url(&self) -> Option<&str> {
        self.user_lookup_url.as_deref()
    }

    /// Path of a flow endpoint under the configured prefix.
    #[must_use]
    pub fn route(&self, path: &str) -> String {
        format!("{}{path}", self.url_prefix)
    }

    /// Absolute `redirect_uri` sent with the authorization and token requests.
    #[must_use]
    pub fn login_callback_url(&self) -> String {
        format!("{}{}", self.public_url, self.route("/login_callback"))
    }

    #[must_use]
    pub fn logout_callback_url(&self) -> String {
        format!("{}{}", self.public_url, self.route("/logout_callback"))
    }

    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.public_url.starts_with("https://")
    }

    /// Check that every configured URL is absolute http(s) and the client id is set.
    ///
    /// # Errors
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        require_http_url("public URL", &self.public_url)?;
        require_http_url("authorization endpoint", &self.endpoints.authorization)?;
        require_http_url("token endpoint", &self.endpoints.token)?;
        require_http_url("end-session endpoint", &self.endpoints.end_session)?;
        if let Some(issuer) = &self.issuer {
            require_http_url("issuer", issuer)?;
        }
        if let Some(jwks_uri) = &self.jwks_uri {
            require_http_url("JWKS URI", jwks_uri)?;
        }
        if let Some(lookup) = &self.user_lookup_url {
            require_http_url("user lookup URL", lookup)?;
        }
        if self.client_id.trim().is_empty() {
            return Err(anyhow!("client id must not be empty"));
        }
        if self.token_timeout_seconds == 0 {
            return Err(anyhow!("token timeout must be greater than zero"));
        }
        Ok(())
    }
}

fn require_http_url(name: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value).with_context(|| format!("Invalid {name}: {value}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("{name} must use http or https: {value}"));
    }
    Ok(url)
}

/// `""` and `"/"` mean no prefix; anything else gets one leading slash and no
/// trailing slash.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
