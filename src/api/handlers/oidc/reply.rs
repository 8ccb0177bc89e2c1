//! Access-result rendering and the open-redirect guard.
//!
//! Continuation tokens come straight from the browser, so a target is only
//! followed when it is a same-origin relative reference or an absolute http(s)
//! URL on an allow-listed host. Anything else lands on the default target.

use axum::{
    http::{HeaderValue, StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};
use url::{ParseError, Url};

const ACCESS_DENIED: &str = "Access denied";
const FALLBACK_TARGET: &str = "/";

#[derive(Clone, Debug)]
pub struct AccessReplies {
    default_target: String,
    allowed_hosts: Vec<String>,
}

impl AccessReplies {
    #[must_use]
    pub fn new(default_target: String, allowed_hosts: Vec<String>) -> Self {
        Self {
            default_target,
            allowed_hosts,
        }
    }

    /// Generic refusal. Carries no detail about why.
    #[must_use]
    pub fn access_denied_reply(&self) -> Response {
        (StatusCode::FORBIDDEN, ACCESS_DENIED).into_response()
    }

    #[must_use]
    pub fn access_success_redirect(&self, continuation_token: &str) -> Response {
        see_other(&self.resolve_target(continuation_token))
    }

    #[must_use]
    pub fn logout_success_redirect(&self, continuation_token: &str) -> Response {
        see_other(&self.resolve_target(continuation_token))
    }

    /// Where the browser should go for `continuation_token`.
    #[must_use]
    pub fn resolve_target(&self, continuation_token: &str) -> String {
        if self.is_allowed(continuation_token) {
            continuation_token.to_string()
        } else {
            if !continuation_token.is_empty() {
                warn!(target_to = %continuation_token, "Refusing redirect target");
            }
            self.default_target.clone()
        }
    }

    fn is_allowed(&self, target: &str) -> bool {
        if target.is_empty() || target.chars().any(char::is_control) {
            return false;
        }
        // The URL parser and browsers both strip surrounding whitespace.
        if target.trim() != target {
            return false;
        }
        // Browsers read `//host` and `/\host` as scheme-relative.
        if target.starts_with("//") || target.starts_with("/\\") || target.starts_with('\\') {
            return false;
        }
        match Url::parse(target) {
            Ok(url) => {
                matches!(url.scheme(), "http" | "https")
                    && url.host_str().is_some_and(|host| {
                        let host = host.to_lowercase();
                        self.allowed_hosts.iter().any(|allowed| *allowed == host)
                    })
            }
            Err(ParseError::RelativeUrlWithoutBase) => true,
            Err(_) => false,
        }
    }
}

/// `303 See Other` to `location`, falling back to `/` if it is not a valid header value.
pub(super) fn see_other(location: &str) -> Response {
    let value = HeaderValue::from_str(location).unwrap_or_else(|err| {
        debug!("Invalid redirect location {location:?}: {err}");
        HeaderValue::from_static(FALLBACK_TARGET)
    });
    let mut response = StatusCode::SEE_OTHER.into_response();
    response.headers_mut().insert(LOCATION, value);
    response
}
