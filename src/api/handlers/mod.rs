//! API handlers and shared utilities.
//!
//! The OIDC login and logout flows live in [`oidc`]; [`health`] and [`root`]
//! are the operational endpoints.

pub mod health;
pub mod oidc;
pub mod root;

use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    /// Remote JWKS is reachable.
    Ok,
    /// Remote JWKS is unreachable or could not be parsed.
    Error,
    /// Keyset was supplied up front; no external dependency.
    Static,
    /// Id tokens are not signature-checked.
    Disabled,
}

impl DependencyStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Static => "static",
            Self::Disabled => "disabled",
        }
    }

    #[must_use]
    pub const fn is_healthy(self) -> bool {
        !matches!(self, Self::Error)
    }
}

/// Unix seconds for state TTLs and token expiry.
#[must_use]
pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
