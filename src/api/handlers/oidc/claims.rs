//! Identity-token claim decoding.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::{Map, Value};
use thiserror::Error;

pub type Claims = Map<String, Value>;

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("token is not a three-part compact JWS")]
    TokenFormat,
    #[error("token segment is not valid base64url")]
    Base64,
    #[error("token segment is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("token claims are not a JSON object")]
    NotAnObject,
}

/// Split a compact JWS into header, payload and signature segments.
pub(super) fn split_token(token: &str) -> Result<(&str, &str, &str), ClaimsError> {
    let mut parts = token.split('.');
    let header = parts.next().ok_or(ClaimsError::TokenFormat)?;
    let payload = parts.next().ok_or(ClaimsError::TokenFormat)?;
    let signature = parts.next().ok_or(ClaimsError::TokenFormat)?;
    if parts.next().is_some() || header.is_empty() || payload.is_empty() {
        return Err(ClaimsError::TokenFormat);
    }
    Ok((header, payload, signature))
}

pub(super) fn decode_segment(segment: &str) -> Result<Vec<u8>, ClaimsError> {
    // Some providers pad their segments.
    Base64UrlUnpadded::decode_vec(segment.trim_end_matches('=')).map_err(|_| ClaimsError::Base64)
}

pub(super) fn decode_json_object(segment: &str) -> Result<Claims, ClaimsError> {
    let bytes = decode_segment(segment)?;
    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(map) => Ok(map),
        _ => Err(ClaimsError::NotAnObject),
    }
}

/// Decode the payload of an id token without checking its signature.
///
/// # Errors
/// Returns an error if the token is not a compact JWS with a JSON object payload.
pub fn decode_unverified(token: &str) -> Result<Claims, ClaimsError> {
    let (_, payload, _) = split_token(token)?;
    decode_json_object(payload)
}

/// The subset of id-token claims the login flow relies on.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityAssertion {
    pub subject: String,
    pub preferred_username: Option<String>,
    pub expires_at: Option<i64>,
    pub claims: Claims,
}

impl IdentityAssertion {
    /// Build the assertion, returning `None` when `sub` is missing or not a
    /// non-empty string.
    #[must_use]
    pub fn from_claims(claims: Claims) -> Option<Self> {
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|sub| !sub.is_empty())?
            .to_string();
        let preferred_username = claims
            .get("preferred_username")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string);
        let expires_at = claims.get("exp").and_then(numeric_date);

        Some(Self {
            subject,
            preferred_username,
            expires_at,
            claims,
        })
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.preferred_username.as_deref().unwrap_or(&self.subject)
    }

    /// `exp` when present, otherwise `now + fallback_seconds`.
    #[must_use]
    pub fn expires_at_or(&self, now: i64, fallback_seconds: u64) -> i64 {
        self.expires_at.unwrap_or_else(|| {
            now.saturating_add(i64::try_from(fallback_seconds).unwrap_or(i64::MAX))
        })
    }
}

/// JWT NumericDate; fractional seconds are truncated.
#[allow(clippy::cast_possible_truncation)]
/// `NumericDate` as whole seconds; fractional values are truncated.
pub(super) fn numeric_date(value: &Value) -> Option<i64> {
    if let Some(seconds) = value.as_i64() {
        return Some(seconds);
    }
    let seconds = value.as_f64()?;
    if seconds.is_finite() && seconds >= i64::MIN as f64 && seconds < i64::MAX as f64 {
        Some(seconds.trunc() as i64)
    } else {
        None
    }
}
