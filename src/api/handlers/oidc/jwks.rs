//! RS256 identity-token verification against the provider's JWKS.
//!
//! Keys are cached in memory with a TTL and refreshed on stale cache or unknown
//! `kid`. If a refresh fails, the last known keyset keeps serving so a provider
//! blip does not lock users out.

use anyhow::{Context, Result, anyhow};
use base64ct::{Base64UrlUnpadded, Encoding};
use reqwest::{
    Client,
    header::{ETAG, IF_NONE_MATCH},
};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey, errors::Error as RsaError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{Instrument, info, info_span, warn};

use crate::api::handlers::{DependencyStatus, now_unix_seconds};
use super::claims::{Claims, ClaimsError, decode_json_object, numeric_date, split_token};

const KEYSET_CACHE_TTL_SECONDS: u64 = 300;
const KEYSET_REFRESH_COOLDOWN_SECONDS: u64 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Parse a JWKS document.
    ///
    /// # Errors
    /// Returns an error if `s` is not a JWKS.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// RSA key matching `kid`; without a `kid`, the only RSA key if there is exactly one.
    #[must_use]
    pub fn find_rsa_key(&self, kid: Option<&str>) -> Option<&Jwk> {
        let mut rsa_keys = self.keys.iter().filter(|key| key.kty == "RSA");
        match kid {
            Some(kid) => rsa_keys.find(|key| key.kid.as_deref() == Some(kid)),
            None => {
                let first = rsa_keys.next()?;
                rsa_keys.next().is_none().then_some(first)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default)]
    pub n: String,
    #[serde(default)]
    pub e: String,
}

impl Jwk {
    /// Convert this JWK to an `RsaPublicKey`.
    ///
    /// # Errors
    /// Returns an error if the modulus or exponent are not valid base64url or do
    /// not form a valid RSA key.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, VerifyError> {
        let n_bytes = Base64UrlUnpadded::decode_vec(&self.n).map_err(|_| VerifyError::Base64)?;
        let e_bytes = Base64UrlUnpadded::decode_vec(&self.e).map_err(|_| VerifyError::Base64)?;
        let n = BigUint::from_bytes_be(&n_bytes);
        let e = BigUint::from_bytes_be(&e_bytes);
        RsaPublicKey::new(n, e).map_err(VerifyError::Rsa)
    }
}

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("rsa error")]
    Rsa(#[from] RsaError),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token has no exp claim")]
    MissingExpiry,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
}

impl From<ClaimsError> for VerifyError {
    fn from(err: ClaimsError) -> Self {
        match err {
            ClaimsError::TokenFormat | ClaimsError::NotAnObject => Self::TokenFormat,
            ClaimsError::Base64 => Self::Base64,
            ClaimsError::Json(err) => Self::Json(err),
        }
    }
}

/// Verify an RS256 id token and return its claims.
///
/// # Errors
/// Returns an error if the token is malformed, signed with an unknown key or a
/// non-RS256 algorithm, carries a bad signature, or fails the `iss`, `aud` or
/// `exp` checks.
pub fn verify_rs256(
    token: &str,
    jwks: &Jwks,
    expected_issuer: Option<&str>,
    expected_audience: &str,
    now: i64,
) -> Result<Claims, VerifyError> {
    let (header_b64, claims_b64, sig_b64) = split_token(token)?;

    let header_bytes =
        Base64UrlUnpadded::decode_vec(header_b64).map_err(|_| VerifyError::Base64)?;
    let header: TokenHeader = serde_json::from_slice(&header_bytes)?;
    if header.alg != "RS256" {
        return Err(VerifyError::UnsupportedAlg(header.alg));
    }

    let jwk = jwks
        .find_rsa_key(header.kid.as_deref())
        .ok_or_else(|| VerifyError::UnknownKid(header.kid.clone().unwrap_or_default()))?;

    let public_key = jwk.to_rsa_public_key()?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| VerifyError::Base64)?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|_| VerifyError::InvalidSignature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| VerifyError::InvalidSignature)?;

    let claims = decode_json_object(claims_b64)?;

    if let Some(issuer) = expected_issuer {
        if claims.get("iss").and_then(Value::as_str) != Some(issuer) {
            return Err(VerifyError::InvalidIssuer);
        }
    }

    let audience_ok = match claims.get("aud") {
        Some(Value::String(aud)) => aud == expected_audience,
        Some(Value::Array(auds)) => auds
            .iter()
            .any(|aud| aud.as_str() == Some(expected_audience)),
        _ => false,
    };
    if !audience_ok {
        return Err(VerifyError::InvalidAudience);
    }

    let exp = claims
        .get("exp")
        .and_then(numeric_date)
        .ok_or(VerifyError::MissingExpiry)?;
    if exp <= now {
        return Err(VerifyError::Expired);
    }

    Ok(claims)
}

#[derive(Debug)]
enum KeysetSource {
    /// Keyset supplied at construction and never refreshed.
    Static,
    /// Keyset fetched from the provider's `jwks_uri`.
    Remote { url: String, client: Client },
}

#[derive(Debug, Clone)]
struct KeysetCache {
    keyset: Jwks,
    fetched_at: Instant,
    etag: Option<String>,
}

impl KeysetCache {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < Duration::from_secs(KEYSET_CACHE_TTL_SECONDS)
    }
}

/// Verifies id tokens using a cached JWKS.
#[derive(Debug)]
pub struct IdTokenVerifier {
    keyset_source: KeysetSource,
    keyset_cache: RwLock<KeysetCache>,
    issuer: Option<String>,
    audience: String,
    /// Throttles refreshes triggered by unknown `kid`s.
    last_refresh_unix: AtomicU64,
}

impl IdTokenVerifier {
    #[must_use]
    pub fn new_static(keyset: Jwks, issuer: Option<String>, audience: String) -> Self {
        Self {
            keyset_source: KeysetSource::Static,
            keyset_cache: RwLock::new(KeysetCache {
                keyset,
                fetched_at: Instant::now(),
                etag: None,
            }),
            issuer,
            audience,
            last_refresh_unix: AtomicU64::new(0),
        }
    }

    /// Build a verifier that fetches the JWKS from `url`.
    ///
    /// The startup fetch is best-effort: on failure the verifier starts with an
    /// empty, stale cache, so `/health` reports an error and verification fails
    /// closed until a refresh succeeds.
    ///
    /// # Errors
    /// Returns an error if the URL or HTTP client are invalid.
    pub async fn new_remote(
        url: String,
        issuer: Option<String>,
        audience: String,
        timeout: Duration,
    ) -> Result<Self> {
        let parsed = url::Url::parse(&url).context("Invalid JWKS URL")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("JWKS URL must use http or https: {url}"));
        }

        let client = Client::builder()
            .use_rustls_tls()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build JWKS HTTP client")?;

        let (keyset, fetched_at, last_refresh_unix, etag) =
            match fetch_keyset(&client, &url, None).await {
                Ok(FetchOutcome::Updated { keyset, etag }) => {
                    (keyset, Instant::now(), now_unix_seconds_u64(), etag)
                }
                Ok(FetchOutcome::NotModified) => {
                    warn!("JWKS fetch returned not-modified during startup");
                    (Jwks::default(), stale_instant(), 0, None)
                }
                Err(err) => {
                    warn!(
                        url = %url,
                        error = %err,
                        "JWKS fetch failed during startup; continuing with empty keyset"
                    );
                    (Jwks::default(), stale_instant(), 0, None)
                }
            };

        Ok(Self {
            keyset_source: KeysetSource::Remote { url, client },
            keyset_cache: RwLock::new(KeysetCache {
                keyset,
                fetched_at,
                etag,
            }),
            issuer,
            audience,
            last_refresh_unix: AtomicU64::new(last_refresh_unix),
        })
    }

    #[must_use]
    pub fn jwks_uri(&self) -> Option<&str> {
        match &self.keyset_source {
            KeysetSource::Static => None,
            KeysetSource::Remote { url, .. } => Some(url.as_str()),
        }
    }

    async fn keyset_snapshot(&self) -> Jwks {
        let (cached, fresh) = {
            let cache = self.keyset_cache.read().await;
            (cache.keyset.clone(), cache.is_fresh())
        };

        if fresh {
            return cached;
        }

        if let KeysetSource::Remote { url, .. } = &self.keyset_source {
            if let Err(err) = self.refresh_keyset().await {
                warn!(error = %err, url = %url, "failed to refresh JWKS cache");
                return cached;
            }
        }

        self.keyset_cache.read().await.keyset.clone()
    }

    async fn refresh_keyset(&self) -> Result<()> {
        let (url, client, etag) = match &self.keyset_source {
            KeysetSource::Static => return Ok(()),
            KeysetSource::Remote { url, client } => {
                let etag = self.keyset_cache.read().await.etag.clone();
                (url.clone(), client.clone(), etag)
            }
        };

        match fetch_keyset(&client, &url, etag.as_deref()).await? {
            FetchOutcome::NotModified => {
                let mut cache = self.keyset_cache.write().await;
                cache.fetched_at = Instant::now();
            }
            FetchOutcome::Updated { keyset, etag } => {
                let mut cache = self.keyset_cache.write().await;
                cache.keyset = keyset;
                cache.fetched_at = Instant::now();
                cache.etag = etag;
                info!(keyset_keys = cache.keyset.keys.len(), "JWKS cache refreshed");
            }
        }
        Ok(())
    }

    /// Report dependency status for `/health` by attempting a refresh.
    pub async fn dependency_status(&self) -> DependencyStatus {
        match &self.keyset_source {
            KeysetSource::Static => DependencyStatus::Static,
            KeysetSource::Remote { url, .. } => match self.refresh_keyset().await {
                Ok(()) => DependencyStatus::Ok,
                Err(err) => {
                    warn!(error = %err, url = %url, "JWKS fetch failed during health check");
                    DependencyStatus::Error
                }
            },
        }
    }

    async fn refresh_on_unknown_kid(&self) -> Result<bool> {
        if matches!(&self.keyset_source, KeysetSource::Static) {
            return Ok(false);
        }
        let now = now_unix_seconds_u64();
        let last = self.last_refresh_unix.load(Ordering::Relaxed);
        if now.saturating_sub(last) < KEYSET_REFRESH_COOLDOWN_SECONDS {
            return Ok(false);
        }
        self.last_refresh_unix.store(now, Ordering::Relaxed);
        self.refresh_keyset().await?;
        Ok(true)
    }

    /// Verify `token` and return its claims.
    ///
    /// On an unknown `kid` the keyset is refreshed (with cooldown) and
    /// verification retried once.
    ///
    /// # Errors
    /// See [`verify_rs256`].
    pub async fn verify(&self, token: &str, now: i64) -> Result<Claims, VerifyError> {
        let keyset = self.keyset_snapshot().await;
        match verify_rs256(token, &keyset, self.issuer.as_deref(), &self.audience, now) {
            Err(VerifyError::UnknownKid(kid)) => match self.refresh_on_unknown_kid().await {
                Ok(true) => {
                    let keyset = self.keyset_cache.read().await.keyset.clone();
                    verify_rs256(token, &keyset, self.issuer.as_deref(), &self.audience, now)
                }
                Ok(false) => Err(VerifyError::UnknownKid(kid)),
                Err(err) => {
                    warn!(error = %err, "JWKS refresh on unknown kid failed");
                    Err(VerifyError::UnknownKid(kid))
                }
            },
            result => result,
        }
    }
}

fn now_unix_seconds_u64() -> u64 {
    u64::try_from(now_unix_seconds()).unwrap_or(0)
}

/// An `Instant` old enough to force a refresh on first use.
fn stale_instant() -> Instant {
    Instant::now()
        .checked_sub(Duration::from_secs(KEYSET_CACHE_TTL_SECONDS + 1))
        .unwrap_or_else(Instant::now)
}

enum FetchOutcome {
    NotModified,
    Updated { keyset: Jwks, etag: Option<String> },
}

async fn fetch_keyset(client: &Client, url: &str, etag: Option<&str>) -> Result<FetchOutcome> {
    let span = info_span!("oidc.jwks.fetch", http.method = "GET", url = %url);
    async {
        let mut request = client.get(url);
        if let Some(etag_value) = etag {
            request = request.header(IF_NONE_MATCH, etag_value);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 304 {
            return Ok(FetchOutcome::NotModified);
        }
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        if !status.is_success() {
            return Err(anyhow!("JWKS fetch failed: {status}"));
        }

        let keyset = Jwks::from_json(&body).context("Invalid JWKS JSON")?;
        Ok(FetchOutcome::Updated { keyset, etag })
    }
    .instrument(span)
    .await
}
