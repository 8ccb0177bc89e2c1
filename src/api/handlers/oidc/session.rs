//! Browser sessions for the OIDC flows.
//!
//! Each session is a set of namespaced JSON values (the pending-state map lives
//! under `auth_oidc`, the identity context under `auth`). Sessions are keyed by a
//! random token carried in an `HttpOnly` cookie and expire after an idle TTL.
//!
//! Every read-modify-write of a session runs under the store lock, so a caller
//! that checks and inserts inside one closure gets test-and-set semantics even
//! when several tabs share the same session.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue, SET_COOKIE},
};
use axum::response::Response;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::RngCore;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::error;

pub const SESSION_COOKIE_NAME: &str = "auth_oidc_session";

/// Namespaced session data with an explicit "modified" flag.
#[derive(Clone, Debug, Default)]
pub struct Session {
    namespaces: HashMap<String, Value>,
    modified: bool,
}

impl Session {
    /// Read a namespace, returning `Ok(None)` when it was never written.
    ///
    /// # Errors
    /// Returns an error if the stored value does not deserialize into `T`.
    pub fn namespace<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, serde_json::Error> {
        self.namespaces
            .get(name)
            .cloned()
            .map(serde_json::from_value)
            .transpose()
    }

    /// Replace a namespace and mark the session as modified.
    ///
    /// # Errors
    /// Returns an error if `value` cannot be serialized.
    pub fn set_namespace<T: Serialize>(
        &mut self,
        name: &str,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.namespaces.insert(name.to_string(), value);
        self.mark_modified();
        Ok(())
    }

    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }
}

struct SessionEntry {
    session: Session,
    touched_at: Instant,
}

/// Result of running a closure against a session.
#[derive(Debug)]
pub struct SessionScope<R> {
    pub session_id: String,
    /// A new session was persisted; the caller must issue the cookie.
    pub created: bool,
    pub value: R,
}

pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Run `f` against session `id`, starting a fresh session when `id` is missing,
    /// unknown, or expired. A fresh session is only kept if `f` modified it.
    pub async fn with_session<R>(
        &self,
        id: Option<&str>,
        f: impl FnOnce(&mut Session) -> R,
    ) -> SessionScope<R> {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, entry| entry.touched_at.elapsed() < self.ttl);

        let existing = id
            .filter(|id| sessions.contains_key(*id))
            .map(str::to_string);
        let (session_id, is_new) = match existing {
            Some(id) => (id, false),
            None => (generate_session_id(), true),
        };

        let entry = sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionEntry {
                session: Session::default(),
                touched_at: Instant::now(),
            });
        let value = f(&mut entry.session);
        let modified = entry.session.modified;
        entry.session.modified = false;
        entry.touched_at = Instant::now();

        if is_new && !modified {
            sessions.remove(&session_id);
        }

        SessionScope {
            session_id,
            created: is_new && modified,
            value,
        }
    }

    /// Run `f` against an existing, unexpired session. Returns `None` when there is
    /// no such session; a callback without a session can never match a pending state.
    pub async fn with_existing<R>(
        &self,
        id: Option<&str>,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let id = id?;
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, entry| entry.touched_at.elapsed() < self.ttl);

        let entry = sessions.get_mut(id)?;
        let value = f(&mut entry.session);
        entry.session.modified = false;
        entry.touched_at = Instant::now();
        Some(value)
    }
}

/// Random 256-bit session identifier, URL-safe encoded.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Build the `HttpOnly` session cookie.
pub(super) fn session_cookie(
    session_id: &str,
    ttl: Duration,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = ttl.as_secs();
    // Lax keeps the cookie on the top-level GET back from the provider.
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={session_id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Attach the cookie for a newly created session to `response`.
pub(super) fn attach_session_cookie(
    response: &mut Response,
    session_id: &str,
    ttl: Duration,
    secure: bool,
) {
    match session_cookie(session_id, ttl, secure) {
        Ok(cookie) => {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
}

pub(super) fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty() {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}
