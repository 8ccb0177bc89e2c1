//! Single-use state tokens binding a provider round trip to the browser session.
//!
//! A pending entry is keyed by a random v4 UUID (the correlation id). The value
//! sent to the provider as `state` is the base64url encoding of the 16 UUID bytes,
//! so it carries no session data and can be decoded without a lookup.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::{Uuid, Version};

use super::session::Session;

/// Session namespace holding the pending-state map.
pub const NAMESPACE: &str = "auth_oidc";

pub const DEFAULT_PENDING_STATE_TTL_SECONDS: u64 = 10 * 60;

/// Fresh ids are 122 random bits; hitting this bound means the generator is broken.
const MAX_GENERATE_ATTEMPTS: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingState {
    pub correlation_id: Uuid,
    pub external_state: String,
    pub continuation_token: String,
    pub created_at: i64,
}

pub type PendingStateMap = HashMap<Uuid, PendingState>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state is not a valid encoded correlation id")]
    Invalid,
    #[error("state is unknown or expired")]
    Unknown,
    #[error("could not generate a unique correlation id after {0} attempts")]
    Exhausted(usize),
    #[error("session state is corrupted: {0}")]
    Session(#[from] serde_json::Error),
}

#[must_use]
pub fn encode_state(correlation_id: Uuid) -> String {
    Base64UrlUnpadded::encode_string(correlation_id.as_bytes())
}

/// Decode an external `state` value back into its correlation id.
///
/// # Errors
/// Returns [`StateError::Invalid`] unless the value is the unpadded base64url form
/// of a version 4 UUID.
pub fn decode_state(external_state: &str) -> Result<Uuid, StateError> {
    // 16 bytes encode to exactly 22 characters.
    if external_state.len() != 22 {
        return Err(StateError::Invalid);
    }
    let bytes = Base64UrlUnpadded::decode_vec(external_state).map_err(|_| StateError::Invalid)?;
    let correlation_id = Uuid::from_slice(&bytes).map_err(|_| StateError::Invalid)?;
    if correlation_id.get_version() != Some(Version::Random) {
        return Err(StateError::Invalid);
    }
    Ok(correlation_id)
}

#[derive(Clone, Copy, Debug)]
pub struct StateTokenManager {
    ttl_seconds: u64,
}

impl Default for StateTokenManager {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_STATE_TTL_SECONDS)
    }
}

impl StateTokenManager {
    #[must_use]
    pub fn new(ttl_seconds: u64) -> Self {
        Self { ttl_seconds }
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    fn is_live(&self, entry: &PendingState, now: i64) -> bool {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        now.saturating_sub(entry.created_at) < ttl
    }

    /// Register a new pending state carrying `continuation_token`.
    ///
    /// # Errors
    /// Returns an error if the session map cannot be read or written, or if no
    /// unused correlation id could be generated.
    pub fn generate(
        &self,
        session: &mut Session,
        continuation_token: &str,
        now: i64,
    ) -> Result<PendingState, StateError> {
        self.generate_with(session, continuation_token, now, Uuid::new_v4)
    }

    /// Like [`generate`](Self::generate) with an injectable id source.
    ///
    /// # Errors
    /// See [`generate`](Self::generate).
    pub fn generate_with(
        &self,
        session: &mut Session,
        continuation_token: &str,
        now: i64,
        mut next_id: impl FnMut() -> Uuid,
    ) -> Result<PendingState, StateError> {
        let mut states: PendingStateMap = session.namespace(NAMESPACE)?.unwrap_or_default();
        let before = states.len();
        states.retain(|_, entry| self.is_live(entry, now));
        let pruned = before != states.len();

        for _ in 0..MAX_GENERATE_ATTEMPTS {
            let correlation_id = next_id();
            if states.contains_key(&correlation_id) {
                continue;
            }
            let pending = PendingState {
                correlation_id,
                external_state: encode_state(correlation_id),
                continuation_token: continuation_token.to_string(),
                created_at: now,
            };
            states.insert(correlation_id, pending.clone());
            session.set_namespace(NAMESPACE, &states)?;
            return Ok(pending);
        }

        if pruned {
            session.set_namespace(NAMESPACE, &states)?;
        }
        Err(StateError::Exhausted(MAX_GENERATE_ATTEMPTS))
    }

    /// Decode an external state into the correlation id it was generated from.
    ///
    /// # Errors
    /// Returns [`StateError::Invalid`] for anything that is not an encoded id.
    pub fn resolve(&self, external_state: &str) -> Result<Uuid, StateError> {
        decode_state(external_state)
    }

    /// Remove and return the pending state for `correlation_id`.
    ///
    /// The entry is removed even when it turns out to be expired.
    ///
    /// # Errors
    /// Returns [`StateError::Unknown`] if no live entry exists.
    pub fn consume(
        &self,
        session: &mut Session,
        correlation_id: Uuid,
        now: i64,
    ) -> Result<PendingState, StateError> {
        let mut states: PendingStateMap = session.namespace(NAMESPACE)?.unwrap_or_default();
        let entry = states.remove(&correlation_id).ok_or(StateError::Unknown)?;
        session.set_namespace(NAMESPACE, &states)?;

        if self.is_live(&entry, now) {
            Ok(entry)
        } else {
            Err(StateError::Unknown)
        }
    }

    /// Number of pending entries, live or not.
    ///
    /// # Errors
    /// Returns an error if the session map cannot be read.
    pub fn pending_count(&self, session: &Session) -> Result<usize, StateError> {
        let states: Option<PendingStateMap> = session.namespace(NAMESPACE)?;
        Ok(states.map_or(0, |states| states.len()))
    }
}
