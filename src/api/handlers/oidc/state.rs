//! Shared state for the OIDC handlers.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{
    claims::{Claims, decode_unverified},
    config::OidcConfig,
    context::{AuthContext, IdentityContextStore, SessionContextStore},
    error::OidcError,
    jwks::IdTokenVerifier,
    provider::{HttpUserResolver, NoopUserResolver, UserResolver},
    reply::AccessReplies,
    session::SessionStore,
    state_token::{PendingState, StateTokenManager},
    token::TokenClient,
};
use crate::api::handlers::{DependencyStatus, now_unix_seconds};

/// A flow that has registered its pending state and is about to leave for the provider.
#[derive(Debug)]
pub struct PendingFlow {
    pub session_id: String,
    /// The session was created for this flow and needs a cookie.
    pub new_session: bool,
    pub pending: PendingState,
    /// Raw id token of the current login, empty when there is none.
    pub id_token_hint: String,
}

pub struct OidcState {
    config: OidcConfig,
    sessions: SessionStore,
    states: StateTokenManager,
    token_client: TokenClient,
    verifier: Option<Arc<IdTokenVerifier>>,
    identity: Arc<dyn IdentityContextStore>,
    users: Arc<dyn UserResolver>,
    replies: AccessReplies,
}

impl OidcState {
    /// Build the state without id-token signature verification.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or an HTTP client cannot
    /// be built.
    pub fn new(config: OidcConfig) -> Result<Self> {
        config.validate().context("Invalid OIDC configuration")?;

        let token_client = TokenClient::new(&config)?;
        let users: Arc<dyn UserResolver> = match config.user_lookup_url() {
            Some(url) => Arc::new(HttpUserResolver::new(
                url.to_string(),
                Duration::from_secs(config.token_timeout_seconds()),
            )?),
            None => Arc::new(NoopUserResolver),
        };
        let replies = AccessReplies::new(
            config.default_target().to_string(),
            config.allowed_redirect_hosts().to_vec(),
        );

        Ok(Self {
            sessions: SessionStore::new(Duration::from_secs(config.session_ttl_seconds())),
            states: StateTokenManager::new(config.pending_state_ttl_seconds()),
            token_client,
            verifier: None,
            identity: Arc::new(SessionContextStore),
            users,
            replies,
            config,
        })
    }

    /// Build the state and, when a JWKS URI is configured, the remote id-token verifier.
    ///
    /// # Errors
    /// See [`new`](Self::new); also fails if the JWKS URI is invalid.
    pub async fn initialize(config: OidcConfig) -> Result<Self> {
        let state = Self::new(config)?;
        match state.config.jwks_uri() {
            Some(url) => {
                let verifier = IdTokenVerifier::new_remote(
                    url.to_string(),
                    state.config.issuer().map(ToString::to_string),
                    state.config.client_id().to_string(),
                    Duration::from_secs(state.config.token_timeout_seconds()),
                )
                .await?;
                info!(jwks_uri = %url, "id token signatures will be verified");
                Ok(state.with_verifier(Arc::new(verifier)))
            }
            None => {
                warn!(
                    "No JWKS URI configured: id token claims are trusted without signature verification"
                );
                Ok(state)
            }
        }
    }

    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<IdTokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    #[must_use]
    pub fn with_user_resolver(mut self, users: Arc<dyn UserResolver>) -> Self {
        self.users = users;
        self
    }

    #[must_use]
    pub fn with_identity_store(mut self, identity: Arc<dyn IdentityContextStore>) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn identity(&self) -> &dyn IdentityContextStore {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn replies(&self) -> &AccessReplies {
        &self.replies
    }

    #[must_use]
    pub fn token_client(&self) -> &TokenClient {
        &self.token_client
    }

    pub async fn verification_status(&self) -> DependencyStatus {
        match &self.verifier {
            Some(verifier) => verifier.dependency_status().await,
            None => DependencyStatus::Disabled,
        }
    }

    /// Register a pending state for `continuation_token` in the caller's session,
    /// creating the session if needed.
    ///
    /// # Errors
    /// Returns [`OidcError::Internal`] if the session data is corrupted or no
    /// unique correlation id could be generated.
    pub async fn generate_state(
        &self,
        session_id: Option<&str>,
        continuation_token: &str,
    ) -> Result<PendingFlow, OidcError> {
        let now = now_unix_seconds();
        let states = self.states;
        let identity = self.identity.as_ref();

        let scope = self
            .sessions
            .with_session(session_id, |session| {
                let pending = states.generate(session, continuation_token, now)?;
                let hint = identity
                    .get(session)
                    .map_err(|err| OidcError::Internal(err.to_string()))?
                    .provider_attributes
                    .session_index;
                Ok::<_, OidcError>((pending, hint))
            })
            .await;

        let (pending, id_token_hint) = scope.value?;
        Ok(PendingFlow {
            session_id: scope.session_id,
            new_session: scope.created,
            pending,
            id_token_hint,
        })
    }

    /// Decode `external_state` and consume the matching pending state.
    ///
    /// # Errors
    /// Returns [`OidcError::InvalidState`] when the state does not decode, is not
    /// pending in this session, has expired, or there is no session at all.
    pub async fn consume_state(
        &self,
        session_id: Option<&str>,
        external_state: &str,
    ) -> Result<PendingState, OidcError> {
        let correlation_id = self.states.resolve(external_state)?;
        let now = now_unix_seconds();
        let states = self.states;

        let consumed = self
            .sessions
            .with_existing(session_id, |session| {
                states.consume(session, correlation_id, now)
            })
            .await
            .ok_or(OidcError::InvalidState)?;
        Ok(consumed?)
    }

    /// Replace the identity context of an existing session.
    ///
    /// # Errors
    /// Returns [`OidcError::InvalidState`] if the session expired after its state
    /// was consumed, and [`OidcError::Internal`] if the context cannot be stored.
    pub async fn store_context(
        &self,
        session_id: Option<&str>,
        context: &AuthContext,
    ) -> Result<(), OidcError> {
        let identity = self.identity.as_ref();
        self.sessions
            .with_existing(session_id, |session| identity.set(session, context))
            .await
            .ok_or(OidcError::InvalidState)?
            .map_err(|err| OidcError::Internal(err.to_string()))
    }

    /// Current identity context, or the unauthenticated default.
    ///
    /// # Errors
    /// Returns [`OidcError::Internal`] if a stored context cannot be decoded.
    pub async fn current_context(&self, session_id: Option<&str>) -> Result<AuthContext, OidcError> {
        let identity = self.identity.as_ref();
        self.sessions
            .with_existing(session_id, |session| identity.get(session))
            .await
            .unwrap_or_else(|| Ok(AuthContext::default()))
            .map_err(|err| OidcError::Internal(err.to_string()))
    }

    /// Decode the id token claims, verifying the signature when a JWKS is configured.
    ///
    /// # Errors
    /// Returns [`OidcError::InvalidIdToken`] if the token is malformed or fails verification.
    pub async fn decode_id_token(&self, token: &str) -> Result<Claims, OidcError> {
        match &self.verifier {
            Some(verifier) => Ok(verifier.verify(token, now_unix_seconds()).await?),
            None => Ok(decode_unverified(token)?),
        }
    }

    /// Local user id for `name`; lookup failures are logged and treated as unknown.
    pub async fn resolve_user(&self, name: &str) -> Option<String> {
        match self.users.user_from_provider(name).await {
            Ok(user_id) => user_id,
            Err(err) => {
                warn!(error = %err, "user lookup failed; continuing without local user id");
                None
            }
        }
    }
}
