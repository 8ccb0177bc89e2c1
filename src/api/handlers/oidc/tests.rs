//! Flow-level tests: the handlers wired into the real router, a stub token
//! endpoint on loopback, and the session store in between.

use super::{
    AuthContext, AuthorizationMethod, IdTokenVerifier, OidcConfig, OidcError, OidcState,
    ProviderEndpoints, SESSION_COOKIE_NAME, UserResolver, jwks::test_keys,
    login::process_login_callback, logout::process_logout_callback, state_token::encode_state,
};
use crate::api::{
    app,
    handlers::{now_unix_seconds, oidc::InMemoryProviderRegistry},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::{
    Json, Router,
    body::{Body, to_bytes},
    http::{
        Request, StatusCode,
        header::{COOKIE, LOCATION, SET_COOKIE},
    },
    response::Response,
    routing::post,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tower::ServiceExt;
use url::Url;
use uuid::Uuid;

const PUBLIC_URL: &str = "http://rp.example.test";
const AUTHORIZE: &str = "http://idp.example.test/authorize";
const END_SESSION: &str = "http://idp.example.test/logout";

/// Token endpoint that always answers with the same status and body.
struct TokenStub {
    url: String,
    calls: Arc<AtomicUsize>,
}

impl TokenStub {
    async fn start(status: StatusCode, body: Value) -> Result<Self> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/token",
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                async move { (status, Json(body)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self {
            url: format!("http://{addr}/token"),
            calls,
        })
    }

    async fn id_token(id_token: &str) -> Result<Self> {
        Self::start(
            StatusCode::OK,
            json!({"access_token": "at", "token_type": "Bearer", "id_token": id_token}),
        )
        .await
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn unsigned_jwt(claims: &Value) -> String {
    let header = Base64UrlUnpadded::encode_string(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = Base64UrlUnpadded::encode_string(claims.to_string().as_bytes());
    format!("{header}.{payload}.sig")
}

fn config(token_endpoint: &str) -> OidcConfig {
    OidcConfig::new(
        PUBLIC_URL.to_string(),
        ProviderEndpoints {
            authorization: AUTHORIZE.to_string(),
            token: token_endpoint.to_string(),
            end_session: END_SESSION.to_string(),
        },
        "client-1".to_string(),
        SecretString::from("secret".to_string()),
    )
    .with_url_prefix("/auth")
}

fn router(oidc: Arc<OidcState>) -> Router {
    app(oidc, Arc::new(InMemoryProviderRegistry::default()))
}

async fn get(app: &Router, uri: &str, cookie: Option<&str>) -> Result<Response> {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(COOKIE, cookie);
    }
    Ok(app.clone().oneshot(request.body(Body::empty())?).await?)
}

fn location(response: &Response) -> Result<String> {
    Ok(response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| anyhow!("no Location header"))?
        .to_str()?
        .to_string())
}

/// The `name=value` part of the session cookie, ready for a `Cookie` header.
fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with(SESSION_COOKIE_NAME))
        .and_then(|value| value.split(';').next())
        .map(ToString::to_string)
}

fn query_param(location: &str, name: &str) -> Result<String> {
    Url::parse(location)?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| anyhow!("{name} missing from {location}"))
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Start a login and return the session cookie and the state sent to the provider.
async fn start_login(app: &Router, target_to: &str) -> Result<(String, String)> {
    let response = get(app, &format!("/auth/login?target_to={}", encode(target_to)), None).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let cookie = session_cookie(&response).ok_or_else(|| anyhow!("no session cookie"))?;
    let state = query_param(&location(&response)?, "state")?;
    Ok((cookie, state))
}

fn callback_params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}

#[tokio::test]
async fn login_redirects_to_provider_and_sets_cookie() -> Result<()> {
    let stub = TokenStub::start(StatusCode::OK, json!({})).await?;
    let app = router(Arc::new(OidcState::new(config(&stub.url))?));

    let response = get(&app, "/auth/login?target_to=abc", None).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let set_cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(!set_cookie.contains("Secure"));

    let location = location(&response)?;
    assert!(location.starts_with(AUTHORIZE));
    assert_eq!(query_param(&location, "response_type")?, "code");
    assert_eq!(query_param(&location, "client_id")?, "client-1");
    assert_eq!(
        query_param(&location, "redirect_uri")?,
        "http://rp.example.test/auth/login_callback"
    );
    assert_eq!(query_param(&location, "scope")?, "openid profile email");
    assert_eq!(query_param(&location, "state")?.len(), 22);
    Ok(())
}

#[tokio::test]
async fn login_reuses_existing_session() -> Result<()> {
    let stub = TokenStub::start(StatusCode::OK, json!({})).await?;
    let app = router(Arc::new(OidcState::new(config(&stub.url))?));

    let (cookie, first) = start_login(&app, "a").await?;
    let response = get(&app, "/auth/login?target_to=b", Some(&cookie)).await?;
    assert!(session_cookie(&response).is_none());
    let second = query_param(&location(&response)?, "state")?;
    assert_ne!(first, second);
    Ok(())
}

#[tokio::test]
async fn form_post_login_renders_auto_submit_form() -> Result<()> {
    let stub = TokenStub::start(StatusCode::OK, json!({})).await?;
    let config = config(&stub.url).with_authorization_method(AuthorizationMethod::FormPost);
    let app = router(Arc::new(OidcState::new(config)?));

    let response = get(&app, "/auth/login?target_to=abc", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cookie(&response).is_some());
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let html = String::from_utf8(body.to_vec())?;
    assert!(html.contains(&format!(r#"action="{AUTHORIZE}""#)));
    assert!(html.contains(r#"name="response_type" value="code""#));
    assert!(html.contains(r#"name="state""#));
    Ok(())
}

#[tokio::test]
async fn end_to_end_login_stores_context_and_redirects() -> Result<()> {
    let stub = TokenStub::id_token(&unsigned_jwt(&json!({"sub": "alice"}))).await?;
    let app = router(Arc::new(OidcState::new(config(&stub.url))?));

    let (cookie, state) = start_login(&app, "abc").await?;
    let response = get(
        &app,
        &format!("/auth/login_callback?state={state}&code=XYZ"),
        Some(&cookie),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response)?, "abc");
    assert_eq!(stub.calls(), 1);

    let response = get(&app, "/auth/context", Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body["authenticated"], json!(true));
    assert_eq!(body["nameid"], json!("alice"));
    assert_eq!(body["provider_id"], json!("oidc"));
    assert_eq!(body["claims"]["sub"], json!("alice"));
    assert!(body.get("session_index").is_none());
    Ok(())
}

#[tokio::test]
async fn never_issued_state_is_denied_without_side_effects() -> Result<()> {
    let stub = TokenStub::id_token(&unsigned_jwt(&json!({"sub": "alice"}))).await?;
    let app = router(Arc::new(OidcState::new(config(&stub.url))?));

    let (cookie, _) = start_login(&app, "abc").await?;
    let forged = encode_state(Uuid::new_v4());
    let response = get(
        &app,
        &format!("/auth/login_callback?state={forged}&code=XYZ"),
        Some(&cookie),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&body[..], b"Access denied");
    assert_eq!(stub.calls(), 0);

    let response = get(&app, "/auth/context", Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn callback_without_session_is_invalid_state() -> Result<()> {
    let stub = TokenStub::start(StatusCode::OK, json!({})).await?;
    let oidc = OidcState::new(config(&stub.url))?;
    let state = encode_state(Uuid::new_v4());

    let result =
        process_login_callback(&oidc, None, &callback_params(&[("state", &state), ("code", "x")]))
            .await;
    assert!(matches!(result, Err(OidcError::InvalidState)));

    let result = process_login_callback(
        &oidc,
        Some("no-such-session"),
        &callback_params(&[("state", "not-a-state"), ("code", "x")]),
    )
    .await;
    assert!(matches!(result, Err(OidcError::InvalidState)));
    Ok(())
}

#[tokio::test]
async fn missing_state_is_rejected() -> Result<()> {
    let stub = TokenStub::start(StatusCode::OK, json!({})).await?;
    let oidc = OidcState::new(config(&stub.url))?;
    let flow = oidc.generate_state(None, "abc").await?;

    let result = process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("code", "x")]),
    )
    .await;
    assert!(matches!(result, Err(OidcError::MissingState)));
    Ok(())
}

#[tokio::test]
async fn missing_code_is_rejected_before_any_network_call() -> Result<()> {
    let stub = TokenStub::id_token(&unsigned_jwt(&json!({"sub": "alice"}))).await?;
    let oidc = OidcState::new(config(&stub.url))?;
    let flow = oidc.generate_state(None, "abc").await?;
    let state = flow.pending.external_state.clone();

    let result = process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &state)]),
    )
    .await;
    assert!(matches!(result, Err(OidcError::MissingCode)));
    assert_eq!(stub.calls(), 0);

    // The state was consumed by the failed attempt.
    let result = process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &state), ("code", "x")]),
    )
    .await;
    assert!(matches!(result, Err(OidcError::InvalidState)));
    assert_eq!(stub.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn successful_callback_cannot_be_replayed() -> Result<()> {
    let stub = TokenStub::id_token(&unsigned_jwt(&json!({"sub": "alice"}))).await?;
    let app = router(Arc::new(OidcState::new(config(&stub.url))?));

    let (cookie, state) = start_login(&app, "abc").await?;
    let uri = format!("/auth/login_callback?state={state}&code=XYZ");
    let response = get(&app, &uri, Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = get(&app, &uri, Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(stub.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn provider_error_leaves_context_unchanged() -> Result<()> {
    let stub = TokenStub::start(
        StatusCode::BAD_REQUEST,
        json!({"error": "invalid_grant", "error_description": "code expired"}),
    )
    .await?;
    let oidc = OidcState::new(config(&stub.url))?;
    let flow = oidc.generate_state(None, "abc").await?;

    let result = process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &flow.pending.external_state), ("code", "x")]),
    )
    .await;
    assert!(matches!(
        result,
        Err(OidcError::ProviderError { ref error, ref description })
            if error == "invalid_grant" && description == "code expired"
    ));

    let context = oidc.current_context(Some(&flow.session_id)).await?;
    assert!(!context.authenticated);
    assert_eq!(stub.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn token_response_without_id_token_is_rejected() -> Result<()> {
    let stub = TokenStub::start(StatusCode::OK, json!({"access_token": "at"})).await?;
    let oidc = OidcState::new(config(&stub.url))?;
    let flow = oidc.generate_state(None, "abc").await?;

    let result = process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &flow.pending.external_state), ("code", "x")]),
    )
    .await;
    assert!(matches!(result, Err(OidcError::MissingIdToken)));
    Ok(())
}

#[tokio::test]
async fn id_token_without_subject_is_rejected() -> Result<()> {
    let stub = TokenStub::id_token(&unsigned_jwt(&json!({"preferred_username": "alice"}))).await?;
    let oidc = OidcState::new(config(&stub.url))?;
    let flow = oidc.generate_state(None, "abc").await?;

    let result = process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &flow.pending.external_state), ("code", "x")]),
    )
    .await;
    assert!(matches!(result, Err(OidcError::MissingSubject)));
    assert!(!oidc.current_context(Some(&flow.session_id)).await?.authenticated);
    Ok(())
}

#[tokio::test]
async fn malformed_id_token_is_rejected() -> Result<()> {
    let stub = TokenStub::id_token("not-a-jwt").await?;
    let oidc = OidcState::new(config(&stub.url))?;
    let flow = oidc.generate_state(None, "abc").await?;

    let result = process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &flow.pending.external_state), ("code", "x")]),
    )
    .await;
    assert!(matches!(result, Err(OidcError::InvalidIdToken(_))));
    Ok(())
}

#[tokio::test]
async fn subject_is_the_fallback_name_and_expiry_defaults_to_a_day() -> Result<()> {
    let id_token = unsigned_jwt(&json!({"sub": "u1", "email": "u1@example.test"}));
    let stub = TokenStub::id_token(&id_token).await?;
    let oidc = OidcState::new(config(&stub.url))?;
    let flow = oidc.generate_state(None, "next").await?;

    let issued = now_unix_seconds();
    let target = process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &flow.pending.external_state), ("code", "x")]),
    )
    .await?;
    assert_eq!(target, "next");

    let context = oidc.current_context(Some(&flow.session_id)).await?;
    assert!(context.authenticated);
    assert!(context.error_message.is_empty());
    assert_eq!(context.provider_id, "oidc");
    assert_eq!(context.provider_attributes.nameid, "u1");
    assert_eq!(context.provider_attributes.session_index, id_token);
    assert_eq!(
        context.provider_attributes.raw_claims.get("email"),
        Some(&json!("u1@example.test"))
    );
    assert_eq!(context.local_user_id, None);

    let expires_at = context
        .expires_at
        .ok_or_else(|| anyhow!("no expiry"))?
        .timestamp();
    assert!((expires_at - (issued + 24 * 60 * 60)).abs() <= 5);
    Ok(())
}

#[tokio::test]
async fn preferred_username_and_exp_are_used_when_present() -> Result<()> {
    let exp = now_unix_seconds() + 3600;
    let stub = TokenStub::id_token(&unsigned_jwt(
        &json!({"sub": "u1", "preferred_username": "alice", "exp": exp}),
    ))
    .await?;
    let oidc = OidcState::new(config(&stub.url))?;
    let flow = oidc.generate_state(None, "").await?;

    process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &flow.pending.external_state), ("code", "x")]),
    )
    .await?;

    let context = oidc.current_context(Some(&flow.session_id)).await?;
    assert_eq!(context.provider_attributes.nameid, "alice");
    assert_eq!(context.expires_at.map(|at| at.timestamp()), Some(exp));
    Ok(())
}

struct KnownUsers;

#[async_trait]
impl UserResolver for KnownUsers {
    async fn user_from_provider(&self, name: &str) -> Result<Option<String>> {
        Ok((name == "alice").then(|| "42".to_string()))
    }
}

struct BrokenDirectory;

#[async_trait]
impl UserResolver for BrokenDirectory {
    async fn user_from_provider(&self, _name: &str) -> Result<Option<String>> {
        Err(anyhow!("directory unavailable"))
    }
}

#[tokio::test]
async fn local_user_is_resolved_by_display_name() -> Result<()> {
    let stub = TokenStub::id_token(&unsigned_jwt(
        &json!({"sub": "u1", "preferred_username": "alice"}),
    ))
    .await?;
    let oidc = OidcState::new(config(&stub.url))?.with_user_resolver(Arc::new(KnownUsers));
    let flow = oidc.generate_state(None, "").await?;

    process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &flow.pending.external_state), ("code", "x")]),
    )
    .await?;

    let context = oidc.current_context(Some(&flow.session_id)).await?;
    assert_eq!(context.local_user_id.as_deref(), Some("42"));
    Ok(())
}

#[tokio::test]
async fn user_lookup_failure_is_not_fatal() -> Result<()> {
    let stub = TokenStub::id_token(&unsigned_jwt(&json!({"sub": "alice"}))).await?;
    let oidc = OidcState::new(config(&stub.url))?.with_user_resolver(Arc::new(BrokenDirectory));
    let flow = oidc.generate_state(None, "").await?;

    process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &flow.pending.external_state), ("code", "x")]),
    )
    .await?;

    let context = oidc.current_context(Some(&flow.session_id)).await?;
    assert!(context.authenticated);
    assert_eq!(context.local_user_id, None);
    Ok(())
}

#[tokio::test]
async fn signed_id_tokens_are_verified_when_a_keyset_is_configured() -> Result<()> {
    let claims = json!({
        "sub": "alice",
        "aud": "client-1",
        "exp": now_unix_seconds() + 600,
    });
    let signed = test_keys::sign("k1", &claims)?;
    let verifier = Arc::new(IdTokenVerifier::new_static(
        test_keys::jwks("k1")?,
        None,
        "client-1".to_string(),
    ));

    let stub = TokenStub::id_token(&signed).await?;
    let oidc = OidcState::new(config(&stub.url))?.with_verifier(verifier.clone());
    let flow = oidc.generate_state(None, "").await?;
    process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &flow.pending.external_state), ("code", "x")]),
    )
    .await?;
    assert!(oidc.current_context(Some(&flow.session_id)).await?.authenticated);

    let stub = TokenStub::id_token(&unsigned_jwt(&claims)).await?;
    let oidc = OidcState::new(config(&stub.url))?.with_verifier(verifier);
    let flow = oidc.generate_state(None, "").await?;
    let result = process_login_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &flow.pending.external_state), ("code", "x")]),
    )
    .await;
    assert!(matches!(result, Err(OidcError::InvalidIdToken(_))));
    assert!(!oidc.current_context(Some(&flow.session_id)).await?.authenticated);
    Ok(())
}

#[tokio::test]
async fn unsafe_continuation_lands_on_default_target() -> Result<()> {
    let stub = TokenStub::id_token(&unsigned_jwt(&json!({"sub": "alice"}))).await?;
    let config = config(&stub.url).with_default_target("/home".to_string());
    let app = router(Arc::new(OidcState::new(config)?));

    let (cookie, state) = start_login(&app, "https://evil.test/phish").await?;
    let response = get(
        &app,
        &format!("/auth/login_callback?state={state}&code=XYZ"),
        Some(&cookie),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response)?, "/home");
    Ok(())
}

#[tokio::test]
async fn whitespace_padded_continuation_lands_on_default_target() -> Result<()> {
    let stub = TokenStub::id_token(&unsigned_jwt(&json!({"sub": "alice"}))).await?;
    let config = config(&stub.url).with_default_target("/home".to_string());
    let app = router(Arc::new(OidcState::new(config)?));

    let (cookie, state) = start_login(&app, " //evil.test/x").await?;
    let response = get(
        &app,
        &format!("/auth/login_callback?state={state}&code=XYZ"),
        Some(&cookie),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response)?, "/home");
    Ok(())
}

#[tokio::test]
async fn context_write_without_session_is_access_denied() -> Result<()> {
    let stub = TokenStub::start(StatusCode::OK, json!({})).await?;
    let oidc = OidcState::new(config(&stub.url))?;
    let context = AuthContext::default();

    for session_id in [None, Some("expired-session")] {
        let err = oidc.store_context(session_id, &context).await.err();
        assert!(matches!(err, Some(OidcError::InvalidState)), "{session_id:?}");
    }
    Ok(())
}

#[tokio::test]
async fn logout_round_trip_clears_context() -> Result<()> {
    let id_token = unsigned_jwt(&json!({"sub": "alice"}));
    let stub = TokenStub::id_token(&id_token).await?;
    let app = router(Arc::new(OidcState::new(config(&stub.url))?));

    let (cookie, state) = start_login(&app, "abc").await?;
    let response = get(
        &app,
        &format!("/auth/login_callback?state={state}&code=XYZ"),
        Some(&cookie),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = get(&app, "/auth/logout?target_to=%2Fbye", Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(session_cookie(&response).is_none());
    let end_session = location(&response)?;
    assert!(end_session.starts_with(END_SESSION));
    assert_eq!(query_param(&end_session, "id_token_hint")?, id_token);
    assert_eq!(
        query_param(&end_session, "post_logout_redirect_uri")?,
        "http://rp.example.test/auth/logout_callback"
    );
    let logout_state = query_param(&end_session, "state")?;

    // Logging out does not touch the context until the provider calls back.
    let response = get(&app, "/auth/context", Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(
        &app,
        &format!("/auth/logout_callback?state={logout_state}"),
        Some(&cookie),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response)?, "/bye");

    let response = get(&app, "/auth/context", Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn logout_without_login_has_no_hint() -> Result<()> {
    let stub = TokenStub::start(StatusCode::OK, json!({})).await?;
    let app = router(Arc::new(OidcState::new(config(&stub.url))?));

    let response = get(&app, "/auth/logout", None).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(session_cookie(&response).is_some());
    let end_session = location(&response)?;
    assert!(query_param(&end_session, "id_token_hint").is_err());
    assert!(query_param(&end_session, "state").is_ok());
    Ok(())
}

#[tokio::test]
async fn logout_callback_requires_a_pending_state() -> Result<()> {
    let stub = TokenStub::start(StatusCode::OK, json!({})).await?;
    let oidc = OidcState::new(config(&stub.url))?;
    let flow = oidc.generate_state(None, "/bye").await?;

    let result =
        process_logout_callback(&oidc, Some(&flow.session_id), &callback_params(&[])).await;
    assert!(matches!(result, Err(OidcError::MissingState)));

    let forged = encode_state(Uuid::new_v4());
    let result = process_logout_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &forged)]),
    )
    .await;
    assert!(matches!(result, Err(OidcError::InvalidState)));

    let target = process_logout_callback(
        &oidc,
        Some(&flow.session_id),
        &callback_params(&[("state", &flow.pending.external_state)]),
    )
    .await?;
    assert_eq!(target, "/bye");

    let app = router(Arc::new(oidc));
    let response = get(&app, "/auth/logout_callback", None).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn context_without_session_is_no_content() -> Result<()> {
    let stub = TokenStub::start(StatusCode::OK, json!({})).await?;
    let app = router(Arc::new(OidcState::new(config(&stub.url))?));

    let response = get(&app, "/auth/context", None).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = get(
        &app,
        "/auth/context",
        Some(&format!("{SESSION_COOKIE_NAME}=unknown")),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn request_id_is_propagated() -> Result<()> {
    let stub = TokenStub::start(StatusCode::OK, json!({})).await?;
    let app = router(Arc::new(OidcState::new(config(&stub.url))?));

    let response = get(&app, "/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    Ok(())
}
