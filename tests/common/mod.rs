//! Shared harness for the router tests: a fake identity provider token
//! endpoint, an echoing upstream, token minting and request helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Method, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;

use oidc_authproxy::config::{Config, ForwardToken, GateConfig, OidcConfig, UpstreamConfig};
use oidc_authproxy::gate::{AppState, create_router};
use oidc_authproxy::oidc::{InMemoryNonceStore, JwksKeyResolver};
use oidc_authproxy::session::{AuthInfo, InMemorySessionStore};

pub const KID: &str = "test-key-1";
pub const ISSUER: &str = "https://idp.example.com";
pub const CLIENT_ID: &str = "authproxy-client";
pub const FORM: &str = "application/x-www-form-urlencoded";

const SIGNING_KEY: &str = include_str!("../fixtures/idp_signing_key.pem");
const JWKS: &str = include_str!("../fixtures/jwks.json");

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Claims of an ID token that passes every check
pub fn claims(nonce: &str) -> Value {
    let now = now();
    json!({
        "iss": ISSUER,
        "sub": "user-42",
        "aud": CLIENT_ID,
        "iat": now,
        "exp": now + 3600,
        "nonce": nonce,
        "email": "alice@example.com",
        "preferred_username": "alice",
    })
}

/// RS256 token signed by the key published in the JWKS fixture
pub fn mint(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

// ---------------------------------------------------------------------------
// Fake identity provider
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct IdpCalls {
    pub exchanges: Arc<AtomicUsize>,
    pub refreshes: Arc<AtomicUsize>,
}

impl IdpCalls {
    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

async fn token_endpoint(
    State(calls): State<IdpCalls>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let field = |name: &str| form.get(name).map(String::as_str);
    match (field("grant_type"), field("code"), field("refresh_token")) {
        (Some("authorization_code"), Some("good-code"), _) => {
            calls.exchanges.fetch_add(1, Ordering::SeqCst);
            Json(json!({
                "access_token": "at-1",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "rt-1"
            }))
            .into_response()
        }
        (Some("refresh_token"), _, Some("rt-1")) => {
            calls.refreshes.fetch_add(1, Ordering::SeqCst);
            // Slow enough for concurrent requests to pile up on the refresh lock
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Json(json!({"access_token": "at-2", "expires_in": 600, "refresh_token": "rt-2"}))
                .into_response()
        }
        (Some("refresh_token"), _, Some("rt-id")) => {
            calls.refreshes.fetch_add(1, Ordering::SeqCst);
            let mut renewed = claims("unused");
            renewed["preferred_username"] = json!("alice.renamed");
            renewed["exp"] = json!(now() + 1800);
            Json(json!({"access_token": "at-3", "id_token": mint(&renewed)})).into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": "revoked"})),
        )
            .into_response(),
    }
}

/// Start the fake token endpoint, returning its URL
pub async fn spawn_idp() -> (String, IdpCalls) {
    let calls = IdpCalls::default();
    let app = Router::new()
        .route("/token", post(token_endpoint))
        .with_state(calls.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{addr}/token"), calls)
}

// ---------------------------------------------------------------------------
// Echoing upstream
// ---------------------------------------------------------------------------

async fn echo(method: Method, uri: Uri, headers: HeaderMap) -> Json<Value> {
    let headers: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                json!(value.to_str().unwrap_or_default()),
            )
        })
        .collect();
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": headers,
    }))
}

/// Start an upstream that echoes each request back as JSON
pub async fn spawn_upstream() -> String {
    let app = Router::new().fallback(echo);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub router: Router,
    pub state: Arc<AppState>,
    pub nonces: Arc<InMemoryNonceStore>,
    pub sessions: Arc<InMemorySessionStore>,
    pub idp: IdpCalls,
}

pub fn base_config(upstream: &str, token_url: Option<String>) -> Config {
    let mut config = Config {
        oidc: OidcConfig {
            client_id: CLIENT_ID.into(),
            client_secret: Some("s3cret".into()),
            auth_url: "https://idp.example.com/authorize".into(),
            token_url,
            jwks_url: "https://idp.example.com/jwks".into(),
            redirect_url: Some("http://localhost:8080/cb".into()),
            issuers: vec![ISSUER.into()],
            ..OidcConfig::default()
        },
        gate: GateConfig {
            protected_paths: vec!["/app".into(), "/api".into()],
            ..GateConfig::default()
        },
        upstream: UpstreamConfig {
            url: upstream.into(),
            forward_token: ForwardToken::IdToken,
            ..UpstreamConfig::default()
        },
        ..Config::default()
    };
    config.apply_defaults();
    config.validate().unwrap();
    config
}

/// Router wired to fresh in-memory stores, a fake IdP and an echoing upstream
pub async fn harness(configure: impl FnOnce(&mut Config)) -> Harness {
    let upstream = spawn_upstream().await;
    let (token_url, idp) = spawn_idp().await;
    let mut config = base_config(&upstream, Some(token_url));
    configure(&mut config);

    let jwks: JwkSet = serde_json::from_str(JWKS).unwrap();
    let nonces = Arc::new(InMemoryNonceStore::new(config.nonce.lifetime));
    let sessions = Arc::new(InMemorySessionStore::new());
    let state = Arc::new(
        AppState::new(
            &config,
            Arc::new(JwksKeyResolver::from_jwk_set(&jwks)),
            nonces.clone(),
            sessions.clone(),
        )
        .unwrap(),
    );

    Harness {
        router: create_router(Arc::clone(&state)),
        state,
        nonces,
        sessions,
        idp,
    }
}

/// Outcome of `GET /login`
pub struct PendingLogin {
    pub cookie: String,
    pub state: String,
    pub nonce: String,
    pub location: Url,
}

impl Harness {
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> Response {
        self.send(get_request(path, cookie, &[])).await
    }

    pub async fn start_login(&self, cookie: Option<&str>, referer: Option<&str>) -> PendingLogin {
        let mut extra = Vec::new();
        if let Some(referer) = referer {
            extra.push(("referer", referer));
        }
        let response = self.send(get_request("/login", cookie, &extra)).await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let location = Url::parse(response.headers()[LOCATION].to_str().unwrap()).unwrap();
        let query: HashMap<String, String> = location.query_pairs().into_owned().collect();
        PendingLogin {
            cookie: session_cookie(&response).unwrap(),
            state: query["state"].clone(),
            nonce: query["nonce"].clone(),
            location,
        }
    }

    pub async fn post_callback(&self, cookie: &str, content_type: &str, body: String) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/cb")
            .header(COOKIE, cookie)
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// Run the whole login; returns the callback response
    pub async fn login(&self, referer: Option<&str>, code: Option<&str>) -> Response {
        let pending = self.start_login(None, referer).await;
        let token = mint(&claims(&pending.nonce));
        self.post_callback(&pending.cookie, FORM, callback_body(&token, &pending.state, code))
            .await
    }

    /// Stored auth state behind `cookie`
    pub async fn auth_info(&self, cookie: &str) -> AuthInfo {
        let session = self.state.auth_store.load(&cookie_headers(cookie)).await.unwrap();
        session.auth
    }

    /// Rewrite the stored auth state behind `cookie`
    pub async fn edit_session(&self, cookie: &str, edit: impl FnOnce(&mut AuthInfo)) {
        let mut session = self.state.auth_store.load(&cookie_headers(cookie)).await.unwrap();
        assert!(!session.is_new(), "no stored session for {cookie}");
        edit(&mut session.auth);
        self.state.auth_store.persist(&session).await.unwrap();
    }
}

pub fn get_request(path: &str, cookie: Option<&str>, extra: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(path);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    for (name, value) in extra {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn callback_body(id_token: &str, state: &str, code: Option<&str>) -> String {
    let mut pairs = vec![("id_token", id_token), ("state", state)];
    if let Some(code) = code {
        pairs.push(("code", code));
    }
    serde_urlencoded::to_string(pairs).unwrap()
}

/// `name=value` of the session cookie set by `response`
pub fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("authproxy="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn cookie_headers(cookie: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, cookie.parse().unwrap());
    headers
}

pub fn reason(response: &Response) -> Option<&str> {
    response
        .headers()
        .get("x-authproxy-reason")
        .and_then(|v| v.to_str().ok())
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
