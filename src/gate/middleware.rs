//! Authentication gate in front of proxied routes.
//!
//! Public paths pass through untouched. Protected paths need a live login; an
//! expired token is refreshed once per session even under concurrent requests.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::error::GateError;
use super::proxy::Identity;
use super::{AppState, GateState, REASON_HEADER, redirect};
use crate::config::{ForwardToken, UnauthenticatedAction};
use crate::oidc::NonceCheck;
use crate::session::Session;

/// Gate middleware for the proxied routes
pub async fn auth_redirect(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if state.settings.is_public(&path) {
        debug!(path = %path, "Public path");
        return next.run(request).await;
    }
    if !state.settings.is_protected(&path) {
        return state.reject(&GateError::NotFound(path));
    }

    let mut session = match state.auth_store.load(request.headers()).await {
        Ok(session) => session,
        Err(e) => return state.reject(&GateError::SessionBackendFailure(e)),
    };
    let gate = match evaluate(&state, &mut session, Utc::now()).await {
        Ok(gate) => gate,
        Err(e) => return state.reject(&e),
    };

    match gate {
        GateState::LoggedIn => {
            let identity = Identity::from_auth_info(&session.auth, state.proxy.forward_token());
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        GateState::Refreshed => {
            // Already persisted under the refresh lock
            let mut cookies = HeaderMap::new();
            if let Err(e) = state.auth_store.set_cookie(&session, &mut cookies) {
                return state.reject(&GateError::SessionBackendFailure(e));
            }
            let identity = Identity::from_auth_info(&session.auth, state.proxy.forward_token());
            request.extensions_mut().insert(identity);

            let mut response = next.run(request).await;
            for value in cookies.get_all(SET_COOKIE) {
                response.headers_mut().append(SET_COOKIE, value.clone());
            }
            response
        }
        GateState::Unauthorized | GateState::TokenExpired | GateState::RefreshFailed => {
            let target = request
                .uri()
                .path_and_query()
                .map_or(path, |pq| pq.as_str().to_string());
            unauthenticated(&state, session, gate, &target).await
        }
    }
}

/// Gate state of `session` at `now`, refreshing an expired token when possible.
pub async fn evaluate(
    state: &AppState,
    session: &mut Session,
    now: DateTime<Utc>,
) -> Result<GateState, GateError> {
    if !session.auth.logged_in {
        return Ok(GateState::Unauthorized);
    }
    if session.auth.is_active_at(now) {
        return Ok(GateState::LoggedIn);
    }
    if session.auth.refresh_token.is_none() || !state.tokens.is_configured() {
        return Ok(GateState::TokenExpired);
    }
    state.refresher.refresh(state, session).await
}

/// Refuse a request that is not authenticated
async fn unauthenticated(
    state: &AppState,
    mut session: Session,
    gate: GateState,
    target: &str,
) -> Response {
    let mut dirty = false;
    if matches!(gate, GateState::TokenExpired | GateState::RefreshFailed) {
        session.auth.invalidate();
        dirty = true;
    }

    let mut response = match state.settings.on_unauthenticated() {
        UnauthenticatedAction::Page => state
            .error_pages
            .render(StatusCode::UNAUTHORIZED, "Please Login."),
        UnauthenticatedAction::Redirect => {
            if is_local_path(target) {
                session.auth.login_referer = target.to_string();
                dirty = true;
            }
            redirect(StatusCode::FOUND, state.settings.login_path())
        }
    };
    response
        .headers_mut()
        .insert(REASON_HEADER, HeaderValue::from_static(gate.code()));

    if dirty {
        if let Err(e) = state.auth_store.save(&session, response.headers_mut()).await {
            return state.reject(&GateError::SessionBackendFailure(e));
        }
    }
    debug!(session = %session.log_id(), state = gate.code(), "Request not authenticated");
    response
}

/// Same-origin path safe to redirect to after login
fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}

/// Serializes token refreshes per session.
///
/// The first request to find an expired token refreshes it; concurrent
/// requests for the same session wait and then reuse the stored result.
#[derive(Default)]
pub struct RefreshCoordinator {
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl RefreshCoordinator {
    pub(crate) async fn refresh(
        &self,
        state: &AppState,
        session: &mut Session,
    ) -> Result<GateState, GateError> {
        let lock = self
            .in_flight
            .entry(session.id().to_string())
            .or_default()
            .clone();
        let outcome = {
            let _guard = lock.lock().await;
            refresh_locked(state, session).await
        };
        // The map holds one reference and `lock` the other
        self.in_flight
            .remove_if(session.id(), |_, l| Arc::strong_count(l) == 2);
        outcome
    }

    /// Sessions with a refresh in progress
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

async fn refresh_locked(state: &AppState, session: &mut Session) -> Result<GateState, GateError> {
    state
        .auth_store
        .reload(session)
        .await
        .map_err(GateError::SessionBackendFailure)?;

    let now = Utc::now();
    if session.auth.is_active_at(now) {
        debug!(session = %session.log_id(), "Token already refreshed by a concurrent request");
        return Ok(GateState::LoggedIn);
    }
    if !session.auth.logged_in {
        return Ok(GateState::Unauthorized);
    }
    let Some(refresh_token) = session.auth.refresh_token.clone() else {
        return Ok(GateState::TokenExpired);
    };

    let tokens = match state.tokens.refresh(&refresh_token).await {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(
                session = %session.log_id(),
                error = %e,
                timeout = e.is_timeout(),
                "Token refresh failed"
            );
            return Ok(GateState::RefreshFailed);
        }
    };

    let verified = match tokens.id_token.clone() {
        Some(raw) => match state
            .authenticator
            .validator()
            .validate(&raw, NonceCheck::Skip)
            .await
        {
            Ok(claims) => Some((raw, claims)),
            Err(reason) => {
                warn!(session = %session.log_id(), reason = reason.code(), "Refreshed ID token rejected");
                return Ok(GateState::RefreshFailed);
            }
        },
        None if state.proxy.forward_token() == ForwardToken::IdToken => {
            // The held ID token is what goes upstream and it has expired
            warn!(session = %session.log_id(), "Refresh returned no ID token to forward");
            return Ok(GateState::RefreshFailed);
        }
        None => None,
    };

    let expire_at = match (&verified, tokens.expires_in) {
        (Some((_, claims)), _) => Some(claims.expires_at),
        (None, Some(secs)) => i64::try_from(secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl)),
        (None, None) => None,
    };
    let Some(expire_at) = expire_at.filter(|at| *at > now) else {
        warn!(session = %session.log_id(), "Refresh response carries no usable expiry");
        return Ok(GateState::RefreshFailed);
    };

    session.auth.apply_refresh(
        tokens,
        verified.as_ref().map(|(raw, claims)| (raw.clone(), claims)),
        expire_at,
        &state.forwarded_claims,
    );
    state
        .auth_store
        .persist(session)
        .await
        .map_err(GateError::SessionBackendFailure)?;
    info!(session = %session.log_id(), expire_at = %expire_at, "Token refreshed");
    Ok(GateState::Refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, OidcConfig, UpstreamConfig};
    use crate::oidc::test_support::{CLIENT_ID, ISSUER, jwks};
    use crate::oidc::{InMemoryNonceStore, JwksKeyResolver};
    use crate::session::InMemorySessionStore;
    use std::time::Duration;

    fn app_state(token_url: Option<String>) -> AppState {
        let config = Config {
            oidc: OidcConfig {
                client_id: CLIENT_ID.into(),
                auth_url: "https://idp.example.com/authorize".into(),
                token_url,
                jwks_url: "https://idp.example.com/jwks".into(),
                issuers: vec![ISSUER.into()],
                audiences: vec![CLIENT_ID.into()],
                ..OidcConfig::default()
            },
            upstream: UpstreamConfig {
                url: "http://127.0.0.1:9".into(),
                ..UpstreamConfig::default()
            },
            ..Config::default()
        };
        AppState::new(
            &config,
            Arc::new(JwksKeyResolver::from_jwk_set(&jwks())),
            Arc::new(InMemoryNonceStore::new(Duration::from_secs(60))),
            Arc::new(InMemorySessionStore::new()),
        )
        .unwrap()
    }

    async fn session_with(state: &AppState, logged_in: bool, expire_in: i64, refresh: bool) -> Session {
        let mut session = state.auth_store.load(&HeaderMap::new()).await.unwrap();
        session.auth.logged_in = logged_in;
        session.auth.id_token = "id.token".into();
        session.auth.expire_at = Utc::now() + TimeDelta::seconds(expire_in);
        session.auth.refresh_token = refresh.then(|| "refresh-1".to_string());
        session
    }

    #[tokio::test]
    async fn classifies_sessions_without_refresh() {
        let state = app_state(None);
        let now = Utc::now();

        let mut anonymous = session_with(&state, false, 3600, false).await;
        assert_eq!(
            evaluate(&state, &mut anonymous, now).await.unwrap(),
            GateState::Unauthorized
        );

        let mut live = session_with(&state, true, 3600, false).await;
        assert_eq!(evaluate(&state, &mut live, now).await.unwrap(), GateState::LoggedIn);

        let mut expired = session_with(&state, true, -10, false).await;
        assert_eq!(
            evaluate(&state, &mut expired, now).await.unwrap(),
            GateState::TokenExpired
        );
    }

    #[tokio::test]
    async fn refresh_token_without_endpoint_is_expired() {
        let state = app_state(None);
        let mut session = session_with(&state, true, -10, true).await;
        assert_eq!(
            evaluate(&state, &mut session, Utc::now()).await.unwrap(),
            GateState::TokenExpired
        );
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_fails_refresh_and_releases_lock() {
        // GIVEN: an expired, stored session and a token endpoint nobody listens on
        let state = app_state(Some("http://127.0.0.1:9/token".into()));
        let session = session_with(&state, true, -10, true).await;
        state.auth_store.save(&session, &mut HeaderMap::new()).await.unwrap();
        let mut session = session;

        // WHEN
        let gate = evaluate(&state, &mut session, Utc::now()).await.unwrap();

        // THEN
        assert_eq!(gate, GateState::RefreshFailed);
        assert_eq!(state.refresher.in_flight(), 0);
    }

    #[tokio::test]
    async fn concurrent_refresh_reuses_stored_result() {
        // GIVEN: a stale in-memory copy of a session whose stored record is live
        let state = app_state(Some("http://127.0.0.1:9/token".into()));
        let stored = session_with(&state, true, 3600, true).await;
        state.auth_store.save(&stored, &mut HeaderMap::new()).await.unwrap();
        let mut stale = stored.clone();
        stale.auth.expire_at = Utc::now() - TimeDelta::seconds(10);

        // WHEN
        let gate = evaluate(&state, &mut stale, Utc::now()).await.unwrap();

        // THEN: no refresh call was needed
        assert_eq!(gate, GateState::LoggedIn);
        assert_eq!(stale.auth.expire_at, stored.auth.expire_at);
    }

    #[test]
    fn only_local_paths_are_remembered() {
        assert!(is_local_path("/app/page?x=1"));
        assert!(!is_local_path("//evil.example.com/"));
        assert!(!is_local_path("/\\evil.example.com"));
        assert!(!is_local_path("https://evil.example.com/"));
    }
}
