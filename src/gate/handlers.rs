//! Login and callback endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::REFERER;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use chrono::Utc;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use super::error::GateError;
use super::{AppState, redirect};
use crate::oidc::{AuthResponse, RejectReason, TokenResponse, generate_state};
use crate::session::Session;

/// `GET <login_path>`: start a login at the identity provider
pub async fn login(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match begin_login(&state, &headers).await {
        Ok(response) => response,
        Err(e) => state.reject(&e),
    }
}

async fn begin_login(state: &AppState, headers: &HeaderMap) -> Result<Response, GateError> {
    let mut session = state
        .auth_store
        .load(headers)
        .await
        .map_err(GateError::SessionBackendFailure)?;

    if session.auth.is_active_at(Utc::now()) {
        debug!(session = %session.log_id(), "Already logged in");
        return Ok(redirect(StatusCode::SEE_OTHER, "/"));
    }

    let csrf_state = generate_state();
    let url = state
        .authenticator
        .build_login_url(&csrf_state, &[])
        .map_err(|e| GateError::Internal(e.to_string()))?;
    session.auth.begin_login(csrf_state);

    if let Some(referer) = headers.get(REFERER).and_then(|v| v.to_str().ok()) {
        if state.settings.accepts_referer(referer) {
            session.auth.login_referer = referer.to_string();
        } else {
            debug!(referer = %referer, "Referer not allowed as login target");
        }
    }

    let mut response = redirect(StatusCode::FOUND, url.as_str());
    state
        .auth_store
        .save(&session, response.headers_mut())
        .await
        .map_err(GateError::SessionBackendFailure)?;
    info!(session = %session.log_id(), "Login started");
    Ok(response)
}

/// `POST <callback_path>`: finish a login from the identity provider's form post
pub async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut session = match state.auth_store.load(&headers).await {
        Ok(session) => session,
        Err(e) => return state.reject(&GateError::SessionBackendFailure(e)),
    };
    let pending = session.auth.take_pending_state();

    match complete_login(&state, &headers, &body, pending.as_deref()).await {
        Ok(login) => finish_login(&state, session, login).await,
        Err(err) => {
            let mut response = state.reject(&err);
            // The pending state is spent whatever the outcome
            if pending.is_some() {
                if let Err(e) = state.auth_store.save(&session, response.headers_mut()).await {
                    return state.reject(&GateError::SessionBackendFailure(e));
                }
            }
            response
        }
    }
}

struct CompletedLogin {
    auth: AuthResponse,
    tokens: Option<TokenResponse>,
}

/// Check the callback against the login in flight, then verify it.
///
/// State is compared before the token is verified, so a forged callback
/// cannot burn the nonce of a real login.
async fn complete_login(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    pending: Option<&str>,
) -> Result<CompletedLogin, GateError> {
    let response = state.authenticator.parse_callback(headers, body)?;

    let Some(expected) = pending else {
        return Err(RejectReason::NoLoginInFlight.into());
    };
    if !bool::from(expected.as_bytes().ct_eq(response.state.as_bytes())) {
        return Err(RejectReason::StateMismatch.into());
    }

    let auth = state.authenticator.verify(response).await?;
    let tokens = match auth.code.as_deref() {
        Some(code) if state.tokens.is_configured() => Some(
            state
                .tokens
                .exchange_code(code)
                .await
                .map_err(GateError::TokenExchangeFailed)?,
        ),
        _ => None,
    };
    Ok(CompletedLogin { auth, tokens })
}

async fn finish_login(state: &AppState, mut session: Session, login: CompletedLogin) -> Response {
    let target = session.auth.take_login_referer();
    let subject = login.auth.claims.subject.clone();
    session.auth.complete_login(
        login.auth.id_token,
        &login.auth.claims,
        login.tokens,
        &state.forwarded_claims,
    );

    if let Err(e) = state.auth_store.rotate(&mut session).await {
        return state.reject(&GateError::SessionBackendFailure(e));
    }
    let mut response = redirect(StatusCode::SEE_OTHER, &target);
    if let Err(e) = state.auth_store.save(&session, response.headers_mut()).await {
        return state.reject(&GateError::SessionBackendFailure(e));
    }
    info!(session = %session.log_id(), subject = %subject, "Login completed");
    response
}
