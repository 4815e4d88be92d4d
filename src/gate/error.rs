//! Request-level failures and their HTTP mapping.

use axum::http::StatusCode;
use thiserror::Error;

use crate::oidc::{CallbackError, RejectReason, TokenEndpointError};

/// Why a request handled by the gate failed
#[derive(Debug, Error)]
pub enum GateError {
    /// Missing or invalid body or fields
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Signature, claim, nonce or state check failed
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(RejectReason),

    /// First-time code exchange failed
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(#[source] TokenEndpointError),

    /// Session storage read or write failed
    #[error("session backend failure: {0}")]
    SessionBackendFailure(#[source] crate::Error),

    /// No route matches
    #[error("no route for {0}")]
    NotFound(String),

    /// The upstream could not be reached
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationRejected(_) => StatusCode::UNAUTHORIZED,
            Self::TokenExchangeFailed(_) | Self::SessionBackendFailure(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable reason code, safe to expose
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "malformed_request",
            Self::AuthenticationRejected(reason) => reason.code(),
            Self::TokenExchangeFailed(_) => "token_exchange_failed",
            Self::SessionBackendFailure(_) => "session_backend_failure",
            Self::NotFound(_) => "not_found",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Coarse user-facing message; never includes request or claim content
    pub fn public_message(&self) -> String {
        match self {
            Self::MalformedRequest(_) => "The request could not be understood.".to_string(),
            Self::AuthenticationRejected(reason) => {
                format!("Authentication failed ({}). Please log in again.", reason.code())
            }
            Self::TokenExchangeFailed(_) => {
                "The identity provider could not complete the login.".to_string()
            }
            Self::SessionBackendFailure(_) | Self::Internal(_) => {
                "Something went wrong on our side.".to_string()
            }
            Self::NotFound(_) => "Page not found.".to_string(),
            Self::UpstreamUnavailable(_) => "The service is unavailable.".to_string(),
        }
    }
}

impl From<CallbackError> for GateError {
    fn from(err: CallbackError) -> Self {
        match err.reject_reason() {
            Some(reason) => Self::AuthenticationRejected(reason),
            None => Self::MalformedRequest(err.to_string()),
        }
    }
}

impl From<RejectReason> for GateError {
    fn from(reason: RejectReason) -> Self {
        Self::AuthenticationRejected(reason)
    }
}
