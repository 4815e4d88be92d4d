//! Login URL construction and callback verification for the hybrid
//! `id_token code` flow with `form_post` response mode.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::nonce::NonceStore;
use super::validator::{NonceCheck, RejectReason, TokenValidator, VerifiedClaims};
use crate::config::OidcConfig;
use crate::{Error, Result};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const RESPONSE_TYPE: &str = "id_token code";
pub const RESPONSE_MODE: &str = "form_post";

/// Parameters the caller cannot override through extra login parameters
const RESERVED_PARAMS: &[&str] = &[
    "response_type",
    "response_mode",
    "client_id",
    "scope",
    "state",
    "nonce",
];

/// Fresh CSRF state for a login attempt
pub fn generate_state() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Callback form fields
#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    id_token: Option<String>,
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// A syntactically valid, not yet verified callback
#[derive(Debug, Clone)]
pub struct CallbackResponse {
    pub id_token: String,
    pub code: Option<String>,
    pub state: String,
}

/// A verified callback
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub id_token: String,
    pub code: Option<String>,
    pub state: String,
    pub claims: VerifiedClaims,
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("callback content type must be {FORM_CONTENT_TYPE}")]
    UnsupportedContentType,

    #[error("callback body is not a valid form: {0}")]
    MalformedBody(String),

    #[error("callback is missing `{0}`")]
    MissingField(&'static str),

    #[error("[Authentication Error: {error}]{description}")]
    IdentityProvider { error: String, description: String },

    #[error(transparent)]
    Rejected(#[from] RejectReason),
}

impl CallbackError {
    /// The rejection reason, for errors that are authentication failures
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::IdentityProvider { .. } => Some(RejectReason::IdentityProviderError),
            Self::Rejected(reason) => Some(*reason),
            Self::UnsupportedContentType | Self::MalformedBody(_) | Self::MissingField(_) => None,
        }
    }
}

/// Drives the relying-party side of the login
pub struct Authenticator {
    auth_url: Url,
    client_id: String,
    redirect_url: Option<String>,
    scope: String,
    extra_params: Vec<(String, String)>,
    nonces: Arc<dyn NonceStore>,
    validator: TokenValidator,
}

impl Authenticator {
    pub fn new(
        config: &OidcConfig,
        nonces: Arc<dyn NonceStore>,
        validator: TokenValidator,
    ) -> Result<Self> {
        let auth_url = Url::parse(&config.auth_url)
            .map_err(|e| Error::Config(format!("oidc.auth_url: {e}")))?;

        let mut scopes: Vec<&str> = config.scopes.iter().map(String::as_str).collect();
        if !scopes.contains(&"openid") {
            scopes.insert(0, "openid");
        }

        Ok(Self {
            auth_url,
            client_id: config.client_id.clone(),
            redirect_url: config.redirect_url.clone(),
            scope: scopes.join(" "),
            extra_params: config
                .extra_auth_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            nonces,
            validator,
        })
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Authorization URL for a login bound to `state`; issues a fresh nonce.
    pub fn build_login_url(&self, state: &str, extra: &[(&str, &str)]) -> Result<Url> {
        if state.is_empty() {
            return Err(Error::Internal("login state must not be empty".into()));
        }

        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", RESPONSE_TYPE),
            ("response_mode", RESPONSE_MODE),
            ("client_id", self.client_id.as_str()),
            ("scope", self.scope.as_str()),
        ];
        if let Some(redirect_url) = self.redirect_url.as_deref() {
            params.push(("redirect_uri", redirect_url));
        }

        let configured = self.extra_params.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        for (key, value) in configured.chain(extra.iter().copied()) {
            if RESERVED_PARAMS.contains(&key) {
                warn!(param = %key, "Ignoring attempt to override reserved login parameter");
                continue;
            }
            match params.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => params.push((key, value)),
            }
        }

        let nonce = self.nonces.issue();
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .extend_pairs(&params)
            .append_pair("state", state)
            .append_pair("nonce", &nonce);
        Ok(url)
    }

    /// Parse a `form_post` callback without verifying the token.
    pub fn parse_callback(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> std::result::Result<CallbackResponse, CallbackError> {
        let is_form = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE));
        if !is_form {
            return Err(CallbackError::UnsupportedContentType);
        }

        let params: CallbackParams = serde_urlencoded::from_bytes(body)
            .map_err(|e| CallbackError::MalformedBody(e.to_string()))?;

        if let Some(error) = params.error.filter(|e| !e.is_empty()) {
            return Err(CallbackError::IdentityProvider {
                error,
                description: params.error_description.unwrap_or_default(),
            });
        }

        let state = params
            .state
            .filter(|s| !s.is_empty())
            .ok_or(CallbackError::MissingField("state"))?;
        let id_token = params
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or(CallbackError::MissingField("id_token"))?;

        Ok(CallbackResponse {
            id_token,
            code: params.code.filter(|c| !c.is_empty()),
            state,
        })
    }

    /// Verify the ID token of a parsed callback, redeeming its nonce.
    pub async fn verify(
        &self,
        response: CallbackResponse,
    ) -> std::result::Result<AuthResponse, CallbackError> {
        let claims = self
            .validator
            .validate(&response.id_token, NonceCheck::Consume(self.nonces.as_ref()))
            .await?;
        debug!(subject = %claims.subject, issuer = %claims.issuer, "ID token verified");
        Ok(AuthResponse {
            id_token: response.id_token,
            code: response.code,
            state: response.state,
            claims,
        })
    }

    /// Parse and verify in one step.
    pub async fn handle_callback(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> std::result::Result<AuthResponse, CallbackError> {
        let response = self.parse_callback(headers, body)?;
        self.verify(response).await
    }
}
