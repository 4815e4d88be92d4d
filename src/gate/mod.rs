//! Request-facing side of the proxy: the login and callback endpoints, the
//! authentication gate in front of proxied routes, and the reverse proxy.

pub mod error;
pub mod error_pages;
pub mod handlers;
pub mod middleware;
pub mod proxy;
pub mod router;
pub mod server;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use tracing::{debug, error, warn};

use crate::Result;
use crate::config::{Config, GateConfig, UnauthenticatedAction};
use crate::oidc::{Authenticator, KeyResolver, NonceStore, TokenClient, TokenValidator, ValidationPolicy};
use crate::session::{AuthStore, SessionStore};

pub use error::GateError;
pub use error_pages::ErrorPages;
pub use middleware::{RefreshCoordinator, evaluate};
pub use proxy::{Identity, ReverseProxy};
pub use router::create_router;
pub use server::Gateway;

/// Response header naming why a request was refused
pub const REASON_HEADER: HeaderName = HeaderName::from_static("x-authproxy-reason");

/// Authentication state of a request, computed fresh from its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Logged in with an unexpired token
    LoggedIn,
    /// The token had expired and was refreshed during this request
    Refreshed,
    /// No login
    Unauthorized,
    /// Expired with no way to refresh
    TokenExpired,
    /// Expired and the refresh was refused or failed
    RefreshFailed,
}

impl GateState {
    pub fn code(self) -> &'static str {
        match self {
            Self::LoggedIn => "logged_in",
            Self::Refreshed => "refreshed",
            Self::Unauthorized => "unauthorized",
            Self::TokenExpired => "token_expired",
            Self::RefreshFailed => "refresh_failed",
        }
    }

    /// Whether the request may pass to the upstream
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::LoggedIn | Self::Refreshed)
    }
}

/// Route and redirect settings resolved from [`GateConfig`]
pub struct GateSettings {
    routes: GateConfig,
    referer: Regex,
    pub max_body_size: usize,
}

impl GateSettings {
    pub fn new(routes: GateConfig, max_body_size: usize) -> Result<Self> {
        let referer = Regex::new(&routes.referer_pattern).map_err(|e| {
            crate::Error::Config(format!("gate.referer_pattern: {e}"))
        })?;
        Ok(Self {
            routes,
            referer,
            max_body_size,
        })
    }

    pub fn login_path(&self) -> &str {
        &self.routes.login_path
    }

    pub fn callback_path(&self) -> &str {
        &self.routes.callback_path
    }

    pub fn on_unauthenticated(&self) -> UnauthenticatedAction {
        self.routes.on_unauthenticated
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.routes.is_public(path)
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.routes.is_protected(path)
    }

    /// Whether a `Referer` may become the post-login redirect target
    pub fn accepts_referer(&self, referer: &str) -> bool {
        self.referer.is_match(referer)
    }
}

/// Shared application state
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub tokens: Arc<TokenClient>,
    pub auth_store: Arc<AuthStore>,
    pub proxy: Arc<ReverseProxy>,
    pub error_pages: Arc<ErrorPages>,
    pub settings: GateSettings,
    pub refresher: RefreshCoordinator,
    /// Claims kept in the session for identity headers
    pub forwarded_claims: Vec<String>,
}

impl AppState {
    /// Wire the engine together from configuration and the given backends.
    pub fn new(
        config: &Config,
        keys: Arc<dyn KeyResolver>,
        nonces: Arc<dyn NonceStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let validator = TokenValidator::new(keys, ValidationPolicy::from_config(&config.oidc));
        let authenticator = Authenticator::new(&config.oidc, nonces, validator)?;
        let tokens = TokenClient::new(&config.oidc)?;
        let proxy = ReverseProxy::new(&config.upstream, config.server.max_body_size)?;
        let forwarded_claims = proxy.forwarded_claims();

        Ok(Self {
            authenticator: Arc::new(authenticator),
            tokens: Arc::new(tokens),
            auth_store: Arc::new(AuthStore::new(sessions, &config.session)),
            proxy: Arc::new(proxy),
            error_pages: Arc::new(ErrorPages::from_config(config)?),
            settings: GateSettings::new(config.gate.clone(), config.server.max_body_size)?,
            refresher: RefreshCoordinator::default(),
            forwarded_claims,
        })
    }

    /// Render a failed request, tagged with its reason code
    pub fn reject(&self, err: &GateError) -> Response {
        let status = err.status();
        if status.is_server_error() {
            error!(error = %err, code = err.code(), "Request failed");
        } else if status == StatusCode::NOT_FOUND {
            debug!(error = %err, "Request failed");
        } else {
            warn!(error = %err, code = err.code(), "Request rejected");
        }
        let mut response = self.error_pages.render(status, &err.public_message());
        response
            .headers_mut()
            .insert(REASON_HEADER, HeaderValue::from_static(err.code()));
        response
    }
}

/// Redirect with a `Location` that may not be a valid header value
pub(crate) fn redirect(status: StatusCode, location: &str) -> Response {
    (
        status,
        [
            (header::LOCATION, location.to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response()
}
