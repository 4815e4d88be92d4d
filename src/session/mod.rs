//! Per-session authentication state.
//!
//! [`AuthInfo`] is the typed record kept for every browser session. It is
//! serialized into a versioned envelope at the [`SessionStore`] boundary and
//! addressed by an HttpOnly cookie.

pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{SameSitePolicy, SessionConfig};
use crate::oidc::{TokenResponse, VerifiedClaims};
use crate::{Error, Result};

pub use store::{InMemorySessionStore, SessionStore, generate_session_id, spawn_reaper};

/// Bumped whenever [`AuthInfo`] changes incompatibly
pub const AUTH_INFO_VERSION: u32 = 1;

/// Authentication state of one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthInfo {
    pub logged_in: bool,
    /// CSRF state of the login in flight; empty when none
    pub authentication_state: String,
    /// Post-login redirect target
    pub login_referer: String,
    /// Expiry of the held token
    pub expire_at: DateTime<Utc>,
    pub id_token: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub subject: String,
    pub email: Option<String>,
    /// Claims forwarded upstream as identity headers
    pub claims: BTreeMap<String, String>,
}

impl AuthInfo {
    /// Logged in with a token that is still valid at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.logged_in && now < self.expire_at
    }

    /// Record a login in flight
    pub fn begin_login(&mut self, state: String) {
        self.authentication_state = state;
    }

    /// Take the pending state, leaving none in flight
    pub fn take_pending_state(&mut self) -> Option<String> {
        Some(std::mem::take(&mut self.authentication_state)).filter(|s| !s.is_empty())
    }

    /// Take the post-login target, defaulting to `/`
    pub fn take_login_referer(&mut self) -> String {
        let referer = std::mem::take(&mut self.login_referer);
        if referer.is_empty() { "/".to_string() } else { referer }
    }

    /// Install a freshly verified login
    pub fn complete_login(
        &mut self,
        id_token: String,
        claims: &VerifiedClaims,
        tokens: Option<TokenResponse>,
        forwarded_claims: &[String],
    ) {
        self.logged_in = true;
        self.authentication_state.clear();
        self.id_token = id_token;
        self.expire_at = claims.expires_at;
        self.subject.clone_from(&claims.subject);
        self.email.clone_from(&claims.email);
        self.claims = forwarded_claims
            .iter()
            .filter_map(|name| claims.claim(name).map(|v| (name.clone(), v)))
            .collect();
        match tokens {
            Some(tokens) => {
                self.access_token = Some(tokens.access_token);
                self.refresh_token = tokens.refresh_token;
            }
            None => {
                self.access_token = None;
                self.refresh_token = None;
            }
        }
    }

    /// Replace the held tokens after a refresh. Token and expiry change together.
    pub fn apply_refresh(
        &mut self,
        tokens: TokenResponse,
        verified_id_token: Option<(String, &VerifiedClaims)>,
        expire_at: DateTime<Utc>,
        forwarded_claims: &[String],
    ) {
        if let Some((id_token, claims)) = verified_id_token {
            self.id_token = id_token;
            self.subject.clone_from(&claims.subject);
            self.email.clone_from(&claims.email);
            self.claims = forwarded_claims
                .iter()
                .filter_map(|name| claims.claim(name).map(|v| (name.clone(), v)))
                .collect();
        }
        self.access_token = Some(tokens.access_token);
        if let Some(rotated) = tokens.refresh_token {
            self.refresh_token = Some(rotated);
        }
        self.expire_at = expire_at;
    }

    /// Drop the login after an unrecoverable expiry; the user must log in again
    pub fn invalidate(&mut self) {
        self.logged_in = false;
        self.id_token.clear();
        self.access_token = None;
        self.refresh_token = None;
        self.claims.clear();
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    auth: AuthInfo,
}

/// A loaded session
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    is_new: bool,
    pub auth: AuthInfo,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when the client presented no usable session cookie
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Id prefix for log lines; the full id is a bearer secret
    pub fn log_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// Maps HTTP requests to [`AuthInfo`] records
pub struct AuthStore {
    backend: Arc<dyn SessionStore>,
    cookie_name: String,
    ttl: Duration,
    secure: bool,
    same_site: SameSite,
}

impl AuthStore {
    pub fn new(backend: Arc<dyn SessionStore>, config: &SessionConfig) -> Self {
        Self {
            backend,
            cookie_name: config.cookie_name.clone(),
            ttl: config.ttl,
            secure: config.secure,
            same_site: match config.same_site {
                SameSitePolicy::Strict => SameSite::Strict,
                SameSitePolicy::Lax => SameSite::Lax,
                SameSitePolicy::None => SameSite::None,
            },
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Session addressed by the request cookie.
    ///
    /// A missing, malformed, expired or incompatible record yields a zero
    /// [`AuthInfo`]; only backend failures are errors.
    pub async fn load(&self, headers: &HeaderMap) -> Result<Session> {
        let presented = CookieJar::from_headers(headers)
            .get(&self.cookie_name)
            .map(|c| c.value().to_string())
            .filter(|id| store::is_well_formed_id(id));

        let Some(id) = presented else {
            return Ok(Self::fresh());
        };
        match self.fetch(&id).await? {
            Some(auth) => Ok(Session {
                id,
                is_new: false,
                auth,
            }),
            None => Ok(Self::fresh()),
        }
    }

    /// Re-read the stored record of `session`, keeping its id.
    pub async fn reload(&self, session: &mut Session) -> Result<()> {
        session.auth = self.fetch(&session.id).await?.unwrap_or_default();
        Ok(())
    }

    /// Stored record of session `id`, if any
    pub async fn fetch(&self, id: &str) -> Result<Option<AuthInfo>> {
        let Some(raw) = self.backend.get(id).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) if envelope.version == AUTH_INFO_VERSION => Ok(Some(envelope.auth)),
            Ok(envelope) => {
                warn!(
                    version = envelope.version,
                    expected = AUTH_INFO_VERSION,
                    "Discarding session record with incompatible schema"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Discarding undecodable session record");
                Ok(None)
            }
        }
    }

    /// Persist `session` and append its cookie to `response_headers`.
    pub async fn save(&self, session: &Session, response_headers: &mut HeaderMap) -> Result<()> {
        self.persist(session).await?;
        self.set_cookie(session, response_headers)
    }

    /// Write the record of `session` to the backend.
    pub async fn persist(&self, session: &Session) -> Result<()> {
        let record = serde_json::to_string(&Envelope {
            version: AUTH_INFO_VERSION,
            auth: session.auth.clone(),
        })
        .map_err(|e| Error::Session(format!("failed to encode session: {e}")))?;
        self.backend.put(&session.id, record, self.ttl).await
    }

    /// Append the cookie addressing `session` to `response_headers`.
    pub fn set_cookie(&self, session: &Session, response_headers: &mut HeaderMap) -> Result<()> {
        let cookie = self.cookie(session.id.clone());
        let value = HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| Error::Internal(format!("invalid session cookie: {e}")))?;
        response_headers.append(SET_COOKIE, value);
        Ok(())
    }

    /// Move `session` to a new id, deleting the old record.
    pub async fn rotate(&self, session: &mut Session) -> Result<()> {
        let old = std::mem::replace(&mut session.id, generate_session_id());
        self.backend.remove(&old).await?;
        session.is_new = false;
        debug!("Rotated session id");
        Ok(())
    }

    fn fresh() -> Session {
        Session {
            id: generate_session_id(),
            is_new: true,
            auth: AuthInfo::default(),
        }
    }

    fn cookie(&self, id: String) -> Cookie<'static> {
        let max_age = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        Cookie::build((self.cookie_name.clone(), id))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .max_age(time::Duration::seconds(max_age))
            .build()
    }
}
