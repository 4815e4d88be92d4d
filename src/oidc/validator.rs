//! ID token verification.
//!
//! # Verification order
//!
//! 1. Decode the header; reject unless `alg` is the configured asymmetric algorithm.
//! 2. Resolve the signing key by `kid`; an unknown key rejects.
//! 3. Verify the signature.
//! 4. Require `nonce`, `aud`, `iss`, `iat`, `exp` and `sub`.
//! 5. Redeem the nonce (skipped for refreshed tokens).
//! 6. Check the issuer, then the audience, then `now < exp`.
//!
//! The nonce is redeemed before the policy checks, so a token that fails
//! them has still burnt its nonce and cannot be retried.

use std::collections::HashSet;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::OidcConfig;
use crate::oidc::jwks::KeyResolver;
use crate::oidc::nonce::NonceStore;

/// Why a token or callback was refused.
///
/// `code()` is stable and safe to show users; the `Display` text is for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("token is not a well-formed JWT")]
    MalformedToken,
    #[error("token is signed with a disallowed algorithm")]
    UnsupportedAlgorithm,
    #[error("token header carries no key id")]
    MissingKeyId,
    #[error("token key id is not in the provider key set")]
    UnknownKeyId,
    #[error("token signature does not verify")]
    InvalidSignature,
    #[error("token is missing the `{0}` claim")]
    MissingClaim(&'static str),
    #[error("nonce is unknown, expired or already used")]
    InvalidNonce,
    #[error("issuer is not allowed")]
    IssuerMismatch,
    #[error("audience is not allowed")]
    AudienceMismatch,
    #[error("token has expired")]
    Expired,
    #[error("identity provider reported an error")]
    IdentityProviderError,
    #[error("no login is in flight for this session")]
    NoLoginInFlight,
    #[error("state does not match the login in flight")]
    StateMismatch,
}

impl RejectReason {
    /// Stable machine-readable reason code
    pub fn code(self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
            Self::MissingKeyId => "missing_key_id",
            Self::UnknownKeyId => "unknown_key_id",
            Self::InvalidSignature => "invalid_signature",
            Self::MissingClaim(_) => "missing_claim",
            Self::InvalidNonce => "invalid_nonce",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::AudienceMismatch => "audience_mismatch",
            Self::Expired => "token_expired",
            Self::IdentityProviderError => "idp_error",
            Self::NoLoginInFlight => "no_login_in_flight",
            Self::StateMismatch => "state_mismatch",
        }
    }
}

/// What a token must satisfy beyond its signature
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub algorithm: Algorithm,
    pub issuers: HashSet<String>,
    pub audiences: HashSet<String>,
}

impl ValidationPolicy {
    pub fn from_config(config: &OidcConfig) -> Self {
        Self {
            algorithm: config.signing_algorithm,
            issuers: config.issuers.iter().cloned().collect(),
            audiences: config.audiences.iter().cloned().collect(),
        }
    }
}

/// How the `nonce` claim is treated
#[derive(Clone, Copy)]
pub enum NonceCheck<'a> {
    /// Require the claim and redeem it against the store
    Consume(&'a dyn NonceStore),
    /// Refreshed tokens carry no fresh nonce
    Skip,
}

/// Claims of a verified ID token
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims {
    pub subject: String,
    pub email: Option<String>,
    pub issuer: String,
    pub audience: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    /// Remaining claims (`preferred_username`, `name`, ...)
    pub extra: Map<String, Value>,
}

impl VerifiedClaims {
    /// A claim rendered as a header-friendly string.
    ///
    /// Registered claims are looked up first, then the extra claims. Strings
    /// are returned as-is, numbers and booleans are formatted, anything else is
    /// `None`.
    pub fn claim(&self, name: &str) -> Option<String> {
        match name {
            "sub" => return Some(self.subject.clone()),
            "iss" => return Some(self.issuer.clone()),
            "email" => return self.email.clone(),
            _ => {}
        }
        match self.extra.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

#[derive(Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: Option<Value>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Verifies ID tokens against a key resolver and a policy
pub struct TokenValidator {
    keys: Arc<dyn KeyResolver>,
    policy: ValidationPolicy,
}

impl TokenValidator {
    pub fn new(keys: Arc<dyn KeyResolver>, policy: ValidationPolicy) -> Self {
        Self { keys, policy }
    }

    /// Verify `raw` as of the current time.
    pub async fn validate(
        &self,
        raw: &str,
        nonce: NonceCheck<'_>,
    ) -> Result<VerifiedClaims, RejectReason> {
        self.validate_at(raw, nonce, Utc::now()).await
    }

    /// Verify `raw` as of `now`.
    pub async fn validate_at(
        &self,
        raw: &str,
        nonce: NonceCheck<'_>,
        now: DateTime<Utc>,
    ) -> Result<VerifiedClaims, RejectReason> {
        let header = decode_header(raw)?;
        let alg = header
            .alg
            .parse::<Algorithm>()
            .map_err(|_| RejectReason::UnsupportedAlgorithm)?;
        if alg != self.policy.algorithm {
            return Err(RejectReason::UnsupportedAlgorithm);
        }

        let kid = header.kid.ok_or(RejectReason::MissingKeyId)?;
        let key = self
            .keys
            .resolve(&kid)
            .await
            .ok_or(RejectReason::UnknownKeyId)?;

        // Registered claims are checked below, in a fixed order
        let mut validation = Validation::new(self.policy.algorithm);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = jsonwebtoken::decode::<IdTokenClaims>(raw, &key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidKeyFormat => RejectReason::InvalidSignature,
                _ => RejectReason::MalformedToken,
            })?
            .claims;

        if nonce.requires_claim() && claims.nonce.is_none() {
            return Err(RejectReason::MissingClaim("nonce"));
        }
        let aud = claims.aud.ok_or(RejectReason::MissingClaim("aud"))?;
        let iss = claims.iss.ok_or(RejectReason::MissingClaim("iss"))?;
        let iat = claims.iat.ok_or(RejectReason::MissingClaim("iat"))?;
        let exp = claims.exp.ok_or(RejectReason::MissingClaim("exp"))?;

        if let (NonceCheck::Consume(store), Some(value)) = (nonce, claims.nonce.as_deref()) {
            if !store.consume_once(value) {
                return Err(RejectReason::InvalidNonce);
            }
        }
        let subject = claims.sub.ok_or(RejectReason::MissingClaim("sub"))?;

        if !self.policy.issuers.contains(&iss) {
            debug!(issuer = %iss, "Issuer not in allow-list");
            return Err(RejectReason::IssuerMismatch);
        }

        let audience = audience_list(&aud).ok_or(RejectReason::MalformedToken)?;
        if !audience.iter().any(|a| self.policy.audiences.contains(a)) {
            return Err(RejectReason::AudienceMismatch);
        }

        if now.timestamp() >= exp {
            return Err(RejectReason::Expired);
        }

        let expires_at = DateTime::from_timestamp(exp, 0).ok_or(RejectReason::MalformedToken)?;
        let issued_at = DateTime::from_timestamp(iat, 0).ok_or(RejectReason::MalformedToken)?;

        Ok(VerifiedClaims {
            subject,
            email: claims.email,
            issuer: iss,
            audience,
            expires_at,
            issued_at,
            extra: claims.extra,
        })
    }
}

impl NonceCheck<'_> {
    fn requires_claim(self) -> bool {
        matches!(self, Self::Consume(_))
    }
}

/// Decode the JOSE header without verification.
fn decode_header(raw: &str) -> Result<RawHeader, RejectReason> {
    let mut parts = raw.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RejectReason::MalformedToken);
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| RejectReason::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(|_| RejectReason::MalformedToken)
}

/// `aud` may be a single string or an array of strings.
fn audience_list(aud: &Value) -> Option<Vec<String>> {
    match aud {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(arr) => arr
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}
