//! Error types for the authenticating proxy

use std::io;

use thiserror::Error;

/// Result type alias for the authenticating proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Process-level errors: startup, configuration and backend plumbing.
///
/// Request-level failures are modelled by [`crate::gate::GateError`], which
/// maps onto HTTP statuses. This type is what bubbles out of `main`.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session backend failure (read, write or decode)
    #[error("Session backend error: {0}")]
    Session(String),

    /// Signing keys could not be obtained from the identity provider
    #[error("JWKS error: {0}")]
    Jwks(#[from] crate::oidc::JwksError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error originates in the session backend
    #[must_use]
    pub fn is_session(&self) -> bool {
        matches!(self, Self::Session(_))
    }
}
