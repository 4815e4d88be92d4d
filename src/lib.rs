//! OIDC Authenticating Proxy Library
//!
//! Puts an OpenID Connect login in front of any HTTP service.
//!
//! # Features
//!
//! - **Hybrid login**: `response_type=id_token code` with `form_post` callbacks
//! - **ID token verification**: JWKS-backed signatures, issuer/audience/expiry checks, single-use nonces
//! - **Sessions**: HttpOnly cookie addressing a server-side record, rotated on login
//! - **Gate**: public, protected and unknown paths; transparent token refresh
//! - **Identity forwarding**: `Bearer` token and claim headers injected only after the gate

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gate;
pub mod oidc;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
