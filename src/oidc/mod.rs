//! OpenID Connect relying-party engine: nonces, signing keys, ID token
//! verification, the login/callback protocol and the token endpoint client.

pub mod authenticator;
pub mod jwks;
pub mod nonce;
pub mod token;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_support;

pub use authenticator::{
    AuthResponse, Authenticator, CallbackError, CallbackResponse, generate_state,
};
pub use jwks::{JwksError, JwksKeyResolver, KeyResolver};
pub use nonce::{InMemoryNonceStore, NonceStore};
pub use token::{TokenClient, TokenEndpointError, TokenResponse};
pub use validator::{NonceCheck, RejectReason, TokenValidator, ValidationPolicy, VerifiedClaims};
