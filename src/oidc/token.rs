//! Token endpoint client: authorization-code exchange and refresh.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{OidcConfig, TokenAuthMethod};
use crate::{Error, Result};

/// Token endpoint failures. Timeouts surface as [`TokenEndpointError::Request`].
#[derive(Debug, thiserror::Error)]
pub enum TokenEndpointError {
    #[error("no token endpoint is configured")]
    NotConfigured,

    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token endpoint returned HTTP {status}: {error}")]
    Rejected { status: u16, error: String },
}

impl TokenEndpointError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_timeout())
    }
}

/// Successful token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the identity provider's token endpoint
pub struct TokenClient {
    http: Client,
    token_url: Option<String>,
    client_id: String,
    client_secret: Option<String>,
    redirect_url: Option<String>,
    auth_method: TokenAuthMethod,
}

impl TokenClient {
    /// Build a client whose every request is bounded by `oidc.http_timeout`.
    pub fn new(config: &OidcConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(config.http_timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build token client: {e}")))?;
        Ok(Self {
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_url.clone(),
            auth_method: config.token_auth_method,
        })
    }

    /// Whether code exchange and refresh are available
    pub fn is_configured(&self) -> bool {
        self.token_url.is_some()
    }

    /// Exchange an authorization code from the hybrid callback
    pub async fn exchange_code(
        &self,
        code: &str,
    ) -> std::result::Result<TokenResponse, TokenEndpointError> {
        let mut params = vec![("grant_type", "authorization_code"), ("code", code)];
        if let Some(redirect_url) = &self.redirect_url {
            params.push(("redirect_uri", redirect_url.as_str()));
        }
        self.request(params).await
    }

    /// Trade a refresh token for fresh tokens
    pub async fn refresh(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<TokenResponse, TokenEndpointError> {
        self.request(vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn request<'a>(
        &'a self,
        mut params: Vec<(&'a str, &'a str)>,
    ) -> std::result::Result<TokenResponse, TokenEndpointError> {
        let url = self
            .token_url
            .as_deref()
            .ok_or(TokenEndpointError::NotConfigured)?;
        let grant = params.first().map_or("", |(_, v)| *v);

        let mut req = self.http.post(url);
        match self.auth_method {
            TokenAuthMethod::ClientSecretBasic => {
                req = req.basic_auth(&self.client_id, self.client_secret.as_deref());
            }
            TokenAuthMethod::ClientSecretPost => {
                params.push(("client_id", self.client_id.as_str()));
                if let Some(secret) = self.client_secret.as_deref() {
                    params.push(("client_secret", secret));
                }
            }
        }

        debug!(grant = %grant, "Calling token endpoint");
        let response = req.form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body: OAuthErrorBody = response.json().await.unwrap_or_default();
            warn!(
                status,
                grant = %grant,
                error = %body.error,
                description = body.error_description.as_deref().unwrap_or(""),
                "Token endpoint rejected request"
            );
            return Err(TokenEndpointError::Rejected {
                status,
                error: if body.error.is_empty() {
                    "unknown_error".to_string()
                } else {
                    body.error
                },
            });
        }

        Ok(response.json().await?)
    }
}
