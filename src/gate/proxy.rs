//! Reverse proxy to the upstream service

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONNECTION, CONTENT_LENGTH, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Uri};
use axum::response::Response;
use tracing::{debug, warn};
use url::Url;

use super::AppState;
use super::error::GateError;
use crate::config::{ForwardToken, UpstreamConfig};
use crate::session::AuthInfo;
use crate::{Error, Result};

/// Headers scoped to a single connection
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Credentials attached to an authenticated request by the gate
#[derive(Debug, Clone)]
pub struct Identity {
    pub token: String,
    pub claims: BTreeMap<String, String>,
}

impl Identity {
    pub fn from_auth_info(info: &AuthInfo, forward: ForwardToken) -> Self {
        let token = match forward {
            ForwardToken::IdToken => info.id_token.clone(),
            ForwardToken::AccessToken => info
                .access_token
                .clone()
                .unwrap_or_else(|| info.id_token.clone()),
        };
        Self {
            token,
            claims: info.claims.clone(),
        }
    }
}

/// Forwards requests to the configured upstream
pub struct ReverseProxy {
    http: reqwest::Client,
    upstream: Url,
    token_header: HeaderName,
    forward_token: ForwardToken,
    identity_headers: Vec<(String, HeaderName)>,
    max_body_size: usize,
}

impl ReverseProxy {
    pub fn new(config: &UpstreamConfig, max_body_size: usize) -> Result<Self> {
        let upstream =
            Url::parse(&config.url).map_err(|e| Error::Config(format!("upstream.url: {e}")))?;
        let token_header = HeaderName::from_bytes(config.token_header.as_bytes())
            .map_err(|e| Error::Config(format!("upstream.token_header: {e}")))?;
        let identity_headers = config
            .identity_headers
            .iter()
            .map(|mapping| {
                HeaderName::from_bytes(mapping.header.as_bytes())
                    .map(|name| (mapping.claim.clone(), name))
                    .map_err(|e| {
                        Error::Config(format!("upstream.identity_headers {}: {e}", mapping.header))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build upstream client: {e}")))?;

        Ok(Self {
            http,
            upstream,
            token_header,
            forward_token: config.forward_token,
            identity_headers,
            max_body_size,
        })
    }

    pub fn forward_token(&self) -> ForwardToken {
        self.forward_token
    }

    /// Claim names copied into identity headers
    pub fn forwarded_claims(&self) -> Vec<String> {
        self.identity_headers
            .iter()
            .map(|(claim, _)| claim.clone())
            .collect()
    }

    /// Rewrite inbound headers for the upstream hop.
    ///
    /// Client-supplied credential and identity headers are always removed, so
    /// the upstream only ever sees values set here.
    pub fn direct(&self, headers: &mut HeaderMap, identity: Option<&Identity>) {
        strip_hop_by_hop(headers);
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);
        headers.remove(&self.token_header);
        for (_, header) in &self.identity_headers {
            headers.remove(header);
        }

        let Some(identity) = identity else {
            return;
        };
        match HeaderValue::from_str(&format!("Bearer {}", identity.token)) {
            Ok(value) => {
                headers.insert(self.token_header.clone(), value);
            }
            Err(e) => warn!(error = %e, "Token is not a valid header value, not forwarded"),
        }
        for (claim, header) in &self.identity_headers {
            let Some(value) = identity.claims.get(claim) else {
                continue;
            };
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(header.clone(), value);
                }
                Err(_) => debug!(claim = %claim, "Claim is not a valid header value, skipped"),
            }
        }
    }

    /// Upstream URL for an inbound request URI
    pub fn target_url(&self, uri: &Uri) -> Url {
        let mut url = self.upstream.clone();
        let base = self.upstream.path().trim_end_matches('/');
        url.set_path(&format!("{base}{}", uri.path()));
        url.set_query(uri.query());
        url
    }

    pub async fn forward(
        &self,
        request: Request,
        identity: Option<&Identity>,
    ) -> std::result::Result<Response, GateError> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, self.max_body_size)
            .await
            .map_err(|e| GateError::MalformedRequest(format!("request body: {e}")))?;

        let url = self.target_url(&parts.uri);
        let mut headers = parts.headers;
        let host = headers.get(HOST).cloned();
        self.direct(&mut headers, identity);
        if let Some(host) = host {
            headers.insert(X_FORWARDED_HOST, host);
        }

        debug!(method = %parts.method, url = %url, authenticated = identity.is_some(), "Forwarding");
        let upstream = self
            .http
            .request(parts.method, url.as_str())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Upstream request failed");
                GateError::UpstreamUnavailable(e.to_string())
            })?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Remove hop-by-hop headers, including any named in `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    for name in listed {
        headers.remove(&name);
    }
}

/// Fallback handler: forward whatever reached it, with the gate's identity if any
pub async fn forward_handler(State(state): State<Arc<AppState>>, mut request: Request) -> Response {
    let identity = request.extensions_mut().remove::<Identity>();
    match state.proxy.forward(request, identity.as_ref()).await {
        Ok(response) => response,
        Err(e) => state.reject(&e),
    }
}
