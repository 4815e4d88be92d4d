//! Configuration management

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use jsonwebtoken::Algorithm;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Environment variable prefix; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "AUTHPROXY_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Env files loaded into the process environment before `${VAR}` expansion
    pub env_files: Vec<String>,
    /// Listener settings
    pub server: ServerConfig,
    /// Relying-party registration with the identity provider
    pub oidc: OidcConfig,
    /// Login nonce bookkeeping
    pub nonce: NonceConfig,
    /// Session cookie and storage
    pub session: SessionConfig,
    /// Route classification and login flow
    pub gate: GateConfig,
    /// Proxied upstream
    pub upstream: UpstreamConfig,
    /// Custom HTML error pages by status code
    pub error_pages: HashMap<u16, PathBuf>,
}

impl Config {
    /// Load configuration from file and environment, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;
        config.apply_defaults();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                match dirs::home_dir() {
                    Some(home) => path_str.replacen('~', &home.display().to_string(), 1),
                    None => path_str.clone(),
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` in the values that usually carry secrets
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.oidc.client_id = expand_string(&re, &self.oidc.client_id);
        if let Some(secret) = self.oidc.client_secret.as_mut() {
            *secret = expand_string(&re, secret);
        }
        for value in self.oidc.extra_auth_params.values_mut() {
            *value = expand_string(&re, value);
        }
        self.upstream.url = expand_string(&re, &self.upstream.url);
        Ok(())
    }

    /// Fill in values derived from other settings.
    pub fn apply_defaults(&mut self) {
        if self.oidc.audiences.is_empty() && !self.oidc.client_id.is_empty() {
            self.oidc.audiences.push(self.oidc.client_id.clone());
        }
    }

    /// Check the settings the proxy cannot run without.
    pub fn validate(&self) -> Result<()> {
        let oidc = &self.oidc;
        if oidc.client_id.trim().is_empty() {
            return Err(Error::Config("oidc.client_id must be set".into()));
        }
        parse_url("oidc.auth_url", &oidc.auth_url)?;
        parse_url("oidc.jwks_url", &oidc.jwks_url)?;
        if let Some(token_url) = &oidc.token_url {
            parse_url("oidc.token_url", token_url)?;
        }
        if let Some(redirect_url) = &oidc.redirect_url {
            parse_url("oidc.redirect_url", redirect_url)?;
        }
        if oidc.issuers.is_empty() {
            return Err(Error::Config(
                "oidc.issuers must list at least one issuer".into(),
            ));
        }
        if oidc.audiences.is_empty() {
            return Err(Error::Config(
                "oidc.audiences must list at least one audience".into(),
            ));
        }
        if !is_asymmetric(oidc.signing_algorithm) {
            return Err(Error::Config(format!(
                "oidc.signing_algorithm {:?} is not an asymmetric algorithm",
                oidc.signing_algorithm
            )));
        }

        // tokio::time::interval panics on a zero period
        for (name, duration) in [
            ("oidc.jwks_refresh_interval", oidc.jwks_refresh_interval),
            ("nonce.lifetime", self.nonce.lifetime),
            ("nonce.sweep_interval", self.nonce.sweep_interval),
            ("session.reap_interval", self.session.reap_interval),
        ] {
            if duration.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        if self.session.cookie_name.trim().is_empty() {
            return Err(Error::Config("session.cookie_name must be set".into()));
        }
        if self.session.same_site == SameSitePolicy::None && !self.session.secure {
            return Err(Error::Config(
                "session.same_site = none requires session.secure = true".into(),
            ));
        }

        let gate = &self.gate;
        for (name, path) in [
            ("gate.login_path", &gate.login_path),
            ("gate.callback_path", &gate.callback_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!("{name} must start with '/'")));
            }
        }
        if gate.login_path == gate.callback_path {
            return Err(Error::Config(
                "gate.login_path and gate.callback_path must differ".into(),
            ));
        }
        if let Some(bad) = gate
            .public_paths
            .iter()
            .chain(&gate.protected_paths)
            .find(|p| !p.starts_with('/'))
        {
            return Err(Error::Config(format!(
                "route prefix {bad:?} must start with '/'"
            )));
        }
        Regex::new(&gate.referer_pattern)
            .map_err(|e| Error::Config(format!("gate.referer_pattern: {e}")))?;

        parse_url("upstream.url", &self.upstream.url)?;
        if self.upstream.token_header.trim().is_empty() {
            return Err(Error::Config("upstream.token_header must be set".into()));
        }

        Ok(())
    }
}

fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

fn parse_url(name: &str, value: &str) -> Result<Url> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{name} must be set")));
    }
    Url::parse(value).map_err(|e| Error::Config(format!("{name}: {e}")))
}

/// Whether `alg` verifies with a public key
pub fn is_asymmetric(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum request body size (bytes), for callbacks and proxied requests
    pub max_body_size: usize,
    /// How long background tasks get to stop after the listener closes
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_size: 10 * 1024 * 1024,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// How the client authenticates at the token endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenAuthMethod {
    /// HTTP Basic with `client_id:client_secret`
    #[default]
    ClientSecretBasic,
    /// Credentials in the form body
    ClientSecretPost,
}

/// Identity provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Authorization endpoint the browser is sent to
    pub auth_url: String,
    /// Token endpoint; code exchange and refresh are disabled without it
    pub token_url: Option<String>,
    pub jwks_url: String,
    /// `redirect_uri` sent with the authorization request
    pub redirect_url: Option<String>,
    /// Requested scopes; `openid` is always included
    pub scopes: Vec<String>,
    /// Extra authorization request parameters (`prompt`, `login_hint`, ...)
    pub extra_auth_params: BTreeMap<String, String>,
    /// Accepted `iss` values
    pub issuers: Vec<String>,
    /// Accepted `aud` values; defaults to `[client_id]`
    pub audiences: Vec<String>,
    /// The single signing algorithm accepted on ID tokens
    pub signing_algorithm: Algorithm,
    /// Timeout for token endpoint and JWKS requests
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub jwks_refresh_interval: Duration,
    pub token_auth_method: TokenAuthMethod,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            auth_url: String::new(),
            token_url: None,
            jwks_url: String::new(),
            redirect_url: None,
            scopes: vec!["openid".to_string()],
            extra_auth_params: BTreeMap::new(),
            issuers: Vec::new(),
            audiences: Vec::new(),
            signing_algorithm: Algorithm::RS256,
            http_timeout: Duration::from_secs(5),
            jwks_refresh_interval: Duration::from_secs(3600),
            token_auth_method: TokenAuthMethod::default(),
        }
    }
}

/// Nonce store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// How long an issued nonce stays redeemable
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,
    /// How often expired nonces are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// `SameSite` attribute of the session cookie
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    /// Required for the cross-site `form_post` callback to carry the cookie
    #[default]
    None,
}

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    /// Idle lifetime of a session record
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub secure: bool,
    pub same_site: SameSitePolicy,
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "authproxy".to_string(),
            ttl: Duration::from_secs(24 * 60 * 60),
            secure: true,
            same_site: SameSitePolicy::default(),
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// What an unauthenticated request to a protected route receives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnauthenticatedAction {
    /// 401 "Please Login." page with a login link
    #[default]
    Page,
    /// 302 to the login path, remembering where the user was going
    Redirect,
}

/// Route classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub login_path: String,
    pub callback_path: String,
    /// Prefixes proxied without authentication
    pub public_paths: Vec<String>,
    /// Prefixes proxied behind the gate; everything else is 404
    pub protected_paths: Vec<String>,
    /// Referer values matching this are remembered as the post-login target
    pub referer_pattern: String,
    pub on_unauthenticated: UnauthenticatedAction,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            callback_path: "/cb".to_string(),
            public_paths: vec!["/public".to_string()],
            protected_paths: vec!["/".to_string()],
            referer_pattern: r"^https?://localhost".to_string(),
            on_unauthenticated: UnauthenticatedAction::default(),
        }
    }
}

impl GateConfig {
    /// Whether `path` falls under a public prefix
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| prefix_matches(p, path))
    }

    /// Whether `path` falls under a protected prefix
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_paths.iter().any(|p| prefix_matches(p, path))
    }
}

/// Segment-aware prefix match: `/public` covers `/public/a` but not `/publicity`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Which token is forwarded upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardToken {
    #[default]
    IdToken,
    /// Falls back to the ID token when no access token was issued
    AccessToken,
}

/// Claim-to-header mapping applied to authenticated requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityHeader {
    pub claim: String,
    pub header: String,
}

/// Upstream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Header carrying `Bearer <token>`
    pub token_header: String,
    pub forward_token: ForwardToken,
    pub identity_headers: Vec<IdentityHeader>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
            token_header: "authorization".to_string(),
            forward_token: ForwardToken::default(),
            identity_headers: vec![IdentityHeader {
                claim: "preferred_username".to_string(),
                header: "X-Username".to_string(),
            }],
        }
    }
}

/// Duration (de)serialization as `"30s"`, `"5m"`, `"1h"` or `"100ms"`
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>().map(|h| Duration::from_secs(h * 3600))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.oidc.client_id = "proxy".into();
        config.oidc.auth_url = "https://idp.example.com/authorize".into();
        config.oidc.jwks_url = "https://idp.example.com/jwks".into();
        config.oidc.issuers = vec!["https://idp.example.com".into()];
        config.upstream.url = "http://127.0.0.1:9000".into();
        config.apply_defaults();
        config
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.nonce.lifetime, Duration::from_secs(60));
        assert_eq!(config.session.cookie_name, "authproxy");
        assert_eq!(config.session.same_site, SameSitePolicy::None);
        assert_eq!(config.gate.login_path, "/login");
        assert_eq!(config.gate.callback_path, "/cb");
        assert_eq!(config.gate.referer_pattern, r"^https?://localhost");
        assert_eq!(config.gate.on_unauthenticated, UnauthenticatedAction::Page);
        assert_eq!(config.oidc.http_timeout, Duration::from_secs(5));
        assert_eq!(config.oidc.signing_algorithm, Algorithm::RS256);
        assert_eq!(config.upstream.identity_headers[0].header, "X-Username");
    }

    #[test]
    fn audiences_default_to_client_id() {
        let config = valid_config();
        assert_eq!(config.oidc.audiences, vec!["proxy".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn symmetric_algorithm_is_rejected() {
        let mut config = valid_config();
        config.oidc.signing_algorithm = Algorithm::HS256;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("asymmetric"));
    }

    #[test]
    fn missing_issuers_are_rejected() {
        let mut config = valid_config();
        config.oidc.issuers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_referer_pattern_is_rejected() {
        let mut config = valid_config();
        config.gate.referer_pattern = "^(unclosed".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("referer_pattern"));
    }

    #[test]
    fn same_site_none_requires_secure_cookie() {
        let mut config = valid_config();
        config.session.secure = false;
        assert!(config.validate().is_err());
        config.session.same_site = SameSitePolicy::Lax;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_durations_are_rejected() {
        let cases: [(&str, fn(&mut Config)); 4] = [
            ("oidc.jwks_refresh_interval", |c: &mut Config| c.oidc.jwks_refresh_interval = Duration::ZERO),
            ("nonce.lifetime", |c: &mut Config| c.nonce.lifetime = Duration::ZERO),
            ("nonce.sweep_interval", |c: &mut Config| c.nonce.sweep_interval = Duration::ZERO),
            ("session.reap_interval", |c: &mut Config| c.session.reap_interval = Duration::ZERO),
        ];
        for (name, zero) in cases {
            // GIVEN: an otherwise valid config with one duration set to zero
            let mut config = valid_config();
            zero(&mut config);

            // WHEN
            let err = config.validate().unwrap_err();

            // THEN: the offending setting is named
            assert!(err.to_string().contains(name), "{name}: {err}");
        }
    }

    #[test]
    fn zero_sweep_interval_from_yaml_is_rejected() {
        let mut config = valid_config();
        config.nonce = serde_yaml::from_str("lifetime: 1m\nsweep_interval: 0s\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("nonce.sweep_interval"));
    }

    #[test]
    fn colliding_login_and_callback_paths_are_rejected() {
        let mut config = valid_config();
        config.gate.callback_path = "/login".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn route_prefixes_are_segment_aware() {
        let gate = GateConfig::default();
        assert!(gate.is_public("/public"));
        assert!(gate.is_public("/public/app.css"));
        assert!(!gate.is_public("/publicity"));
        assert!(gate.is_protected("/anything"));

        let gate = GateConfig {
            protected_paths: vec!["/app/".into()],
            ..GateConfig::default()
        };
        assert!(gate.is_protected("/app"));
        assert!(gate.is_protected("/app/x"));
        assert!(!gate.is_protected("/other"));
    }

    #[test]
    fn yaml_config_deserializes() {
        let yaml = r#"
oidc:
  client_id: proxy
  auth_url: https://idp.example.com/authorize
  jwks_url: https://idp.example.com/jwks
  issuers: [https://idp.example.com]
  signing_algorithm: ES256
  http_timeout: 250ms
nonce:
  lifetime: 2m
session:
  cookie_name: demo
  same_site: lax
gate:
  on_unauthenticated: redirect
upstream:
  url: http://127.0.0.1:9000
  forward_token: access_token
  identity_headers:
    - claim: email
      header: X-Email
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.oidc.signing_algorithm, Algorithm::ES256);
        assert_eq!(config.oidc.http_timeout, Duration::from_millis(250));
        assert_eq!(config.nonce.lifetime, Duration::from_secs(120));
        assert_eq!(config.session.cookie_name, "demo");
        assert_eq!(config.session.same_site, SameSitePolicy::Lax);
        assert_eq!(
            config.gate.on_unauthenticated,
            UnauthenticatedAction::Redirect
        );
        assert_eq!(config.upstream.forward_token, ForwardToken::AccessToken);
        assert_eq!(config.upstream.identity_headers[0].claim, "email");
        // untouched sections keep their defaults
        assert_eq!(config.gate.login_path, "/login");
    }

    #[test]
    fn duration_parsing_handles_all_units() {
        assert_eq!(
            humantime_serde::parse("100ms").unwrap(),
            Duration::from_millis(100)
        );
        assert_eq!(humantime_serde::parse("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(humantime_serde::parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(humantime_serde::parse("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(humantime_serde::parse("7").unwrap(), Duration::from_secs(7));
        assert!(humantime_serde::parse("soon").is_err());
    }

    #[test]
    fn load_reads_yaml_file_and_expands_env_file_values() {
        // GIVEN: an env file defining the client secret and a config referencing it
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("idp.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "AUTHPROXY_TEST_SECRET_A=from-env-file").unwrap();

        let config_path = dir.path().join("authproxy.yaml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
env_files: ["{}"]
oidc:
  client_id: proxy
  client_secret: "${{AUTHPROXY_TEST_SECRET_A}}"
  auth_url: https://idp.example.com/authorize
  jwks_url: https://idp.example.com/jwks
  issuers: [https://idp.example.com]
upstream:
  url: "${{AUTHPROXY_TEST_UNSET_UPSTREAM:-http://127.0.0.1:9000}}"
"#,
            env_path.display()
        )
        .unwrap();

        // WHEN
        let config = Config::load(Some(&config_path)).unwrap();

        // THEN
        assert_eq!(config.oidc.client_secret.as_deref(), Some("from-env-file"));
        assert_eq!(config.upstream.url, "http://127.0.0.1:9000");
        assert_eq!(config.oidc.audiences, vec!["proxy".to_string()]);
    }

    #[test]
    fn load_fails_for_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/authproxy.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }
}
