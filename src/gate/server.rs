//! Proxy server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::AppState;
use super::router::create_router;
use crate::config::Config;
use crate::oidc::jwks::spawn_refresher;
use crate::oidc::nonce::spawn_sweeper;
use crate::oidc::{InMemoryNonceStore, JwksKeyResolver, KeyResolver, NonceStore};
use crate::session::{InMemorySessionStore, SessionStore, spawn_reaper};
use crate::{Error, Result};

/// Authenticating reverse proxy server
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
    keys: Arc<JwksKeyResolver>,
    nonces: Arc<dyn NonceStore>,
    sessions: Arc<dyn SessionStore>,
}

impl Gateway {
    /// Fetch signing keys and wire up the stores.
    ///
    /// Fails when the JWKS endpoint is unreachable or serves no usable key.
    pub async fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.oidc.http_timeout)
            .build()?;
        let keys = Arc::new(JwksKeyResolver::fetch(&config.oidc.jwks_url, http).await?);
        info!(keys = keys.len(), url = %config.oidc.jwks_url, "Signing keys loaded");

        let nonces: Arc<dyn NonceStore> = Arc::new(InMemoryNonceStore::new(config.nonce.lifetime));
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let state = AppState::new(
            &config,
            Arc::clone(&keys) as Arc<dyn KeyResolver>,
            Arc::clone(&nonces),
            Arc::clone(&sessions),
        )?;

        Ok(Self {
            config,
            state: Arc::new(state),
            keys,
            nonces,
            sessions,
        })
    }

    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Serve until SIGINT/SIGTERM, then stop background tasks.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let tasks = vec![
            spawn_sweeper(
                Arc::clone(&self.nonces),
                self.config.nonce.sweep_interval,
                shutdown_tx.subscribe(),
            ),
            spawn_reaper(
                Arc::clone(&self.sessions),
                self.config.session.reap_interval,
                shutdown_tx.subscribe(),
            ),
            spawn_refresher(
                Arc::clone(&self.keys),
                self.config.oidc.jwks_refresh_interval,
                shutdown_tx.subscribe(),
            ),
        ];

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(
            upstream = %self.config.upstream.url,
            login = %self.config.gate.login_path,
            callback = %self.config.gate.callback_path,
            "Proxy ready"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        // Serving may also end without a signal
        let _ = shutdown_tx.send(());
        let drained = tokio::time::timeout(
            self.config.server.shutdown_timeout,
            futures::future::join_all(tasks),
        )
        .await;
        if drained.is_err() {
            warn!("Background tasks did not stop within the shutdown timeout");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
