use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::info;

use crate::{authorize, config::Config, oidc, store::CredentialStore, token};

/// Shared handler state: the immutable configuration and the credential
/// store. Cheap to clone; handlers read the config by reference and never
/// mutate it.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: CredentialStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = CredentialStore::new(config.session_ttl_seconds);
        Self {
            config: Arc::new(config),
            store,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/.well-known/openid-configuration", get(oidc::discovery))
        .route("/.well-known/jwks.json", get(oidc::jwks))
        .route(
            "/oauth2/authorize",
            get(authorize::authorize_form).post(authorize::authorize_submit),
        )
        .route("/oauth2/token", post(token::token))
        .route("/oauth2/userinfo", get(oidc::userinfo))
        .with_state(state)
}

/// Builder for embedding the mock provider in tests.
#[derive(Debug, Clone, Default)]
pub struct MockServerBuilder {
    config: Config,
}

impl MockServerBuilder {
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Spawns the server on a random loopback port.
    pub async fn spawn_on_free_port(self) -> Result<MockServer> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .context("failed to bind mock OIDC listener")?;
        let addr = listener
            .local_addr()
            .context("failed to determine listener address")?;
        self.spawn_with_listener(listener, addr).await
    }

    async fn spawn_with_listener(self, listener: TcpListener, addr: SocketAddr) -> Result<MockServer> {
        let base_url = format!("http://{addr}");
        let state = AppState::new(self.config);
        let reaper = state.store.spawn_reaper();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = router(state.clone());
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                eprintln!("oidc-mock server error: {err:?}");
            }
        });

        info!(%base_url, "mock OIDC provider listening");

        Ok(MockServer {
            base_url,
            state,
            shutdown: Some(shutdown_tx),
            _task: task,
            reaper,
        })
    }
}

/// Running instance of the mock provider. Shuts down when dropped, so
/// parallel tests can each hold an isolated instance.
pub struct MockServer {
    base_url: String,
    state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
    _task: JoinHandle<()>,
    reaper: JoinHandle<()>,
}

impl MockServer {
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::default()
    }

    /// Convenience helper to spawn with the default configuration.
    pub async fn spawn_on_free_port() -> Result<Self> {
        MockServerBuilder::default().spawn_on_free_port().await
    }

    /// Returns the base URL (http://host:port).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// The backing credential store, for test assertions and fixture setup.
    pub fn store(&self) -> &CredentialStore {
        &self.state.store
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.reaper.abort();
    }
}
