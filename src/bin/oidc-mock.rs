use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use oidc_mock::{AppState, Config, router};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "oidc-mock",
    version,
    about = "Mock OAuth 2.0 / OpenID Connect provider for client integration testing"
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:9800")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("oidc_mock=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid AUTH_* configuration")?;
    info!(
        scopes = %config.default_scope(),
        grants = %config.allowed_grant_types.join(","),
        require_pkce = config.require_pkce,
        "starting mock OIDC provider"
    );

    let state = AppState::new(config);
    let reaper = state.store.spawn_reaper();

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    info!("listening on http://{}", cli.bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    reaper.abort();
    Ok(())
}
