// crates/server/src/main.rs
//! Autofollow server binary.
//!
//! Resolves configuration, installs tracing, then serves the control API and
//! progress stream until Ctrl-C. A running job is cancelled and joined before
//! the process exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use autofollow_core::Credentials;
use autofollow_server::{create_app, AppState, ServerConfig};
use autofollow_webdriver::WebDriverFactory;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load().context("reading configuration")?;
    let _log_guard = autofollow_observability::init_tracing(&config.log)?;

    let site = config.site_profile().context("loading site profile")?;
    let credentials = Credentials::from_env().context("reading sign-in credentials")?;
    let factory = WebDriverFactory::new(&config.webdriver_url, config.headless)
        .context("configuring WebDriver client")?;

    tracing::info!(
        webdriver = %config.webdriver_url,
        headless = config.headless,
        site = %site.start_url,
        "driver configured"
    );

    let state = AppState::new(Arc::new(factory), site, credentials, config.keepalive);
    let app = create_app(Arc::clone(&state));

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Autofollow server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    state.jobs.shutdown().await;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
