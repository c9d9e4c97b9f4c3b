use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum_server::Handle;

use kubegate_service::config::Config;
use kubegate_service::metric;
use kubegate_service::services::SharedServices;

use crate::endpoints;

/// Starts the HTTP server based on the loaded config and blocks until it has shut down.
///
/// On `ctrl-c`, the server stops accepting connections and waits for in-flight requests for at
/// most the upstream request timeout. All cluster handlers are torn down afterwards.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("kubegate-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    web_pool.block_on(async move {
        let services = Arc::new(
            SharedServices::new(config).context("failed to create HTTP service state")?,
        );
        let socket = services.config.bind.parse::<SocketAddr>()?;

        let handle = Handle::new();
        tokio::spawn(shutdown_on_signal(
            handle.clone(),
            services.config.upstream.request_timeout,
        ));

        tracing::info!("Starting HTTP server on {}", socket);
        axum_server::bind(socket)
            .handle(handle)
            .serve(endpoints::create_app(Arc::clone(&services)).into_make_service())
            .await?;

        services.shutdown().await;
        anyhow::Ok(())
    })?;

    tracing::info!("System shutdown complete");
    Ok(())
}

async fn shutdown_on_signal(handle: Handle, timeout: Duration) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            error = &error as &dyn std::error::Error,
            "Failed to listen for the shutdown signal",
        );
        return;
    }

    tracing::info!("Shutting down, waiting for in-flight requests");
    handle.graceful_shutdown(Some(timeout));
}
