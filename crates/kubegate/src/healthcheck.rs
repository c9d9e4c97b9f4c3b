use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;

use kubegate_service::config::Config;

/// Asks a running kubegate for its health and prints `OK` or `ERROR`.
///
/// Connecting is bounded by the configured `upstream.connect_timeout`, and the whole request by
/// `timeout` seconds. `addr` defaults to the configured bind address.
pub fn healthcheck(config: Config, addr: Option<SocketAddr>, timeout: u64) -> Result<()> {
    let addr = match addr {
        Some(addr) => addr,
        None => config
            .bind
            .parse()
            .with_context(|| format!("invalid bind address `{}`", config.bind))?,
    };

    let result = check(&config, addr, Duration::from_secs(timeout));
    println!("{}", if result.is_ok() { "OK" } else { "ERROR" });
    result
}

fn check(config: &Config, addr: SocketAddr, timeout: Duration) -> Result<()> {
    let client = Client::builder()
        .connect_timeout(config.upstream.connect_timeout.min(timeout))
        .timeout(timeout)
        .build()?;

    let url = format!("http://{addr}/healthcheck");
    tracing::debug!("Sending request to: {url}");

    let response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to check kubegate ({addr}) health"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("kubegate ({addr}) is unhealthy. Status: {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use kubegate_test::Server;

    use super::*;

    /// Serves `router` from a runtime of its own, so the blocking client can run on this thread.
    fn serve(router: Router) -> (tokio::runtime::Runtime, Server) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let server = {
            let _guard = runtime.enter();
            Server::with_router(router)
        };
        (runtime, server)
    }

    #[test]
    fn test_healthy() {
        kubegate_test::setup();
        let router = Router::new().route("/healthcheck", get(crate::endpoints::healthcheck));
        let (_runtime, server) = serve(router);

        assert!(healthcheck(Config::default(), Some(server.addr()), 5).is_ok());
    }

    #[test]
    fn test_unhealthy_status() {
        kubegate_test::setup();
        let router = Router::new().route(
            "/healthcheck",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let (_runtime, server) = serve(router);

        let err = healthcheck(Config::default(), Some(server.addr()), 5).unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_bind_address_default() {
        kubegate_test::setup();
        let router = Router::new().route("/healthcheck", get(crate::endpoints::healthcheck));
        let (_runtime, server) = serve(router);

        let config = Config {
            bind: server.addr().to_string(),
            ..Config::default()
        };
        assert!(healthcheck(config, None, 5).is_ok());
    }
}
