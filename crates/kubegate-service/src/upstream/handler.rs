use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Certificate, Client, Method, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::caching::HandlerError;
use crate::clusters::RestConfig;
use crate::config::UpstreamConfig;

/// Whether a header may be passed through between the caller and the cluster.
///
/// Hop-by-hop headers only apply to a single connection, and the framing headers are recomputed
/// by the client and server respectively.
fn is_forwardable(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

/// A request to be forwarded to a cluster.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// The path relative to the cluster's API endpoint.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The response of a cluster to a forwarded request.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Serves requests for a single downstream cluster.
///
/// The handler owns an HTTP client that trusts the cluster's CA and authenticates with its
/// service account token. While alive, it periodically probes the cluster's `/version` endpoint.
/// All of this stops once the lifetime context passed to [`UpstreamHandler::start`] is cancelled.
pub struct UpstreamHandler {
    cluster_id: String,
    endpoint: Url,
    client: Client,
    context: CancellationToken,
    healthy: Arc<AtomicBool>,
}

impl fmt::Debug for UpstreamHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamHandler")
            .field("cluster_id", &self.cluster_id)
            .field("endpoint", &self.endpoint.as_str())
            .field("healthy", &self.is_healthy())
            .field("cancelled", &self.context.is_cancelled())
            .finish()
    }
}

impl UpstreamHandler {
    /// Builds the handler and spawns its health probe into `context`.
    pub fn start(
        cluster_id: &str,
        rest: RestConfig,
        config: &UpstreamConfig,
        context: CancellationToken,
    ) -> Result<Self, HandlerError> {
        let mut default_headers = HeaderMap::new();
        if !rest.bearer_token.is_empty() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", rest.bearer_token))
                .map_err(|_| HandlerError::Construction("invalid bearer token".into()))?;
            value.set_sensitive(true);
            default_headers.insert(header::AUTHORIZATION, value);
        }

        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .default_headers(default_headers);
        if !rest.ca_data.is_empty() {
            let certificate = Certificate::from_pem(&rest.ca_data).map_err(|err| {
                HandlerError::Construction(format!("invalid CA certificate: {err}"))
            })?;
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder.build().map_err(HandlerError::construction)?;

        let handler = Self {
            cluster_id: cluster_id.to_owned(),
            endpoint: rest.endpoint,
            client,
            context,
            // optimistic until the first probe says otherwise
            healthy: Arc::new(AtomicBool::new(true)),
        };

        tokio::spawn(probe_health(
            handler.cluster_id.clone(),
            handler.client.clone(),
            handler.url_for("/version", None),
            config.health_check_interval,
            handler.context.clone(),
            Arc::clone(&handler.healthy),
        ));

        Ok(handler)
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Whether the most recent health probe succeeded.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Whether the lifetime context of this handler has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.context.is_cancelled()
    }

    /// Joins `path` and `query` onto the cluster's API endpoint.
    pub fn url_for(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        let full_path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&full_path);
        url.set_query(query);
        url
    }

    /// Forwards `request` to the cluster and returns its response.
    ///
    /// The caller's `Authorization` and hop-by-hop headers are dropped; the handler authenticates
    /// with the cluster's own token instead.
    pub async fn forward(&self, request: UpstreamRequest) -> Result<UpstreamResponse> {
        if self.context.is_cancelled() {
            bail!("handler for cluster {} has been shut down", self.cluster_id);
        }

        let url = self.url_for(&request.path, request.query.as_deref());
        tracing::trace!(cluster = %self.cluster_id, "Forwarding {} {}", request.method, url);

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            if is_forwardable(name) && *name != header::AUTHORIZATION {
                headers.append(name.clone(), value.clone());
            }
        }

        let send = self
            .client
            .request(request.method, url)
            .headers(headers)
            .body(request.body)
            .send();

        let response = tokio::select! {
            _ = self.context.cancelled() => {
                bail!("handler for cluster {} was shut down mid-request", self.cluster_id)
            }
            response = send => response?,
        };

        let status = response.status();
        let mut headers = HeaderMap::new();
        for (name, value) in response.headers() {
            if is_forwardable(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        let body = response.bytes().await?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

async fn probe_health(
    cluster_id: String,
    client: Client,
    url: Url,
    interval: Duration,
    context: CancellationToken,
    healthy: Arc<AtomicBool>,
) {
    // a zero period would make `interval` panic
    let mut ticks = tokio::time::interval(interval.max(Duration::from_millis(100)));
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let probe = async {
            ticks.tick().await;
            client.get(url.clone()).send().await
        };

        let result = tokio::select! {
            _ = context.cancelled() => break,
            result = probe => result,
        };

        let is_healthy = match result {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(
                    error = &err as &dyn std::error::Error,
                    cluster = %cluster_id,
                    "Health probe failed",
                );
                false
            }
        };

        if healthy.swap(is_healthy, Ordering::Relaxed) != is_healthy {
            if is_healthy {
                tracing::info!(cluster = %cluster_id, "Cluster became healthy");
            } else {
                tracing::warn!(cluster = %cluster_id, "Cluster became unhealthy");
            }
        }
    }

    tracing::trace!(cluster = %cluster_id, "Stopped health probe");
}
