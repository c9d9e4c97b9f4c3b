use std::sync::Arc;

use anyhow::Context;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Response, StatusCode, Uri};

use kubegate_service::metric;
use kubegate_service::services::SharedServices;
use kubegate_service::upstream::UpstreamRequest;

use super::ResponseError;

async fn forward_to_cluster(
    services: &SharedServices,
    cluster_id: &str,
    request: UpstreamRequest,
) -> Result<Response<Body>, ResponseError> {
    sentry::configure_scope(|scope| {
        scope.set_transaction(Some("ANY /k8s/clusters"));
        scope.set_tag("cluster", cluster_id);
    });

    let record = services
        .clusters
        .get(cluster_id)
        .context("failed to look up cluster")?;
    let Some(record) = record else {
        metric!(counter("requests.proxied") += 1, "status" => "unknown_cluster");
        let err = anyhow::anyhow!("unknown cluster `{cluster_id}`");
        return Err((StatusCode::NOT_FOUND, err).into());
    };

    let Some(handler) = services.handlers.get(&record.cluster_ref()).await else {
        metric!(counter("requests.proxied") += 1, "status" => "unavailable");
        let err = anyhow::anyhow!("cluster `{cluster_id}` is not available");
        return Err((StatusCode::SERVICE_UNAVAILABLE, err).into());
    };

    let response = match handler.forward(request).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(cluster = cluster_id, "Upstream request failed: {err:#}");
            metric!(counter("requests.proxied") += 1, "status" => "upstream_error");
            let err = err.context(format!("failed to forward request to `{cluster_id}`"));
            return Err((StatusCode::BAD_GATEWAY, err).into());
        }
    };

    metric!(counter("requests.proxied") += 1, "status" => "ok");

    let mut builder = Response::builder().status(response.status);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(response.headers);
    }
    Ok(builder.body(Body::from(response.body))?)
}

fn upstream_request(
    method: Method,
    path: String,
    uri: &Uri,
    headers: HeaderMap,
    body: Bytes,
) -> UpstreamRequest {
    UpstreamRequest {
        method,
        path,
        query: uri.query().map(str::to_owned),
        headers,
        body,
    }
}

pub async fn proxy_cluster_root(
    State(services): State<Arc<SharedServices>>,
    Path(cluster_id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<Body>, ResponseError> {
    let request = upstream_request(method, String::new(), &uri, headers, body);
    forward_to_cluster(&services, &cluster_id, request).await
}

pub async fn proxy_cluster_request(
    State(services): State<Arc<SharedServices>>,
    Path((cluster_id, path)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<Body>, ResponseError> {
    let request = upstream_request(method, path, &uri, headers, body);
    forward_to_cluster(&services, &cluster_id, request).await
}
