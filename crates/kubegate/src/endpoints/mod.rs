use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

use kubegate_service::metric;
use kubegate_service::services::SharedServices;

mod error;
mod proxy;

pub use error::ResponseError;

use proxy::{proxy_cluster_request, proxy_cluster_root};

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(services: Arc<SharedServices>) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024));
    Router::new()
        .route("/k8s/clusters/:cluster_id", any(proxy_cluster_root))
        .route("/k8s/clusters/:cluster_id/*path", any(proxy_cluster_request))
        .with_state(services)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use kubegate_service::clusters::ClusterRecord;
    use kubegate_service::config::{Config, LocalClusterConfig};
    use kubegate_test::Server;
    use reqwest::{Client, StatusCode, Url};
    use serde_json::{Value, json};
    use uuid::Uuid;

    use super::error::ApiErrorResponse;
    use super::*;

    /// Serves the app with an internal cluster `local` talking to `endpoint`, and a cluster
    /// `pending` that has not been provisioned yet.
    fn kubegate(endpoint: Url) -> Server {
        let config = Config {
            local_cluster: Some(LocalClusterConfig {
                endpoint,
                bearer_token: "local-token".to_owned(),
                ca_cert_path: None,
            }),
            clusters: vec![
                ClusterRecord {
                    id: "local".to_owned(),
                    uuid: Uuid::new_v4(),
                    internal: true,
                    ..Default::default()
                },
                ClusterRecord {
                    id: "pending".to_owned(),
                    uuid: Uuid::new_v4(),
                    ..Default::default()
                },
            ],
            ..Config::default()
        };

        let services = SharedServices::new(config).unwrap();
        Server::with_router(create_app(Arc::new(services)))
    }

    #[tokio::test]
    async fn test_healthcheck() {
        kubegate_test::setup();
        let upstream = Server::upstream();
        let server = kubegate(upstream.url("/"));

        let response = Client::new()
            .get(server.url("/healthcheck"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_proxy_request() {
        kubegate_test::setup();
        let upstream = Server::upstream();
        let server = kubegate(upstream.url("/api-server"));

        let response = Client::new()
            .put(server.url("/k8s/clusters/local/api/v1/pods?watch=1"))
            .bearer_auth("caller-token")
            .header("x-request-id", "abc")
            .body("{\"kind\":\"Pod\"}")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let echo: Value = response.json().await.unwrap();
        assert_eq!(
            echo,
            json!({
                "method": "PUT",
                "path": "/api-server/api/v1/pods",
                "query": "watch=1",
                "authorization": "Bearer local-token",
                "x-request-id": "abc",
                "body": "{\"kind\":\"Pod\"}",
            })
        );
    }

    #[tokio::test]
    async fn test_proxy_cluster_root() {
        kubegate_test::setup();
        let upstream = Server::upstream();
        let server = kubegate(upstream.url("/api-server"));

        let response = Client::new()
            .get(server.url("/k8s/clusters/local"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let echo: Value = response.json().await.unwrap();
        assert_eq!(echo["method"], "GET");
        assert_eq!(echo["path"], "/api-server/");
    }

    #[tokio::test]
    async fn test_unknown_cluster() {
        kubegate_test::setup();
        let upstream = Server::upstream();
        let server = kubegate(upstream.url("/"));

        let response = Client::new()
            .get(server.url("/k8s/clusters/missing/version"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error: ApiErrorResponse = response.json().await.unwrap();
        assert_eq!(error.detail.as_deref(), Some("unknown cluster `missing`"));
    }

    #[tokio::test]
    async fn test_pending_cluster_unavailable() {
        kubegate_test::setup();
        let upstream = Server::upstream();
        let server = kubegate(upstream.url("/"));

        let response = Client::new()
            .get(server.url("/k8s/clusters/pending/version"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_upstream_unreachable() {
        kubegate_test::setup();

        // reserve a port and close it again, so that connections to it are refused
        let closed = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/", closed.local_addr().unwrap());
        drop(closed);

        let server = kubegate(endpoint.parse().unwrap());

        let response = Client::new()
            .get(server.url("/k8s/clusters/local/version"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let error: ApiErrorResponse = response.json().await.unwrap();
        assert_eq!(
            error.detail.as_deref(),
            Some("failed to forward request to `local`")
        );
    }
}
