use std::sync::Arc;

use futures::future::{self, BoxFuture};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::caching::{HandlerCache, HandlerDriver, HandlerError};
use crate::clusters::{ClusterRef, ClusterStore, RestConfig, resolve_rest_config};
use crate::config::UpstreamConfig;

use super::UpstreamHandler;

/// The cache of [`UpstreamHandler`]s, keyed by cluster UUID.
pub type ClusterHandlers = HandlerCache<ClusterHandlerDriver>;

/// Builds [`UpstreamHandler`]s from the records in a [`ClusterStore`].
pub struct ClusterHandlerDriver {
    store: Arc<dyn ClusterStore>,
    local: Option<RestConfig>,
    config: UpstreamConfig,
}

impl ClusterHandlerDriver {
    pub fn new(store: Arc<dyn ClusterStore>, local: Option<RestConfig>, config: UpstreamConfig) -> Self {
        Self {
            store,
            local,
            config,
        }
    }
}

impl HandlerDriver for ClusterHandlerDriver {
    type Arg = ClusterRef;
    type Key = Uuid;
    type Config = RestConfig;
    type Handler = UpstreamHandler;

    fn cache_key(&self, arg: &ClusterRef) -> Uuid {
        // A re-created cluster keeps its id, but must not reuse the previous handler.
        arg.uuid
    }

    fn resolve<'a>(
        &'a self,
        arg: &'a ClusterRef,
    ) -> BoxFuture<'a, Result<RestConfig, HandlerError>> {
        let result = resolve_rest_config(self.store.as_ref(), self.local.as_ref(), &arg.id);
        Box::pin(future::ready(result))
    }

    fn build<'a>(
        &'a self,
        config: RestConfig,
        arg: &'a ClusterRef,
        context: CancellationToken,
    ) -> BoxFuture<'a, Result<UpstreamHandler, HandlerError>> {
        Box::pin(async move { UpstreamHandler::start(&arg.id, config, &self.config, context) })
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
    use reqwest::{Method, StatusCode};

    use crate::clusters::{ClusterRecord, ClusterStatus, StaticClusterStore};
    use crate::config::HandlerCacheConfig;
    use crate::upstream::UpstreamRequest;

    use super::*;

    fn cluster(id: &str, endpoint: &str) -> ClusterRecord {
        ClusterRecord {
            id: id.to_owned(),
            uuid: Uuid::new_v4(),
            internal: false,
            status: ClusterStatus {
                api_endpoint: endpoint.to_owned(),
                ca_cert: STANDARD.encode(kubegate_test::read_fixture("ca.pem")),
                service_account_token: "cluster-token".to_owned(),
            },
        }
    }

    fn handlers(records: Vec<ClusterRecord>) -> ClusterHandlers {
        let store = Arc::new(StaticClusterStore::new(records));
        let driver = ClusterHandlerDriver::new(store, None, UpstreamConfig::default());
        HandlerCache::new(driver, HandlerCacheConfig::default())
    }

    #[tokio::test]
    async fn test_forward_to_cluster() {
        kubegate_test::setup();
        let server = kubegate_test::Server::upstream();

        let record = cluster("c-1", server.url("/proxy").as_str());
        let handlers = handlers(vec![record.clone()]);

        let handler = handlers.get(&record.cluster_ref()).await.unwrap();
        assert_eq!(handler.cluster_id(), "c-1");

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer caller-token"));
        headers.insert("x-custom", HeaderValue::from_static("forwarded"));

        let response = handler
            .forward(UpstreamRequest {
                method: Method::POST,
                path: "api/v1/namespaces".to_owned(),
                query: Some("limit=1".to_owned()),
                headers,
                body: Bytes::from_static(b"{}"),
            })
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let echo: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(
            echo,
            serde_json::json!({
                "method": "POST",
                "path": "/proxy/api/v1/namespaces",
                "query": "limit=1",
                "authorization": "Bearer cluster-token",
                "x-custom": "forwarded",
                "body": "{}",
            })
        );

        // the handler is shared until it is evicted
        let again = handlers.get(&record.cluster_ref()).await.unwrap();
        assert!(Arc::ptr_eq(&handler, &again));
    }

    #[tokio::test]
    async fn test_recreated_cluster_gets_new_handler() {
        kubegate_test::setup();
        let server = kubegate_test::Server::upstream();

        let old = cluster("c-1", server.url("/").as_str());
        let mut new = old.clone();
        new.uuid = Uuid::new_v4();
        let handlers = handlers(vec![new.clone()]);

        let first = handlers.get(&old.cluster_ref()).await.unwrap();
        let second = handlers.get(&new.cluster_ref()).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(handlers.contains(&old.uuid));
        assert!(handlers.contains(&new.uuid));
    }

    #[tokio::test]
    async fn test_records_without_uuid_get_own_handlers() {
        kubegate_test::setup();
        let server = kubegate_test::Server::upstream();

        let ca_cert = STANDARD.encode(kubegate_test::read_fixture("ca.pem"));
        let yaml = format!(
            r#"
            - id: c-1
              status:
                api_endpoint: {endpoint}
                ca_cert: {ca_cert}
                service_account_token: token-1
            - id: c-2
              status:
                api_endpoint: {endpoint}
                ca_cert: {ca_cert}
                service_account_token: token-2
            "#,
            endpoint = server.url("/"),
        );
        let records: Vec<ClusterRecord> = serde_yaml::from_str(&yaml).unwrap();
        let handlers = handlers(records.clone());

        let first = handlers.get(&records[0].cluster_ref()).await.unwrap();
        let second = handlers.get(&records[1].cluster_ref()).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.cluster_id(), "c-1");
        assert_eq!(second.cluster_id(), "c-2");
    }

    #[tokio::test]
    async fn test_invalid_certificate() {
        kubegate_test::setup();

        let mut record = cluster("c-1", "https://10.0.0.1:6443");
        record.status.ca_cert = STANDARD.encode(b"not a certificate");
        let handlers = handlers(vec![record.clone()]);

        assert!(handlers.get(&record.cluster_ref()).await.is_none());
        assert!(!handlers.contains(&record.uuid));
    }

    #[tokio::test]
    async fn test_shutdown_stops_forwarding() {
        kubegate_test::setup();
        let server = kubegate_test::Server::upstream();

        let record = cluster("c-1", server.url("/").as_str());
        let handlers = handlers(vec![record.clone()]);

        let handler = handlers.get(&record.cluster_ref()).await.unwrap();
        handlers.shutdown().await;
        assert!(handler.is_cancelled());

        let request = UpstreamRequest {
            method: Method::GET,
            path: "/version".to_owned(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(handler.forward(request).await.is_err());
    }
}
