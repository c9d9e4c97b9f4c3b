use std::fs;

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use url::Url;

use crate::caching::HandlerError;
use crate::config::LocalClusterConfig;

use super::ClusterStore;

/// Everything needed to talk to a cluster's API server.
#[derive(Clone, PartialEq, Eq)]
pub struct RestConfig {
    /// The API server URL, including any path prefix.
    pub endpoint: Url,
    /// Token sent as `Authorization: Bearer` with every request.
    pub bearer_token: String,
    /// PEM encoded CA certificate to trust, in addition to the system roots.
    ///
    /// Empty if only the system roots should be trusted.
    pub ca_data: Vec<u8>,
}

impl std::fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("bearer_token", &"<redacted>")
            .field("ca_data", &self.ca_data.len())
            .finish()
    }
}

impl RestConfig {
    /// Creates the configuration used for `internal` clusters.
    pub fn from_local(local: &LocalClusterConfig) -> Result<Self> {
        let ca_data = match &local.ca_cert_path {
            Some(path) => fs::read(path).with_context(|| {
                format!("failed to read local CA certificate {}", path.display())
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            endpoint: local.endpoint.clone(),
            bearer_token: local.bearer_token.clone(),
            ca_data,
        })
    }
}

/// Resolves the connection settings for the cluster with the given `id`.
///
/// Internal clusters use the `local` configuration. Other clusters are [`HandlerError::NotReady`]
/// until their endpoint, CA certificate and token have all been reported.
pub fn resolve_rest_config(
    store: &dyn ClusterStore,
    local: Option<&RestConfig>,
    id: &str,
) -> Result<RestConfig, HandlerError> {
    let cluster = store
        .get(id)
        .map_err(|err| HandlerError::resolution(format!("{err:#}")))?
        .ok_or(HandlerError::NotFound)?;

    if cluster.internal {
        return local.cloned().ok_or(HandlerError::NotReady);
    }

    let status = &cluster.status;
    if status.api_endpoint.is_empty()
        || status.ca_cert.is_empty()
        || status.service_account_token.is_empty()
    {
        return Err(HandlerError::NotReady);
    }

    let endpoint = Url::parse(&status.api_endpoint)
        .map_err(|err| HandlerError::Resolution(format!("invalid API endpoint: {err}")))?;
    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(HandlerError::Resolution(format!(
            "unsupported API endpoint scheme `{}`",
            endpoint.scheme()
        )));
    }

    let ca_data = STANDARD
        .decode(status.ca_cert.trim())
        .map_err(|err| HandlerError::Resolution(format!("invalid CA certificate: {err}")))?;

    Ok(RestConfig {
        endpoint,
        bearer_token: status.service_account_token.clone(),
        ca_data,
    })
}
