//! Provides the shared kubegate services and a way to initialize them.
//!
//! [`SharedServices`] initializes the cluster store and the handler cache according to the
//! provided [`Config`]. The services are created once per process and passed to the web server.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::clusters::{ClusterStore, RestConfig, StaticClusterStore};
use crate::config::Config;
use crate::upstream::{ClusterHandlerDriver, ClusterHandlers};

pub struct SharedServices {
    pub config: Config,
    pub clusters: Arc<dyn ClusterStore>,
    pub handlers: Arc<ClusterHandlers>,
}

impl SharedServices {
    pub fn new(config: Config) -> Result<Self> {
        let store = StaticClusterStore::from_config(&config).context("failed to load clusters")?;
        Self::with_store(config, Arc::new(store))
    }

    /// Creates the services on top of an existing cluster store.
    pub fn with_store(config: Config, clusters: Arc<dyn ClusterStore>) -> Result<Self> {
        let local = config
            .local_cluster
            .as_ref()
            .map(RestConfig::from_local)
            .transpose()
            .context("failed to load local cluster configuration")?;

        let driver = ClusterHandlerDriver::new(clusters.clone(), local, config.upstream);
        let handlers = Arc::new(ClusterHandlers::new(driver, config.handlers));

        Ok(Self {
            config,
            clusters,
            handlers,
        })
    }

    /// Tears down all cluster handlers.
    pub async fn shutdown(&self) {
        self.handlers.shutdown().await;
    }
}
