//! Downstream cluster records and the resolution of their connection settings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod rest_config;
mod store;

pub use rest_config::{RestConfig, resolve_rest_config};
pub use store::{ClusterStore, StaticClusterStore};

/// A downstream cluster, as registered with kubegate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterRecord {
    /// The user-facing cluster identifier, used in request paths.
    pub id: String,
    /// Identifies this incarnation of the cluster.
    ///
    /// A cluster that is deleted and re-created under the same `id` gets a new `uuid`. Records
    /// that do not carry one are assigned a random `uuid` when they are loaded.
    #[serde(default = "Uuid::new_v4")]
    pub uuid: Uuid,
    /// Whether this is the cluster kubegate itself is running in.
    pub internal: bool,
    /// Connection details, as reported by the cluster agent.
    pub status: ClusterStatus,
}

/// Connection details of a cluster.
///
/// All fields stay empty until the cluster has been fully provisioned.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterStatus {
    /// URL of the cluster's API server.
    pub api_endpoint: String,
    /// Base64 encoded PEM of the cluster's CA certificate.
    pub ca_cert: String,
    /// The service account token used to authenticate against the cluster.
    pub service_account_token: String,
}

/// A lightweight reference to a cluster, used to look up its handler.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClusterRef {
    pub id: String,
    pub uuid: Uuid,
}

impl ClusterRecord {
    pub fn cluster_ref(&self) -> ClusterRef {
        ClusterRef {
            id: self.id.clone(),
            uuid: self.uuid,
        }
    }
}
