use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::config::Config;

use super::ClusterRecord;

/// Read access to the registered cluster records.
pub trait ClusterStore: Send + Sync + 'static {
    /// Looks up the cluster with the given `id`.
    ///
    /// Returns `Ok(None)` if no such cluster is registered.
    fn get(&self, id: &str) -> Result<Option<ClusterRecord>>;
}

/// A [`ClusterStore`] backed by a fixed set of records from the configuration.
#[derive(Debug, Default)]
pub struct StaticClusterStore {
    clusters: HashMap<String, ClusterRecord>,
}

impl StaticClusterStore {
    pub fn new(records: impl IntoIterator<Item = ClusterRecord>) -> Self {
        let clusters = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self { clusters }
    }

    /// Collects the inline cluster records and those in `clusters_file`.
    ///
    /// Records from the file take precedence over inline records with the same `id`. Fails if
    /// two of the resulting clusters share a `uuid`, or if any `uuid` is nil.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut records = config.clusters.clone();
        if let Some(path) = &config.clusters_file {
            records.extend(read_clusters_file(path)?);
        }

        let store = Self::new(records);
        store.check_identities()?;

        tracing::info!("Loaded {} cluster records", store.len());
        Ok(store)
    }

    /// Handlers are cached by `uuid`, so every cluster needs a distinct one.
    fn check_identities(&self) -> Result<()> {
        let mut seen = HashMap::with_capacity(self.clusters.len());
        for record in self.clusters.values() {
            if record.uuid.is_nil() {
                bail!("cluster `{}` has a nil uuid", record.id);
            }
            if let Some(other) = seen.insert(record.uuid, &record.id) {
                bail!(
                    "clusters `{}` and `{}` share uuid {}",
                    other,
                    record.id,
                    record.uuid
                );
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

impl ClusterStore for StaticClusterStore {
    fn get(&self, id: &str) -> Result<Option<ClusterRecord>> {
        Ok(self.clusters.get(id).cloned())
    }
}

fn read_clusters_file(path: &Path) -> Result<Vec<ClusterRecord>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read clusters file {}", path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse clusters file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use uuid::Uuid;

    use super::*;

    fn record(id: &str) -> ClusterRecord {
        ClusterRecord {
            id: id.to_owned(),
            uuid: Uuid::new_v4(),
            ..Default::default()
        }
    }

    #[test]
    fn test_lookup() {
        let store = StaticClusterStore::new([record("c-1"), record("c-2")]);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("c-1").unwrap().unwrap().id, "c-1");
        assert!(store.get("c-3").unwrap().is_none());
    }

    #[test]
    fn test_clusters_file_overrides_inline() {
        let dir = kubegate_test::tempdir();
        let path = dir.path().join("clusters.yml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "- id: c-1\n  status:\n    api_endpoint: https://10.0.0.1:6443"
        )
        .unwrap();

        let config = Config {
            clusters: vec![record("c-1"), record("c-2")],
            clusters_file: Some(path),
            ..Default::default()
        };
        let store = StaticClusterStore::from_config(&config).unwrap();

        assert_eq!(store.len(), 2);
        let c1 = store.get("c-1").unwrap().unwrap();
        assert_eq!(c1.status.api_endpoint, "https://10.0.0.1:6443");
        assert!(store.get("c-2").unwrap().is_some());
    }

    #[test]
    fn test_records_without_uuid_are_distinct() {
        let yaml = r#"
            clusters:
              - id: c-1
              - id: c-2
        "#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let store = StaticClusterStore::from_config(&config).unwrap();

        let c1 = store.get("c-1").unwrap().unwrap();
        let c2 = store.get("c-2").unwrap().unwrap();
        assert!(!c1.uuid.is_nil());
        assert!(!c2.uuid.is_nil());
        assert_ne!(c1.uuid, c2.uuid);
    }

    #[test]
    fn test_shared_uuid_rejected() {
        let mut c2 = record("c-2");
        let c1 = record("c-1");
        c2.uuid = c1.uuid;

        let config = Config {
            clusters: vec![c1, c2],
            ..Default::default()
        };
        assert!(StaticClusterStore::from_config(&config).is_err());
    }

    #[test]
    fn test_nil_uuid_rejected() {
        let yaml = r#"
            clusters:
              - id: c-1
                uuid: 00000000-0000-0000-0000-000000000000
        "#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(StaticClusterStore::from_config(&config).is_err());
    }

    #[test]
    fn test_missing_clusters_file() {
        let config = Config {
            clusters_file: Some("/does/not/exist.yml".into()),
            ..Default::default()
        };
        assert!(StaticClusterStore::from_config(&config).is_err());
    }
}
