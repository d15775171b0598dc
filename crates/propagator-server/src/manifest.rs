//! Startup manifest: namespaces, ConfigMaps and propagations loaded into the
//! store before the controller starts.

use std::path::Path;

use anyhow::Context;
use propagator_core::{ConfigMap, ConfigMapPropagation, Namespace};
use propagator_storage::{ObjectStore, StorageError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    #[serde(default)]
    pub config_maps: Vec<ConfigMap>,
    #[serde(default)]
    pub propagations: Vec<ConfigMapPropagation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    /// Objects that already existed and were left untouched.
    pub skipped: usize,
}

pub fn load_manifest(path: impl AsRef<Path>) -> anyhow::Result<Manifest> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    let manifest = serde_json::from_str(&raw)
        .with_context(|| format!("parsing manifest {}", path.display()))?;
    Ok(manifest)
}

/// Creates namespaces first, then ConfigMaps, then propagations.
pub async fn apply_manifest(
    store: &dyn ObjectStore,
    manifest: &Manifest,
) -> Result<ApplySummary, StorageError> {
    let mut summary = ApplySummary::default();

    for ns in &manifest.namespaces {
        tally(&mut summary, store.create_namespace(ns).await.map(|_| ()))?;
    }
    for cm in &manifest.config_maps {
        tally(&mut summary, store.create_config_map(cm).await.map(|_| ()))?;
    }
    for p in &manifest.propagations {
        let mut p = p.clone();
        // Status is owned by the reconciler.
        p.status = Default::default();
        tally(&mut summary, store.create_propagation(&p).await.map(|_| ()))?;
    }

    tracing::info!(
        created = summary.created,
        skipped = summary.skipped,
        "bootstrap manifest applied"
    );
    Ok(summary)
}

fn tally(summary: &mut ApplySummary, result: Result<(), StorageError>) -> Result<(), StorageError> {
    match result {
        Ok(()) => summary.created += 1,
        Err(e) if e.is_already_exists() => summary.skipped += 1,
        Err(e) => return Err(e),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use propagator_db_memory::InMemoryStore;
    use std::io::Write;

    const MANIFEST: &str = r#"{
        "namespaces": [
            {"metadata": {"name": "team-a", "labels": {"env": "prod"}}},
            {"metadata": {"name": "team-b"}}
        ],
        "configMaps": [
            {"metadata": {"namespace": "team-a", "name": "app-config"}, "data": {"k1": "v1"}}
        ],
        "propagations": [
            {
                "metadata": {"namespace": "team-a", "name": "shared"},
                "spec": {"source": {"name": "app-config", "namespace": "team-a"}, "targets": [{"namespace": "team-b"}]}
            }
        ]
    }"#;

    #[tokio::test]
    async fn loads_and_applies_in_dependency_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();
        let manifest = load_manifest(file.path()).unwrap();
        assert_eq!(manifest.namespaces.len(), 2);

        let store = InMemoryStore::new();
        let summary = apply_manifest(&store, &manifest).await.unwrap();
        assert_eq!(summary, ApplySummary { created: 4, skipped: 0 });

        let cm = store.get_config_map("team-a", "app-config").await.unwrap().unwrap();
        assert_eq!(cm.payload.data["k1"], "v1");
        assert!(store.get_propagation("team-a", "shared").await.unwrap().is_some());

        let again = apply_manifest(&store, &manifest).await.unwrap();
        assert_eq!(again, ApplySummary { created: 0, skipped: 4 });
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let err = load_manifest("/nonexistent/manifest.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/manifest.json"));
    }
}
