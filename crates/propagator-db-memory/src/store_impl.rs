//! `ObjectStore` implementation for `InMemoryStore`.

use async_trait::async_trait;
use propagator_core::resource::Resource;
use propagator_core::{
    ConfigMap, ConfigMapPropagation, Namespace, PropagationStatus, Selector, now_utc,
};
use propagator_storage::{ObjectStore, StorageError};
use serde_json::Value;

use crate::faults::StoreOp;
use crate::store::{InMemoryStore, make_key};

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, StorageError> {
        self.read(&self.namespaces, "", name)
    }

    async fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Namespace>, StorageError> {
        self.list(&self.namespaces, None, selector)
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, StorageError> {
        self.insert_new(&self.namespaces, namespace, |_| {}).await
    }

    async fn update_namespace(&self, namespace: &Namespace) -> Result<Namespace, StorageError> {
        self.replace(&self.namespaces, namespace, |_, _| {}).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<Namespace, StorageError> {
        self.check_fault(StoreOp::Delete, Namespace::KIND, Some(name))?;

        let _write = self.write_lock.lock().await;
        let namespaces = self.namespaces.pin();
        let removed = namespaces
            .remove(name)
            .cloned()
            .ok_or_else(|| StorageError::not_found(Namespace::KIND, name))?;

        let config_maps = self.config_maps.pin();
        let doomed: Vec<String> = config_maps
            .iter()
            .filter(|(_, cm)| cm.metadata.namespace == name)
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            config_maps.remove(&key);
        }

        let propagation_keys: Vec<String> = self
            .propagations
            .pin()
            .iter()
            .filter(|(_, p)| p.metadata.namespace == name)
            .map(|(key, _)| key.clone())
            .collect();
        for key in propagation_keys {
            self.mark_or_remove_propagation(&key)?;
        }

        tracing::debug!(namespace = %name, "Deleted namespace and its contents");
        Ok(removed)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StorageError> {
        self.read(&self.config_maps, namespace, name)
    }

    async fn list_config_maps(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<ConfigMap>, StorageError> {
        self.list(&self.config_maps, namespace, selector)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StorageError> {
        self.insert_new(&self.config_maps, config_map, |_| {}).await
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StorageError> {
        self.replace(&self.config_maps, config_map, |_, _| {}).await
    }

    async fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<ConfigMap, StorageError> {
        self.remove(&self.config_maps, namespace, name, resource_version)
            .await
    }

    async fn get_propagation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMapPropagation>, StorageError> {
        self.read(&self.propagations, namespace, name)
    }

    async fn list_propagations(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<ConfigMapPropagation>, StorageError> {
        self.list(&self.propagations, namespace, selector)
    }

    async fn create_propagation(
        &self,
        propagation: &ConfigMapPropagation,
    ) -> Result<ConfigMapPropagation, StorageError> {
        self.insert_new(&self.propagations, propagation, |stored| {
            stored.metadata.generation = 1;
            stored.status = PropagationStatus::default();
        })
        .await
    }

    async fn update_propagation(
        &self,
        propagation: &ConfigMapPropagation,
    ) -> Result<ConfigMapPropagation, StorageError> {
        self.replace(&self.propagations, propagation, |current, next| {
            next.status = current.status.clone();
            if next.spec != current.spec {
                next.metadata.generation = current.metadata.generation + 1;
            }
        })
        .await
    }

    async fn delete_propagation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMapPropagation, StorageError> {
        self.delete_finalizable(namespace, name).await
    }

    async fn patch_propagation_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<ConfigMapPropagation, StorageError> {
        let key = make_key(namespace, name);
        self.check_fault(StoreOp::PatchStatus, ConfigMapPropagation::KIND, Some(&key))?;

        let _write = self.write_lock.lock().await;
        let guard = self.propagations.pin();
        let mut current = guard
            .get(&key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(ConfigMapPropagation::KIND, &key))?;

        let mut status = serde_json::to_value(&current.status)?;
        json_patch::merge(&mut status, patch);
        current.status = serde_json::from_value(status)
            .map_err(|e| StorageError::invalid_object(format!("status patch for {key}: {e}")))?;
        current.metadata.resource_version = self.next_version();

        guard.insert(key, current.clone());
        Ok(current)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
