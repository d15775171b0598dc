//! The object store contract.

use async_trait::async_trait;
use propagator_core::{ConfigMap, ConfigMapPropagation, Namespace, Selector};
use serde_json::Value;

use crate::error::StorageError;

/// Typed access to the three kinds of objects the propagator works with.
///
/// Lists are returned sorted by `namespace/name`. Updates ignore `status`
/// on propagations; status is only written through
/// [`ObjectStore::patch_propagation_status`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    // Namespaces

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, StorageError>;

    async fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Namespace>, StorageError>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, StorageError>;

    async fn update_namespace(&self, namespace: &Namespace) -> Result<Namespace, StorageError>;

    /// Removes the namespace together with every object inside it.
    async fn delete_namespace(&self, name: &str) -> Result<Namespace, StorageError>;

    // ConfigMaps

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StorageError>;

    /// Lists ConfigMaps in `namespace`, or across all namespaces when `None`.
    async fn list_config_maps(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<ConfigMap>, StorageError>;

    /// Fails with `NotFound` when the namespace does not exist and with
    /// `AlreadyExists` when the name is taken.
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StorageError>;

    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StorageError>;

    /// Deletes the ConfigMap, optionally guarded by a resource version
    /// precondition. Returns the deleted object.
    async fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<ConfigMap, StorageError>;

    // ConfigMapPropagations

    async fn get_propagation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMapPropagation>, StorageError>;

    async fn list_propagations(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<ConfigMapPropagation>, StorageError>;

    async fn create_propagation(
        &self,
        propagation: &ConfigMapPropagation,
    ) -> Result<ConfigMapPropagation, StorageError>;

    /// Writes metadata and spec. `generation` advances only when the spec
    /// changed. When a deleting object loses its last finalizer it is removed
    /// and the returned value carries an empty finalizer list.
    async fn update_propagation(
        &self,
        propagation: &ConfigMapPropagation,
    ) -> Result<ConfigMapPropagation, StorageError>;

    /// Marks the propagation for deletion when it has finalizers, removes it
    /// otherwise. The returned value tells the two apart by its finalizers.
    async fn delete_propagation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMapPropagation, StorageError>;

    /// Applies an RFC 7386 JSON merge patch to the status sub-object.
    async fn patch_propagation_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<ConfigMapPropagation, StorageError>;

    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test that ObjectStore is object-safe
    fn _assert_store_object_safe(_: &dyn ObjectStore) {}
}
