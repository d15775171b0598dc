//! EventedStore - a store wrapper that emits [`ResourceEvent`]s after writes.
//!
//! The controller's watch subscribes to the broadcaster and turns these
//! events into reconcile requests.
//!
//! ```ignore
//! let broadcaster = EventBroadcaster::new_shared();
//! let store = EventedStore::new(InMemoryStore::new(), broadcaster.clone());
//!
//! // emits ResourceEvent::created("ConfigMap", ..)
//! store.create_config_map(&cm).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use propagator_core::events::{EventBroadcaster, ResourceEvent};
use propagator_core::resource::Resource;
use propagator_core::{ConfigMap, ConfigMapPropagation, Namespace, ObjectMeta, Selector};
use serde_json::Value;
use tracing::debug;

use crate::error::StorageError;
use crate::traits::ObjectStore;

/// Events are emitted only after the inner operation succeeded.
pub struct EventedStore<S: ObjectStore> {
    inner: S,
    broadcaster: Arc<EventBroadcaster>,
}

impl<S: ObjectStore> EventedStore<S> {
    pub fn new(inner: S, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self { inner, broadcaster }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    fn emit(&self, event: ResourceEvent) {
        if !self.broadcaster.has_subscribers() {
            return;
        }
        let kind = event.kind.clone();
        let event_type = event.event_type;
        let key = if event.namespace.is_empty() {
            event.name.clone()
        } else {
            format!("{}/{}", event.namespace, event.name)
        };
        let count = self.broadcaster.send_resource(event);
        debug!(
            kind = %kind,
            key = %key,
            event = %event_type,
            subscribers = count,
            "Emitted resource event"
        );
    }

    fn emit_created<R: Resource>(&self, object: &R) {
        self.emit(ResourceEvent::created(R::KIND, object.meta()));
    }

    fn emit_updated<R: Resource>(&self, object: &R) {
        self.emit(ResourceEvent::updated(R::KIND, object.meta()));
    }

    fn emit_deleted_meta(&self, kind: &str, meta: &ObjectMeta) {
        self.emit(ResourceEvent::deleted(kind, meta));
    }

    /// A propagation write either left the object in place or removed it
    /// (no finalizers left while deleting).
    fn emit_propagation_write(&self, propagation: &ConfigMapPropagation) {
        let meta = propagation.meta();
        if meta.is_deleting() && meta.finalizers.is_empty() {
            self.emit_deleted_meta(ConfigMapPropagation::KIND, meta);
        } else {
            self.emit_updated(propagation);
        }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for EventedStore<S> {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, StorageError> {
        self.inner.get_namespace(name).await
    }

    async fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Namespace>, StorageError> {
        self.inner.list_namespaces(selector).await
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, StorageError> {
        let created = self.inner.create_namespace(namespace).await?;
        self.emit_created(&created);
        Ok(created)
    }

    async fn update_namespace(&self, namespace: &Namespace) -> Result<Namespace, StorageError> {
        let updated = self.inner.update_namespace(namespace).await?;
        self.emit_updated(&updated);
        Ok(updated)
    }

    async fn delete_namespace(&self, name: &str) -> Result<Namespace, StorageError> {
        let everything = Selector::everything();
        let config_maps = self.inner.list_config_maps(Some(name), &everything).await?;
        let propagations = self.inner.list_propagations(Some(name), &everything).await?;

        let deleted = self.inner.delete_namespace(name).await?;

        for cm in &config_maps {
            self.emit_deleted_meta(ConfigMap::KIND, cm.meta());
        }
        for propagation in &propagations {
            match self
                .inner
                .get_propagation(name, &propagation.metadata.name)
                .await?
            {
                Some(still_there) => self.emit_updated(&still_there),
                None => self.emit_deleted_meta(ConfigMapPropagation::KIND, propagation.meta()),
            }
        }
        self.emit_deleted_meta(Namespace::KIND, deleted.meta());
        Ok(deleted)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StorageError> {
        self.inner.get_config_map(namespace, name).await
    }

    async fn list_config_maps(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<ConfigMap>, StorageError> {
        self.inner.list_config_maps(namespace, selector).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StorageError> {
        let created = self.inner.create_config_map(config_map).await?;
        self.emit_created(&created);
        Ok(created)
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StorageError> {
        let updated = self.inner.update_config_map(config_map).await?;
        self.emit_updated(&updated);
        Ok(updated)
    }

    async fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<ConfigMap, StorageError> {
        let deleted = self
            .inner
            .delete_config_map(namespace, name, resource_version)
            .await?;
        self.emit_deleted_meta(ConfigMap::KIND, deleted.meta());
        Ok(deleted)
    }

    async fn get_propagation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMapPropagation>, StorageError> {
        self.inner.get_propagation(namespace, name).await
    }

    async fn list_propagations(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<ConfigMapPropagation>, StorageError> {
        self.inner.list_propagations(namespace, selector).await
    }

    async fn create_propagation(
        &self,
        propagation: &ConfigMapPropagation,
    ) -> Result<ConfigMapPropagation, StorageError> {
        let created = self.inner.create_propagation(propagation).await?;
        self.emit_created(&created);
        Ok(created)
    }

    async fn update_propagation(
        &self,
        propagation: &ConfigMapPropagation,
    ) -> Result<ConfigMapPropagation, StorageError> {
        let updated = self.inner.update_propagation(propagation).await?;
        self.emit_propagation_write(&updated);
        Ok(updated)
    }

    async fn delete_propagation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMapPropagation, StorageError> {
        let result = self.inner.delete_propagation(namespace, name).await?;
        self.emit_propagation_write(&result);
        Ok(result)
    }

    async fn patch_propagation_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<ConfigMapPropagation, StorageError> {
        // Status writes are not broadcast.
        self.inner
            .patch_propagation_status(namespace, name, patch)
            .await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
