//! Single-target mutations.
//!
//! Every operation re-fetches the target before writing and writes back with
//! the fetched `resourceVersion` as a precondition, so a concurrent edit
//! surfaces as [`TargetError::StoreConflict`] instead of being overwritten.

use std::fmt;

use propagator_core::propagation::{
    MANAGED_BY_LABEL, MANAGED_BY_VALUE, OWNER_LABEL, OWNER_UID_ANNOTATION,
};
use propagator_core::{ConfigMap, ConfigMapPropagation, ObjectMeta, Payload, PropagationPolicy, TargetKey};
use propagator_storage::ObjectStore;

use super::error::TargetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetOperation {
    Create,
    Update,
    Delete,
    Orphan,
}

impl TargetOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Orphan => "orphan",
        }
    }
}

impl fmt::Display for TargetOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    Created,
    /// An existing ConfigMap was taken over. `changed` is false when it
    /// already carried every marker.
    Adopted { changed: bool },
    Updated,
    Unchanged,
    /// Nothing to do: creation disabled, or the target belongs to someone else.
    Skipped,
    Deleted,
    Orphaned,
    AlreadyGone,
}

impl TargetOutcome {
    /// Whether the outcome involved a write to the store.
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            Self::Created
                | Self::Adopted { changed: true }
                | Self::Updated
                | Self::Deleted
                | Self::Orphaned
        )
    }
}

/// Applies mutations to targets on behalf of one propagation.
pub struct TargetMutator<'a> {
    store: &'a dyn ObjectStore,
    propagation: &'a ConfigMapPropagation,
    owner: String,
}

impl<'a> TargetMutator<'a> {
    pub fn new(store: &'a dyn ObjectStore, propagation: &'a ConfigMapPropagation) -> Self {
        Self {
            store,
            propagation,
            owner: propagation.owner_key(),
        }
    }

    pub async fn apply(
        &self,
        operation: TargetOperation,
        target: &TargetKey,
    ) -> Result<TargetOutcome, TargetError> {
        match operation {
            TargetOperation::Create => self.create_or_adopt(target).await,
            TargetOperation::Update => self.update_if_needed(target).await,
            TargetOperation::Delete => self.delete(target).await,
            TargetOperation::Orphan => self.orphan(target).await,
        }
    }

    /// Adopts an existing ConfigMap at `target` or creates one from the
    /// source payload. Adoption only touches markers, never the payload.
    pub async fn create_or_adopt(&self, target: &TargetKey) -> Result<TargetOutcome, TargetError> {
        if let Some(mut existing) = self.fetch(target).await? {
            let changed = self.apply_markers(&mut existing.metadata);
            if changed {
                self.store
                    .update_config_map(&existing)
                    .await
                    .map_err(|e| TargetError::from_store(target, e))?;
            }
            return Ok(TargetOutcome::Adopted { changed });
        }

        if !self.propagation.spec.create_if_missing {
            return Ok(TargetOutcome::Skipped);
        }

        let payload = self.source_payload(target).await?;
        let mut config_map = ConfigMap::new(&target.namespace, &target.name);
        config_map.payload = payload;
        self.apply_markers(&mut config_map.metadata);

        self.store
            .create_config_map(&config_map)
            .await
            .map_err(|e| TargetError::from_store(target, e))?;
        Ok(TargetOutcome::Created)
    }

    /// Brings the target payload in line with the source under the
    /// propagation policy. A target that vanished is not an error.
    pub async fn update_if_needed(&self, target: &TargetKey) -> Result<TargetOutcome, TargetError> {
        let Some(mut existing) = self.fetch(target).await? else {
            return Ok(TargetOutcome::AlreadyGone);
        };
        let source = self.source_payload(target).await?;

        let desired = match self.propagation.spec.propagation_policy {
            PropagationPolicy::Overwrite => source,
            PropagationPolicy::Merge => existing.payload.merged_with(&source),
        };
        let markers_changed = self.apply_markers(&mut existing.metadata);
        if desired == existing.payload && !markers_changed {
            return Ok(TargetOutcome::Unchanged);
        }

        existing.payload = desired;
        match self.store.update_config_map(&existing).await {
            Ok(_) => Ok(TargetOutcome::Updated),
            Err(e) if e.is_not_found() => Ok(TargetOutcome::AlreadyGone),
            Err(e) => Err(TargetError::from_store(target, e)),
        }
    }

    /// Deletes the target if this propagation still owns it.
    pub async fn delete(&self, target: &TargetKey) -> Result<TargetOutcome, TargetError> {
        let Some(existing) = self.fetch(target).await? else {
            return Ok(TargetOutcome::AlreadyGone);
        };
        if !self.owns(&existing.metadata) {
            return Ok(TargetOutcome::Skipped);
        }

        let result = self
            .store
            .delete_config_map(
                &target.namespace,
                &target.name,
                Some(existing.metadata.resource_version.as_str()),
            )
            .await;
        match result {
            Ok(_) => Ok(TargetOutcome::Deleted),
            Err(e) if e.is_not_found() => Ok(TargetOutcome::AlreadyGone),
            Err(e) => Err(TargetError::from_store(target, e)),
        }
    }

    /// Detaches the target, leaving its payload in place. Markers are only
    /// removed when they name this propagation.
    pub async fn orphan(&self, target: &TargetKey) -> Result<TargetOutcome, TargetError> {
        let Some(mut existing) = self.fetch(target).await? else {
            return Ok(TargetOutcome::AlreadyGone);
        };
        if !self.owns(&existing.metadata) {
            return Ok(TargetOutcome::Skipped);
        }

        let meta = &mut existing.metadata;
        meta.labels.remove(OWNER_LABEL);
        meta.labels.remove(MANAGED_BY_LABEL);
        meta.annotations.remove(OWNER_UID_ANNOTATION);

        match self.store.update_config_map(&existing).await {
            Ok(_) => Ok(TargetOutcome::Orphaned),
            Err(e) if e.is_not_found() => Ok(TargetOutcome::AlreadyGone),
            Err(e) => Err(TargetError::from_store(target, e)),
        }
    }

    fn owns(&self, meta: &ObjectMeta) -> bool {
        meta.label(OWNER_LABEL) == Some(self.owner.as_str())
            && meta
                .annotation(OWNER_UID_ANNOTATION)
                .is_none_or(|uid| uid == self.propagation.metadata.uid)
    }

    /// Sets ownership and identity markers; returns whether anything changed.
    fn apply_markers(&self, meta: &mut ObjectMeta) -> bool {
        let mut changed = set_entry(&mut meta.labels, OWNER_LABEL, &self.owner);
        changed |= set_entry(&mut meta.labels, MANAGED_BY_LABEL, MANAGED_BY_VALUE);
        if !self.propagation.metadata.uid.is_empty() {
            changed |= set_entry(
                &mut meta.annotations,
                OWNER_UID_ANNOTATION,
                &self.propagation.metadata.uid,
            );
        }
        changed
    }

    async fn fetch(&self, target: &TargetKey) -> Result<Option<ConfigMap>, TargetError> {
        self.store
            .get_config_map(&target.namespace, &target.name)
            .await
            .map_err(|e| TargetError::from_store(target, e))
    }

    async fn source_payload(&self, target: &TargetKey) -> Result<Payload, TargetError> {
        let source = &self.propagation.spec.source;
        let found = self
            .store
            .get_config_map(source.namespace(), &source.name)
            .await
            .map_err(|e| TargetError::from_store(target, e))?;
        found
            .map(|cm| cm.payload)
            .ok_or_else(|| TargetError::SourceNotFound {
                source_key: format!("{}/{}", source.namespace(), source.name),
            })
    }
}

fn set_entry(
    map: &mut std::collections::BTreeMap<String, String>,
    key: &str,
    value: &str,
) -> bool {
    if map.get(key).map(String::as_str) == Some(value) {
        return false;
    }
    map.insert(key.to_string(), value.to_string());
    true
}
