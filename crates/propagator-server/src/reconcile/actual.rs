//! Current-target discovery.

use propagator_core::propagation::OWNER_LABEL;
use propagator_core::{ConfigMapPropagation, Selector, TargetKey};
use propagator_storage::ObjectStore;

use super::error::ReconcileError;

/// Lists every ConfigMap carrying this propagation's ownership label.
pub async fn discover_current(
    store: &dyn ObjectStore,
    propagation: &ConfigMapPropagation,
) -> Result<Vec<TargetKey>, ReconcileError> {
    let selector = Selector::label_equals(OWNER_LABEL, propagation.owner_key());
    let owned = store
        .list_config_maps(None, &selector)
        .await
        .map_err(ReconcileError::ListTargets)?;

    Ok(owned
        .into_iter()
        .map(|cm| TargetKey::new(cm.metadata.namespace, cm.metadata.name))
        .collect())
}
