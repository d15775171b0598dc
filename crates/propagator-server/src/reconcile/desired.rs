//! Desired-target resolution.

use std::collections::BTreeSet;

use propagator_core::{ConfigMapPropagation, TargetKey};
use propagator_storage::ObjectStore;

use super::error::ReconcileError;

/// Computes the deduplicated set of target locations for `propagation`.
///
/// Explicit targets come first, in spec order, followed by every namespace
/// matched by the selector. Any failure aborts resolution; a partial set is
/// never returned.
pub async fn resolve_desired(
    store: &dyn ObjectStore,
    propagation: &ConfigMapPropagation,
    system_namespaces: &[String],
) -> Result<Vec<TargetKey>, ReconcileError> {
    let spec = &propagation.spec;
    let source_name = spec.source.name.as_str();
    let source = TargetKey::new(spec.source.namespace(), source_name);
    let excluded = |namespace: &str| {
        !spec.allow_system_namespaces && system_namespaces.iter().any(|ns| ns == namespace)
    };

    let mut seen = BTreeSet::new();
    let mut targets = Vec::new();
    let mut push = |key: TargetKey| {
        // The source itself is never a target.
        if key == source {
            tracing::debug!(target_key = %key, "skipping target that points at the source");
            return;
        }
        if seen.insert(key.clone()) {
            targets.push(key);
        }
    };

    for target in &spec.targets {
        if excluded(&target.namespace) {
            continue;
        }
        let name = target.name.as_deref().unwrap_or(source_name);
        push(TargetKey::new(&target.namespace, name));
    }

    if let Some(selector) = &spec.namespace_selector {
        let selector = selector.compile().map_err(ReconcileError::InvalidSelector)?;
        let namespaces = store
            .list_namespaces(&selector)
            .await
            .map_err(ReconcileError::ScopeList)?;
        for namespace in namespaces {
            if excluded(&namespace.metadata.name) {
                continue;
            }
            push(TargetKey::new(namespace.metadata.name, source_name));
        }
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::testing::{add_namespace, propagation, seeded_store, system_namespaces};
    use propagator_core::{LabelSelector, LabelSelectorRequirement, TargetRef};
    use propagator_db_memory::StoreOp;
    use propagator_storage::StorageError;

    #[tokio::test]
    async fn explicit_targets_default_to_source_name_and_dedupe() {
        let store = seeded_store(&["team-a", "team-b"]).await;
        let mut p = propagation("app-config");
        p.spec.targets = vec![
            TargetRef::new("team-a"),
            TargetRef::named("team-b", "renamed"),
            TargetRef::new("team-a"),
            TargetRef::named("team-a", "app-config"),
        ];

        let desired = resolve_desired(&store, &p, &system_namespaces()).await.unwrap();
        assert_eq!(
            desired,
            vec![
                TargetKey::new("team-a", "app-config"),
                TargetKey::new("team-b", "renamed"),
            ]
        );
    }

    #[tokio::test]
    async fn selector_adds_matching_namespaces() {
        let store = seeded_store(&[]).await;
        add_namespace(&store, "team-a", &[("env", "prod")]).await;
        add_namespace(&store, "team-b", &[("env", "prod")]).await;
        add_namespace(&store, "team-c", &[("env", "dev")]).await;
        let mut p = propagation("app-config");
        p.spec.targets = vec![TargetRef::new("team-b")];
        p.spec.namespace_selector = Some(LabelSelector {
            match_labels: [("env".to_string(), "prod".to_string())].into(),
            ..Default::default()
        });

        let desired = resolve_desired(&store, &p, &system_namespaces()).await.unwrap();
        assert_eq!(
            desired,
            vec![
                TargetKey::new("team-b", "app-config"),
                TargetKey::new("team-a", "app-config"),
            ]
        );
    }

    #[tokio::test]
    async fn empty_selector_matches_every_namespace_except_source_location() {
        let store = seeded_store(&["team-a"]).await;
        let mut p = propagation("app-config");
        p.spec.namespace_selector = Some(LabelSelector::default());

        let desired = resolve_desired(&store, &p, &system_namespaces()).await.unwrap();
        assert_eq!(desired, vec![TargetKey::new("team-a", "app-config")]);
    }

    #[tokio::test]
    async fn system_namespaces_are_skipped_when_disallowed() {
        let store = seeded_store(&["kube-system", "team-a"]).await;
        let mut p = propagation("app-config");
        p.spec.targets = vec![TargetRef::new("kube-system"), TargetRef::new("team-a")];
        p.spec.namespace_selector = Some(LabelSelector::default());
        p.spec.allow_system_namespaces = false;

        let desired = resolve_desired(&store, &p, &system_namespaces()).await.unwrap();
        assert_eq!(desired, vec![TargetKey::new("team-a", "app-config")]);

        p.spec.allow_system_namespaces = true;
        let desired = resolve_desired(&store, &p, &system_namespaces()).await.unwrap();
        assert!(desired.contains(&TargetKey::new("kube-system", "app-config")));
    }

    #[tokio::test]
    async fn invalid_selector_aborts() {
        let store = seeded_store(&["team-a"]).await;
        let mut p = propagation("app-config");
        p.spec.targets = vec![TargetRef::new("team-a")];
        p.spec.namespace_selector = Some(LabelSelector {
            match_expressions: vec![LabelSelectorRequirement {
                key: "env".into(),
                operator: "Near".into(),
                values: vec![],
            }],
            ..Default::default()
        });

        let err = resolve_desired(&store, &p, &system_namespaces())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidSelector(_)));
    }

    #[tokio::test]
    async fn namespace_list_failure_aborts() {
        let store = seeded_store(&["team-a"]).await;
        store.faults().fail(
            StoreOp::List,
            "Namespace",
            None,
            StorageError::internal("etcd unavailable"),
        );
        let mut p = propagation("app-config");
        p.spec.namespace_selector = Some(LabelSelector::default());

        let err = resolve_desired(&store, &p, &system_namespaces())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::ScopeList(_)));
    }
}
