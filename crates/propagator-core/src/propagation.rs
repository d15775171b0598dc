//! The `ConfigMapPropagation` record and the markers it places on targets.

use crate::duration::serde_duration;
use crate::labels::LabelSelector;
use crate::meta::ObjectMeta;
use crate::resource::Resource;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Finalizer placed on every live propagation.
pub const FINALIZER: &str = "sync.propagators.io/finalizer";
/// Ownership label on targets, value `<namespace>.<name>` of the propagation.
pub const OWNER_LABEL: &str = "sync.propagators.io/owner";
/// Identity annotation on targets, value is the propagation uid.
pub const OWNER_UID_ANNOTATION: &str = "sync.propagators.io/owner-uid";
pub const MANAGED_BY_LABEL: &str = "sync.propagators.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "configmap-propagator";

pub const DEFAULT_SOURCE_NAMESPACE: &str = "default";
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const CONDITION_READY: &str = "Ready";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapPropagation {
    pub metadata: ObjectMeta,
    pub spec: PropagationSpec,
    #[serde(default)]
    pub status: PropagationStatus,
}

impl ConfigMapPropagation {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: PropagationSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: PropagationStatus::default(),
        }
    }

    /// Value of the ownership label this propagation places on its targets.
    pub fn owner_key(&self) -> String {
        owner_key(&self.metadata.namespace, &self.metadata.name)
    }
}

pub fn owner_key(namespace: &str, name: &str) -> String {
    format!("{namespace}.{name}")
}

impl Resource for ConfigMapPropagation {
    const KIND: &'static str = "ConfigMapPropagation";
    const NAMESPACED: bool = true;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationSpec {
    pub source: PropagationSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
    #[serde(default)]
    pub propagation_policy: PropagationPolicy,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default = "default_sync_interval", with = "serde_duration")]
    pub sync_interval: Duration,
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
    #[serde(default = "default_true")]
    pub allow_system_namespaces: bool,
}

fn default_sync_interval() -> Duration {
    DEFAULT_SYNC_INTERVAL
}

fn default_true() -> bool {
    true
}

impl Default for PropagationSpec {
    fn default() -> Self {
        Self {
            source: PropagationSource::default(),
            targets: Vec::new(),
            namespace_selector: None,
            propagation_policy: PropagationPolicy::default(),
            deletion_policy: DeletionPolicy::default(),
            sync_mode: SyncMode::default(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            create_if_missing: true,
            allow_system_namespaces: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl PropagationSource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Source namespace, falling back to `default` when unset.
    pub fn namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_SOURCE_NAMESPACE
        } else {
            &self.namespace
        }
    }
}

/// One explicit entry of `spec.targets`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TargetRef {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: None,
        }
    }

    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationPolicy {
    #[default]
    Merge,
    Overwrite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Orphan,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    CreatedOnce,
    #[default]
    OnChange,
    Periodic,
    /// Any unrecognized value. Never triggers a sync.
    #[serde(other)]
    Unknown,
}

/// Location of a single target ConfigMap.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetKey {
    pub namespace: String,
    pub name: String,
}

impl TargetKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_sync: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets_summary: Option<TargetsSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_statuses: Vec<TargetStatus>,
}

impl PropagationStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_ready(&self) -> bool {
        self.condition(CONDITION_READY)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsSummary {
    pub total: u32,
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
    pub orphaned: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub namespace: String,
    pub name: String,
    pub state: TargetState,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl TargetStatus {
    pub fn key(&self) -> TargetKey {
        TargetKey::new(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetState {
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_defaults() {
        let spec: PropagationSpec = serde_json::from_value(json!({
            "source": {"name": "app-config"}
        }))
        .unwrap();
        assert_eq!(spec.source.namespace(), "default");
        assert_eq!(spec.propagation_policy, PropagationPolicy::Merge);
        assert_eq!(spec.deletion_policy, DeletionPolicy::Delete);
        assert_eq!(spec.sync_mode, SyncMode::OnChange);
        assert_eq!(spec.sync_interval, Duration::from_secs(300));
        assert!(spec.create_if_missing);
        assert!(spec.allow_system_namespaces);
        assert!(spec.namespace_selector.is_none());
        assert_eq!(spec, PropagationSpec {
            source: PropagationSource::new("", "app-config"),
            ..Default::default()
        });
    }

    #[test]
    fn test_unknown_sync_mode() {
        let spec: PropagationSpec = serde_json::from_value(json!({
            "source": {"name": "app-config"},
            "syncMode": "Sometimes"
        }))
        .unwrap();
        assert_eq!(spec.sync_mode, SyncMode::Unknown);
    }

    #[test]
    fn test_full_spec() {
        let spec: PropagationSpec = serde_json::from_value(json!({
            "source": {"name": "app-config", "namespace": "platform"},
            "targets": [{"namespace": "team-a"}, {"namespace": "team-b", "name": "renamed"}],
            "namespaceSelector": {"matchLabels": {"env": "prod"}},
            "propagationPolicy": "Overwrite",
            "deletionPolicy": "Orphan",
            "syncMode": "Periodic",
            "syncInterval": "1h30m",
            "createIfMissing": false,
            "allowSystemNamespaces": false
        }))
        .unwrap();
        assert_eq!(spec.source.namespace(), "platform");
        assert_eq!(spec.targets[1], TargetRef::named("team-b", "renamed"));
        assert_eq!(spec.propagation_policy, PropagationPolicy::Overwrite);
        assert_eq!(spec.deletion_policy, DeletionPolicy::Orphan);
        assert_eq!(spec.sync_mode, SyncMode::Periodic);
        assert_eq!(spec.sync_interval, Duration::from_secs(5_400));
        assert!(!spec.create_if_missing);
        assert!(!spec.allow_system_namespaces);

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["syncInterval"], "1h30m0s");
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let result = serde_json::from_value::<PropagationSpec>(json!({
            "source": {"name": "app-config"},
            "syncInterval": "soon"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_owner_key_and_target_key() {
        let cmp = ConfigMapPropagation::new("platform", "shared", PropagationSpec::default());
        assert_eq!(cmp.owner_key(), "platform.shared");
        assert_eq!(TargetKey::new("team-a", "app").to_string(), "team-a/app");
        assert!(TargetKey::new("a", "z") < TargetKey::new("b", "a"));
    }

    #[test]
    fn test_status_wire_format() {
        let status = PropagationStatus {
            conditions: vec![Condition {
                type_: CONDITION_READY.to_string(),
                status: ConditionStatus::True,
                reason: "Synced".to_string(),
                message: String::new(),
                last_transition_time: Timestamp::from_unix(0).unwrap(),
            }],
            synced_generation: Some(2),
            targets_summary: Some(TargetsSummary {
                total: 2,
                created: 2,
                ..Default::default()
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["conditions"][0]["type"], "Ready");
        assert_eq!(json["conditions"][0]["lastTransitionTime"], "1970-01-01T00:00:00Z");
        assert_eq!(json["syncedGeneration"], 2);
        assert_eq!(json["targetsSummary"]["created"], 2);
        assert!(json.get("targetStatuses").is_none());
        assert!(status.is_ready());
    }
}
