//! Event types shared by the store, the controller and the audit log.
//!
//! - `ResourceEvent` - a stored object was created, updated or deleted
//! - `AuditEvent` - an outcome recorded by the reconciler against an object
//! - `SystemEvent` - unified enum combining both

use crate::meta::ObjectMeta;
use crate::time::{Timestamp, now_utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Resource Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceEventType {
    Created,
    Updated,
    Deleted,
}

impl ResourceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceEventType::Created => "created",
            ResourceEventType::Updated => "updated",
            ResourceEventType::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ResourceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Change notification for a stored object.
///
/// Labels are a snapshot taken at the time of the change so that watchers
/// can route deletions by ownership label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEvent {
    pub event_type: ResourceEventType,
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub timestamp: Timestamp,
}

impl ResourceEvent {
    pub fn new(event_type: ResourceEventType, kind: impl Into<String>, meta: &ObjectMeta) -> Self {
        Self {
            event_type,
            kind: kind.into(),
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            resource_version: meta.resource_version.clone(),
            labels: meta.labels.clone(),
            timestamp: now_utc(),
        }
    }

    pub fn created(kind: impl Into<String>, meta: &ObjectMeta) -> Self {
        Self::new(ResourceEventType::Created, kind, meta)
    }

    pub fn updated(kind: impl Into<String>, meta: &ObjectMeta) -> Self {
        Self::new(ResourceEventType::Updated, kind, meta)
    }

    pub fn deleted(kind: impl Into<String>, meta: &ObjectMeta) -> Self {
        Self::new(ResourceEventType::Deleted, kind, meta)
    }

    pub fn matches_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

// ============================================================================
// Audit Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventType {
    Normal,
    Warning,
}

/// Reference to the object an audit event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
}

impl ObjectReference {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    #[serde(rename = "type")]
    pub event_type: AuditEventType,
    pub reason: String,
    pub message: String,
    pub involved_object: ObjectReference,
    pub timestamp: Timestamp,
}

impl AuditEvent {
    pub fn normal(
        involved_object: ObjectReference,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(AuditEventType::Normal, involved_object, reason, message)
    }

    pub fn warning(
        involved_object: ObjectReference,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(AuditEventType::Warning, involved_object, reason, message)
    }

    fn new(
        event_type: AuditEventType,
        involved_object: ObjectReference,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            reason: reason.into(),
            message: message.into(),
            involved_object,
            timestamp: now_utc(),
        }
    }

    pub fn is_warning(&self) -> bool {
        self.event_type == AuditEventType::Warning
    }
}

// ============================================================================
// System Events (unified)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemEvent {
    Resource(ResourceEvent),
    Audit(AuditEvent),
}

impl From<ResourceEvent> for SystemEvent {
    fn from(event: ResourceEvent) -> Self {
        SystemEvent::Resource(event)
    }
}

impl From<AuditEvent> for SystemEvent {
    fn from(event: AuditEvent) -> Self {
        SystemEvent::Audit(event)
    }
}
