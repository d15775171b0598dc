use std::sync::Arc;

use propagator_core::events::{AuditEvent, EventBroadcaster, ObjectReference};
use propagator_core::resource::Resource;
use propagator_core::ConfigMapPropagation;

use super::mutate::{TargetOperation, TargetOutcome};
use super::status::TargetResult;

/// Publishes audit events about a propagation and mirrors them to the log.
#[derive(Debug, Clone)]
pub struct Recorder {
    broadcaster: Arc<EventBroadcaster>,
}

impl Recorder {
    pub fn new(broadcaster: Arc<EventBroadcaster>) -> Self {
        Self { broadcaster }
    }

    pub fn normal(&self, propagation: &ConfigMapPropagation, reason: &str, message: impl Into<String>) {
        let event = AuditEvent::normal(reference(propagation), reason, message);
        tracing::info!(reason = %event.reason, "{}", event.message);
        self.broadcaster.send_audit(event);
    }

    pub fn warning(&self, propagation: &ConfigMapPropagation, reason: &str, message: impl Into<String>) {
        let event = AuditEvent::warning(reference(propagation), reason, message);
        tracing::warn!(reason = %event.reason, "{}", event.message);
        self.broadcaster.send_audit(event);
    }

    /// One event per write or failure. No-op outcomes stay silent.
    pub fn target_result(&self, propagation: &ConfigMapPropagation, result: &TargetResult) {
        let key = &result.key;
        match &result.outcome {
            Ok(outcome) => {
                let (reason, verb) = match outcome {
                    TargetOutcome::Created => ("Created", "created"),
                    TargetOutcome::Adopted { changed: true } => ("Adopted", "adopted"),
                    TargetOutcome::Updated => ("Updated", "updated"),
                    TargetOutcome::Deleted => ("Deleted", "deleted"),
                    TargetOutcome::Orphaned => ("Orphaned", "orphaned"),
                    _ => return,
                };
                self.normal(propagation, reason, format!("{verb} propagated ConfigMap {key}"));
            }
            Err(err) => {
                let reason = match result.operation {
                    TargetOperation::Create => "CreateFailed",
                    TargetOperation::Update => "UpdateFailed",
                    TargetOperation::Delete => "DeleteFailed",
                    TargetOperation::Orphan => "OrphanFailed",
                };
                self.warning(propagation, reason, format!("{key}: {err}"));
            }
        }
    }
}

fn reference(propagation: &ConfigMapPropagation) -> ObjectReference {
    ObjectReference::new(
        ConfigMapPropagation::KIND,
        &propagation.metadata.namespace,
        &propagation.metadata.name,
    )
}
