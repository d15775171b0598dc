//! Event bus connecting the store, the controller watch and the audit log.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::{AuditEvent, ResourceEvent, SystemEvent};

/// Events beyond this limit are dropped for slow receivers, which then see
/// `RecvError::Lagged`.
const DEFAULT_BUFFER_SIZE: usize = 1024;

#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SystemEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns the number of subscribers that received the event (0 when
    /// nobody is listening).
    pub fn send(&self, event: SystemEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    pub fn send_resource(&self, event: ResourceEvent) -> usize {
        self.send(SystemEvent::Resource(event))
    }

    pub fn send_audit(&self, event: AuditEvent) -> usize {
        self.send(SystemEvent::Audit(event))
    }

    /// Events sent before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::ObjectReference;
    use crate::meta::ObjectMeta;

    #[test]
    fn test_no_subscribers() {
        let broadcaster = EventBroadcaster::new();
        assert!(!broadcaster.has_subscribers());
        let meta = ObjectMeta::new("default", "app");
        assert_eq!(broadcaster.send_resource(ResourceEvent::created("ConfigMap", &meta)), 0);
    }

    #[tokio::test]
    async fn test_send_receive() {
        let broadcaster = EventBroadcaster::new();
        let mut receiver = broadcaster.subscribe();

        let meta = ObjectMeta::new("default", "app");
        broadcaster.send_resource(ResourceEvent::updated("ConfigMap", &meta));

        match receiver.recv().await.unwrap() {
            SystemEvent::Resource(re) => {
                assert_eq!(re.kind, "ConfigMap");
                assert_eq!(re.name, "app");
            }
            other => panic!("Expected ResourceEvent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let broadcaster = EventBroadcaster::new_shared();
        let mut receiver1 = broadcaster.subscribe();
        let mut receiver2 = broadcaster.clone().subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        let audit = AuditEvent::normal(ObjectReference::new("ConfigMap", "a", "b"), "Created", "ok");
        assert_eq!(broadcaster.send_audit(audit), 2);

        assert!(matches!(receiver1.recv().await.unwrap(), SystemEvent::Audit(_)));
        assert!(matches!(receiver2.recv().await.unwrap(), SystemEvent::Audit(_)));
    }
}
