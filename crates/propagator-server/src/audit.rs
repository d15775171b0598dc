//! Bounded in-memory log of reconciler audit events.
//!
//! The collector task subscribes to the [`EventBroadcaster`] and keeps the
//! most recent [`AuditEvent`]s for `GET /api/events`. Resource events are
//! ignored.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use propagator_core::events::{AuditEvent, EventBroadcaster, SystemEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct AuditLog {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, event: AuditEvent) {
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Up to `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns the task feeding this log from `broadcaster`. The task ends
    /// when the broadcaster is dropped.
    pub fn spawn_collector(&self, broadcaster: &EventBroadcaster) -> JoinHandle<()> {
        let mut rx = broadcaster.subscribe();
        let log = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SystemEvent::Audit(event)) => log.push(event),
                    Ok(SystemEvent::Resource(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "audit collector lagged behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("audit collector stopped");
        })
    }
}
