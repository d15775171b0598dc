//! Event system.
//!
//! ```text
//!   store writes ──┐                    ┌──> controller watch (enqueue)
//!                  ├─> EventBroadcaster ┤
//!   reconciler  ───┘                    └──> audit log (GET /api/events)
//! ```
//!
//! - [`types`]: `ResourceEvent`, `AuditEvent`, `SystemEvent`
//! - [`broadcaster`]: tokio broadcast channel wrapper

pub mod broadcaster;
pub mod types;

pub use broadcaster::EventBroadcaster;
pub use types::{
    AuditEvent, AuditEventType, ObjectReference, ResourceEvent, ResourceEventType, SystemEvent,
};
