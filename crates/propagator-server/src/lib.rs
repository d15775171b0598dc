pub mod audit;
pub mod config;
pub mod controller;
pub mod handlers;
pub mod manifest;
pub mod metrics;
pub mod observability;
pub mod reconcile;
pub mod server;

pub use audit::AuditLog;
pub use config::{AppConfig, ControllerConfig, loader::load_config};
pub use controller::{Controller, ControllerHandle, ObjectKey, WorkQueue};
pub use manifest::{Manifest, apply_manifest, load_manifest};
pub use observability::init_tracing;
pub use reconcile::{Action, ReconcileError, Reconciler, ReconcilerSettings, Recorder};
pub use server::{AppState, PropagatorServer, ServerBuilder, build_app};
