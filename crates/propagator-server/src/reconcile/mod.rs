//! Reconciliation engine for ConfigMapPropagations.
//!
//! One pass runs these steps in order:
//! - `desired`: resolve target locations from explicit targets and the
//!   namespace selector
//! - `actual`: discover ConfigMaps carrying the ownership label
//! - `diff`: split into create, update and delete sets
//! - `mutate`: apply each mutation independently
//! - `status`: aggregate outcomes and patch status when it changed
//!
//! `schedule` gates whether a pass is due at all, and `deletion` takes over
//! once the propagation is being deleted.

pub mod actual;
mod deletion;
pub mod desired;
pub mod diff;
mod error;
pub mod mutate;
mod recorder;
mod reconciler;
pub mod schedule;
pub mod status;

pub use diff::TargetPlan;
pub use error::{ReconcileError, RetryPolicy, TargetError};
pub use mutate::{TargetMutator, TargetOperation, TargetOutcome};
pub use recorder::Recorder;
pub use reconciler::{Action, Clock, Reconciler, ReconcilerSettings};
pub use schedule::{Resync, Wake};
