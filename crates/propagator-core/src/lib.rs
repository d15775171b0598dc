pub mod duration;
pub mod error;
pub mod events;
pub mod labels;
pub mod meta;
pub mod propagation;
pub mod resource;
pub mod time;

pub use error::{CoreError, ErrorCategory, Result};
pub use labels::{LabelSelector, LabelSelectorRequirement, Selector, SelectorOperator};
pub use meta::ObjectMeta;
pub use propagation::{
    Condition, ConditionStatus, ConfigMapPropagation, DeletionPolicy, PropagationPolicy,
    PropagationSource, PropagationSpec, PropagationStatus, SyncMode, TargetKey, TargetRef,
    TargetState, TargetStatus, TargetsSummary,
};
pub use resource::{ConfigMap, Namespace, Payload};
pub use time::{Timestamp, now_utc};
