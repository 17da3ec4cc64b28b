//! Stable scheduling of StatefulSet pods.
//!
//! Replicas of a StatefulSet which opt in via the `statefulset-stable.scheduling.sigs.k8s.io`
//! label are pinned to the node on which they were first placed. The node of every placed
//! replica is recorded in an annotation on the owning StatefulSet, and subsequent scheduling
//! attempts for that replica reject every other candidate node.

pub mod affinity;
pub mod backoff;
pub mod error;
#[cfg(test)]
mod fixtures;
pub mod pod;
#[cfg(test)]
mod pod_test;
pub mod prom;
pub mod record;
#[cfg(test)]
mod record_test;
pub mod store;

pub use affinity::{CallContext, FilterStatus, RecordOutcome, StableAffinity};
pub use backoff::Backoff;
pub use error::{StableError, StoreError};
pub use record::AffinityRecord;
pub use store::{MemoryStore, RecordStore};

/// The name of this scheduling plugin.
pub const PLUGIN_NAME: &str = "statefulset-stable";
/// The label which opts a pod into stable scheduling, must be set to `"true"`.
pub const LABEL_STATEFULSET_STABLE: &str = "statefulset-stable.scheduling.sigs.k8s.io";
/// The StatefulSet annotation holding the JSON encoded scheduling record.
///
/// NOTE WELL: do not change this value. Existing deployments depend upon it.
pub const ANNOTATION_STATEFULSET_STABLE_RECORD: &str = "statefulset-stable.scheduling.sigs.k8s.io/record";
/// The owner reference kind of the objects which carry scheduling records.
pub const OWNER_KIND_STATEFULSET: &str = "StatefulSet";
/// The label selector matching all opted-in pods.
pub const LABEL_SELECTOR_STATEFULSET_STABLE: &str = "statefulset-stable.scheduling.sigs.k8s.io=true";
