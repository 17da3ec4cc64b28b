//! Stable affinity filtering & recording.
//!
//! ## Overview
//! Scheduling a stable pod happens in two phases which are invoked by the scheduler:
//!
//! - `filter` is called for every candidate node of a scheduling attempt. If the pod's owning
//! StatefulSet holds a record for the pod, every node other than the recorded node is rejected.
//! - `post_bind` is called once the pod has been bound to a node. If the StatefulSet holds no
//! record for the pod, the bound node is recorded. The first recorded node always wins.
//!
//! ## Concurrency
//! The scheduling record is shared by all pods of a StatefulSet, so pods bound at nearly the same
//! time will race to update it. Updates are conditioned on the `resourceVersion` observed when
//! the record was read. On a conflict, the StatefulSet is re-read and the update recomputed,
//! bounded by a `Backoff` policy. Nothing is cached between calls.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::error::{StableError, StoreError};
use crate::pod::{is_opted_in, pod_name, pod_namespace, resolve_statefulset};
use crate::prom::{METRIC_FILTER_DECISIONS, METRIC_RECORDS_WRITTEN, METRIC_RECORD_CONFLICTS, METRIC_RECORD_FAILURES};
use crate::record::AffinityRecord;
use crate::store::RecordStore;
use crate::PLUGIN_NAME;

/// The default timeout applied to each individual record store call.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(5);
/// The reason given when a node is rejected.
pub const REASON_NODE_MISMATCH: &str = "node(s) didn't match the recorded node for this replica";

/// The caller's context for a single filter or post-bind call.
///
/// Every record store call made on behalf of the caller is bounded by the deadline. Dropping
/// the returned future cancels any in-flight work.
#[derive(Clone, Copy, Debug, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context without a deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context which expires at the given instant.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline: Some(deadline) }
    }

    /// A context which expires after the given duration.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Check if this context's deadline has elapsed.
    pub fn is_expired(&self) -> bool {
        self.deadline.map(|deadline| deadline <= Instant::now()).unwrap_or(false)
    }

    /// Await the given store call, bounded by `api_timeout` and this context's deadline.
    pub async fn bounded<T, F>(&self, api_timeout: Duration, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if self.is_expired() {
            return Err(StoreError::Timeout);
        }
        let mut limit = Instant::now() + api_timeout;
        if let Some(deadline) = self.deadline {
            limit = limit.min(deadline);
        }
        tokio::time::timeout_at(limit, fut).await.map_err(|_| StoreError::Timeout)?
    }

    /// Sleep for the given duration, failing immediately if the sleep would outlast the deadline.
    pub async fn sleep(&self, duration: Duration) -> Result<(), StableError> {
        if let Some(deadline) = self.deadline {
            if Instant::now() + duration >= deadline {
                return Err(StableError::Cancelled);
            }
        }
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

/// The outcome of filtering a candidate node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterStatus {
    /// The node is admissible.
    Success,
    /// The node is not the node recorded for the pod.
    Unschedulable(String),
    /// The pod's record could not be read, the node must not be used for this attempt.
    Error(String),
}

impl FilterStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// The reason of a non-successful status.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Unschedulable(reason) | Self::Error(reason) => Some(reason.as_str()),
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Unschedulable(_) => "unschedulable",
            Self::Error(_) => "error",
        }
    }
}

/// The outcome of recording the node of a bound pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The pod has not opted in, or it has no owning StatefulSet.
    Skipped,
    /// The pod already had a recorded node, which is left untouched.
    AlreadyRecorded(String),
    /// The bound node was recorded.
    Recorded,
}

/// The stable scheduling plugin, providing the filter & post-bind extension points.
pub struct StableAffinity<S> {
    store: S,
    backoff: Backoff,
    api_timeout: Duration,
}

impl<S: RecordStore> StableAffinity<S> {
    /// Create a new instance with the default backoff policy & API timeout.
    pub fn new(store: S) -> Self {
        Self {
            store,
            backoff: Backoff::default(),
            api_timeout: DEFAULT_API_TIMEOUT,
        }
    }

    /// Use the given backoff policy for conflicting record updates.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Use the given timeout for each individual record store call.
    pub fn with_api_timeout(mut self, api_timeout: Duration) -> Self {
        self.api_timeout = api_timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Check if the given pod may be placed on the given node.
    ///
    /// This call is read-only, and may be invoked concurrently for any number of nodes.
    #[tracing::instrument(level = "debug", skip(self, ctx, pod), fields(plugin = PLUGIN_NAME, pod = pod_name(pod)))]
    pub async fn filter(&self, ctx: &CallContext, pod: &Pod, node_name: &str) -> FilterStatus {
        let status = self.filter_inner(ctx, pod, node_name).await;
        metrics::increment_counter!(METRIC_FILTER_DECISIONS, "outcome" => status.metric_label());
        status
    }

    async fn filter_inner(&self, ctx: &CallContext, pod: &Pod, node_name: &str) -> FilterStatus {
        if !is_opted_in(pod) {
            return FilterStatus::Success;
        }
        let statefulset = match resolve_statefulset(ctx, pod, &self.store, self.api_timeout).await {
            Ok(Some(statefulset)) => statefulset,
            Ok(None) => return FilterStatus::Success,
            Err(err) => return FilterStatus::Error(err.to_string()),
        };
        let record = match AffinityRecord::decode(&statefulset) {
            Ok(record) => record,
            Err(err) => {
                tracing::error!(error = ?err, pod = pod_name(pod), "error decoding scheduling record");
                return FilterStatus::Error(err.to_string());
            }
        };
        match record.node_for(pod_name(pod)) {
            Some(recorded) if recorded != node_name => {
                tracing::debug!(recorded, node = node_name, "rejecting node which does not match recorded node");
                FilterStatus::Unschedulable(REASON_NODE_MISMATCH.into())
            }
            _ => FilterStatus::Success,
        }
    }

    /// Record the node to which the given pod has been bound.
    ///
    /// Failures are logged and never returned, as the binding has already been committed.
    #[tracing::instrument(level = "debug", skip(self, ctx, pod), fields(plugin = PLUGIN_NAME, pod = pod_name(pod)))]
    pub async fn post_bind(&self, ctx: &CallContext, pod: &Pod, node_name: &str) {
        match self.record(ctx, pod, node_name).await {
            Ok(RecordOutcome::Recorded) => {
                tracing::info!(pod = pod_name(pod), namespace = pod_namespace(pod), node = node_name, "recorded scheduling result");
            }
            Ok(RecordOutcome::AlreadyRecorded(recorded)) if recorded != node_name => {
                tracing::warn!(
                    pod = pod_name(pod),
                    recorded = %recorded,
                    node = node_name,
                    "pod was bound to a node other than its recorded node, keeping the recorded node"
                );
            }
            Ok(_) => (),
            Err(err) => {
                metrics::increment_counter!(METRIC_RECORD_FAILURES);
                tracing::error!(error = ?err, pod = pod_name(pod), node = node_name, "failed to record scheduling result");
            }
        }
    }

    /// Record the node to which the given pod has been bound, if it has no recorded node yet.
    pub async fn record(&self, ctx: &CallContext, pod: &Pod, node_name: &str) -> Result<RecordOutcome, StableError> {
        if !is_opted_in(pod) {
            return Ok(RecordOutcome::Skipped);
        }
        let statefulset = match resolve_statefulset(ctx, pod, &self.store, self.api_timeout).await? {
            Some(statefulset) => statefulset,
            None => return Ok(RecordOutcome::Skipped),
        };
        let namespace = statefulset.metadata.namespace.as_deref().unwrap_or_else(|| pod_namespace(pod));
        let name = statefulset.metadata.name.as_deref().unwrap_or_default();

        let mut delays = self.backoff.delays();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_record(ctx, namespace, name, pod_name(pod), node_name).await {
                Err(err) if err.is_conflict() => {
                    metrics::increment_counter!(METRIC_RECORD_CONFLICTS);
                    let delay = delays.next().ok_or(StableError::RetriesExhausted(attempts))?;
                    tracing::debug!(attempts, delay = ?delay, statefulset = name, "conflict while updating scheduling record, retrying");
                    ctx.sleep(delay).await?;
                }
                Err(StableError::Store(StoreError::Timeout)) if ctx.is_expired() => return Err(StableError::Cancelled),
                res => return res,
            }
        }
    }

    /// A single read-modify-write attempt against the current state of the StatefulSet.
    async fn try_record(&self, ctx: &CallContext, namespace: &str, name: &str, replica: &str, node_name: &str) -> Result<RecordOutcome, StableError> {
        let mut statefulset = match ctx.bounded(self.api_timeout, self.store.get_latest(namespace, name)).await {
            Ok(Some(statefulset)) => statefulset,
            Ok(None) | Err(StoreError::NotFound) => return Ok(RecordOutcome::Skipped),
            Err(err) => return Err(err.into()),
        };
        let mut record = AffinityRecord::decode(&statefulset)?;
        if !record.insert_if_absent(replica, node_name) {
            let recorded = record.node_for(replica).unwrap_or_default().to_string();
            return Ok(RecordOutcome::AlreadyRecorded(recorded));
        }

        record.apply_to(&mut statefulset)?;
        let expected_version = statefulset.metadata.resource_version.clone().unwrap_or_default();
        statefulset.metadata.managed_fields = None;
        match ctx.bounded(self.api_timeout, self.store.update(statefulset, &expected_version)).await {
            Ok(_) => {
                metrics::increment_counter!(METRIC_RECORDS_WRITTEN);
                Ok(RecordOutcome::Recorded)
            }
            Err(StoreError::NotFound) => Ok(RecordOutcome::Skipped),
            Err(err) => Err(err.into()),
        }
    }
}
