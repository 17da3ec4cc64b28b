//! Pod inspection: opt-in detection & owning StatefulSet resolution.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;

use crate::affinity::CallContext;
use crate::error::{StableError, StoreError};
use crate::store::RecordStore;
use crate::{LABEL_STATEFULSET_STABLE, OWNER_KIND_STATEFULSET};

/// The namespace assumed for objects which do not declare one.
const DEFAULT_NAMESPACE: &str = "default";

/// Check if the given pod has opted into stable scheduling.
pub fn is_opted_in(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_STATEFULSET_STABLE))
        .map(|val| val == "true")
        .unwrap_or(false)
}

/// The name of the given pod.
pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

/// The namespace of the given pod.
pub fn pod_namespace(pod: &Pod) -> &str {
    match pod.metadata.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => ns,
        _ => DEFAULT_NAMESPACE,
    }
}

/// The name of the StatefulSet owning the given pod, taken from the first owner reference of
/// kind `StatefulSet`.
pub fn owning_statefulset_name(pod: &Pod) -> Option<&str> {
    pod.metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.kind == OWNER_KIND_STATEFULSET)
        .map(|owner| owner.name.as_str())
}

/// Resolve the StatefulSet owning the given pod.
///
/// Lookup failures of any kind resolve to `None`, in which case the pod is treated as
/// unconstrained. Only an elapsed caller deadline is returned as an error.
#[tracing::instrument(level = "debug", skip(ctx, pod, store), fields(pod = pod_name(pod)))]
pub async fn resolve_statefulset<S: RecordStore + ?Sized>(ctx: &CallContext, pod: &Pod, store: &S, api_timeout: std::time::Duration) -> Result<Option<StatefulSet>, StableError> {
    let name = match owning_statefulset_name(pod) {
        Some(name) => name,
        None => return Ok(None),
    };
    let namespace = pod_namespace(pod);
    match ctx.bounded(api_timeout, store.get(namespace, name)).await {
        Ok(Some(sts)) => Ok(Some(sts)),
        Ok(None) | Err(StoreError::NotFound) => {
            tracing::debug!(namespace, statefulset = name, "owning StatefulSet not found");
            Ok(None)
        }
        Err(_) if ctx.is_expired() => Err(StableError::Cancelled),
        Err(err) => {
            tracing::warn!(error = ?err, namespace, statefulset = name, "error fetching owning StatefulSet");
            Ok(None)
        }
    }
}
