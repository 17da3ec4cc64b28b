use std::collections::BTreeMap;

use anyhow::Result;

use crate::affinity::{CallContext, DEFAULT_API_TIMEOUT};
use crate::fixtures::{self, owner};
use crate::pod::{is_opted_in, owning_statefulset_name, pod_namespace, resolve_statefulset};
use crate::store::MemoryStore;
use crate::{LABEL_STATEFULSET_STABLE, OWNER_KIND_STATEFULSET};

#[test]
fn opt_in_requires_literal_true() {
    let mut pod = fixtures::stable_pod("web-0");
    assert!(is_opted_in(&pod), "expected labelled pod to be opted in");

    for val in ["True", "yes", "1", ""] {
        pod.metadata.labels = Some(BTreeMap::from([(LABEL_STATEFULSET_STABLE.to_string(), val.to_string())]));
        assert!(!is_opted_in(&pod), "expected label value {:?} to not opt in", val);
    }
    pod.metadata.labels = Some(BTreeMap::new());
    assert!(!is_opted_in(&pod), "expected pod without the label to not opt in");
    pod.metadata.labels = None;
    assert!(!is_opted_in(&pod), "expected pod without labels to not opt in");
}

#[test]
fn owning_name_comes_from_matched_reference() {
    let pod = fixtures::pod_with_owners("web-0", vec![owner("ReplicaSet", "other"), owner(OWNER_KIND_STATEFULSET, "web")]);
    assert_eq!(owning_statefulset_name(&pod), Some("web"));

    let pod = fixtures::pod_with_owners("web-0", vec![owner("ReplicaSet", "other")]);
    assert_eq!(owning_statefulset_name(&pod), None);

    let pod = fixtures::pod_with_owners("web-0", vec![]);
    assert_eq!(owning_statefulset_name(&pod), None);
}

#[test]
fn namespace_defaults_when_absent() {
    let mut pod = fixtures::stable_pod("web-0");
    assert_eq!(pod_namespace(&pod), fixtures::NAMESPACE);
    pod.metadata.namespace = None;
    assert_eq!(pod_namespace(&pod), "default");
}

#[tokio::test]
async fn resolve_treats_lookup_failures_as_unowned() -> Result<()> {
    let store = MemoryStore::new();
    let ctx = CallContext::background();
    let pod = fixtures::stable_pod("web-0");

    let res = resolve_statefulset(&ctx, &pod, &store, DEFAULT_API_TIMEOUT).await?;
    assert!(res.is_none(), "expected missing StatefulSet to resolve to None");

    store.insert(fixtures::statefulset(None)).await;
    store.fail_reads(true);
    let res = resolve_statefulset(&ctx, &pod, &store, DEFAULT_API_TIMEOUT).await?;
    assert!(res.is_none(), "expected failing read to resolve to None");

    store.fail_reads(false);
    let res = resolve_statefulset(&ctx, &pod, &store, DEFAULT_API_TIMEOUT).await?;
    assert!(res.is_some(), "expected StatefulSet to be resolved");
    Ok(())
}
