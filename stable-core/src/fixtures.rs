use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::{ANNOTATION_STATEFULSET_STABLE_RECORD, LABEL_STATEFULSET_STABLE, OWNER_KIND_STATEFULSET};

pub const NAMESPACE: &str = "n1";
pub const STS_NAME: &str = "web";

/// Build an opted-in pod owned by the test StatefulSet.
pub fn stable_pod(name: &str) -> Pod {
    let mut pod = pod_with_owners(name, vec![owner(OWNER_KIND_STATEFULSET, STS_NAME)]);
    pod.metadata.labels = Some(BTreeMap::from([(LABEL_STATEFULSET_STABLE.to_string(), "true".to_string())]));
    pod
}

/// Build a pod with the given owner references and no labels.
pub fn pod_with_owners(name: &str, owners: Vec<OwnerReference>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(NAMESPACE.into()),
            owner_references: if owners.is_empty() { None } else { Some(owners) },
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn owner(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".into(),
        kind: kind.into(),
        name: name.into(),
        uid: format!("{}-uid", name),
        ..Default::default()
    }
}

/// Build the test StatefulSet, optionally carrying the given raw record annotation.
pub fn statefulset(raw_record: Option<&str>) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(STS_NAME.into()),
            namespace: Some(NAMESPACE.into()),
            annotations: raw_record.map(|raw| BTreeMap::from([(ANNOTATION_STATEFULSET_STABLE_RECORD.to_string(), raw.to_string())])),
            ..Default::default()
        },
        ..Default::default()
    }
}
