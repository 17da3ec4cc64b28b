//! Scheduler extender endpoints.
//!
//! The wire types here follow `k8s.io/kube-scheduler/extender/v1`, whose JSON field names are
//! the capitalized Go field names.
//!
//! `/filter` is meant to be configured as the `filterVerb` of a scheduler extender. The stock
//! extender protocol has no post-bind verb, so `/postbind` only serves custom scheduler shims
//! which call it after a binding has been committed. It must NOT be configured as the
//! `bindVerb`: it never creates a Binding, so pods would remain unbound. Deployments using a
//! stock scheduler rely on the pod binding watcher to record placements.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Extension;
use axum::Json;
use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::client::Client;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use stable_core::pod::pod_name;
use stable_core::{CallContext, FilterStatus, RecordStore, StableAffinity};

/// State shared by all extender handlers.
pub struct ExtenderState<S> {
    /// The stable scheduling plugin.
    pub affinity: Arc<StableAffinity<S>>,
    /// K8s client used to fetch pods when a post-bind request carries only pod names.
    pub client: Option<Client>,
    /// The deadline of a single filter request.
    pub filter_timeout: Duration,
    /// The deadline of a single post-bind recording.
    pub record_timeout: Duration,
}

/// Arguments of a filter request.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtenderArgs {
    /// The pod being scheduled.
    #[serde(default, deserialize_with = "deserialize_pod")]
    pub pod: Option<Pod>,
    /// The candidate nodes, populated when the extender is not node cache capable.
    #[serde(default)]
    pub nodes: Option<NodeList>,
    /// The candidate node names, populated when the extender is node cache capable.
    #[serde(default)]
    pub node_names: Option<Vec<String>>,
}

/// The result of a filter request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtenderFilterResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_names: Option<Vec<String>>,
    /// Nodes which failed the filter, mapped to the failure reason.
    #[serde(default)]
    pub failed_nodes: BTreeMap<String, String>,
    /// Nodes which failed the filter and which preemption can not resolve.
    #[serde(default)]
    pub failed_and_unresolvable_nodes: BTreeMap<String, String>,
    #[serde(default)]
    pub error: String,
}

/// A list of nodes.
///
/// Node objects are passed through opaquely, only their names are inspected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// Arguments of a post-bind request.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtenderBindingArgs {
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub pod_namespace: String,
    #[serde(default, rename = "PodUID")]
    pub pod_uid: String,
    /// The node to which the pod has been bound.
    pub node: String,
    /// The bound pod, which when given avoids fetching the pod from K8s.
    #[serde(default, deserialize_with = "deserialize_pod")]
    pub pod: Option<Pod>,
}

/// The result of a post-bind request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtenderBindingResult {
    #[serde(default)]
    pub error: String,
}

/// Filter handler.
pub(super) async fn filter<S: RecordStore + 'static>(
    Extension(state): Extension<Arc<ExtenderState<S>>>, Json(args): Json<ExtenderArgs>,
) -> Json<ExtenderFilterResult> {
    let ctx = CallContext::with_timeout(state.filter_timeout);
    Json(run_filter(&state.affinity, &ctx, args).await)
}

/// Post-bind handler.
///
/// The recording runs to completion before the response is sent, so graceful shutdown of the
/// server drains in-flight recordings. Recording failures are logged and never fail the call,
/// as the binding has already been committed.
pub(super) async fn post_bind<S: RecordStore + 'static>(
    Extension(state): Extension<Arc<ExtenderState<S>>>, Json(mut args): Json<ExtenderBindingArgs>,
) -> Json<ExtenderBindingResult> {
    let ctx = CallContext::with_timeout(state.record_timeout);
    let pod = match args.pod.take() {
        Some(pod) => Some(pod),
        None => fetch_pod(state.client.clone(), &args).await,
    };
    if let Some(pod) = pod {
        state.affinity.post_bind(&ctx, &pod, &args.node).await;
    }
    Json(ExtenderBindingResult::default())
}

/// Filter the candidate nodes of the given request.
#[tracing::instrument(level = "debug", skip(affinity, ctx, args))]
pub async fn run_filter<S: RecordStore>(affinity: &StableAffinity<S>, ctx: &CallContext, args: ExtenderArgs) -> ExtenderFilterResult {
    let pod = match args.pod {
        Some(pod) => pod,
        None => {
            return ExtenderFilterResult {
                nodes: args.nodes,
                node_names: args.node_names,
                error: "no pod given in filter request".into(),
                ..Default::default()
            };
        }
    };
    let mut result = ExtenderFilterResult::default();

    if let Some(names) = args.node_names {
        let statuses = join_all(names.iter().map(|name| affinity.filter(ctx, &pod, name))).await;
        let mut admitted = Vec::with_capacity(names.len());
        for (name, status) in names.into_iter().zip(statuses) {
            match status {
                FilterStatus::Success => admitted.push(name),
                status => {
                    result.failed_nodes.insert(name, status.reason().unwrap_or_default().to_string());
                }
            }
        }
        result.node_names = Some(admitted);
    } else if let Some(nodes) = args.nodes {
        let names: Vec<String> = nodes.items.iter().map(|node| node_name(node).to_string()).collect();
        let statuses = join_all(names.iter().map(|name| affinity.filter(ctx, &pod, name))).await;
        let mut admitted = Vec::with_capacity(nodes.items.len());
        for ((node, name), status) in nodes.items.into_iter().zip(names).zip(statuses) {
            match status {
                FilterStatus::Success => admitted.push(node),
                status => {
                    result.failed_nodes.insert(name, status.reason().unwrap_or_default().to_string());
                }
            }
        }
        result.nodes = Some(NodeList { items: admitted, rest: nodes.rest });
    }

    tracing::debug!(pod = pod_name(&pod), failed = result.failed_nodes.len(), "filtered candidate nodes");
    result
}

/// Fetch the pod named by the given post-bind request.
async fn fetch_pod(client: Option<Client>, args: &ExtenderBindingArgs) -> Option<Pod> {
    let client = client?;
    let namespace = if args.pod_namespace.is_empty() { "default" } else { args.pod_namespace.as_str() };
    let api: Api<Pod> = Api::namespaced(client, namespace);
    match api.get(&args.pod_name).await {
        Ok(pod) => Some(pod),
        Err(err) => {
            tracing::error!(error = ?err, pod = %args.pod_name, uid = %args.pod_uid, namespace, "error fetching bound pod, scheduling result not recorded");
            None
        }
    }
}

/// The name of the given opaque node object.
fn node_name(node: &Value) -> &str {
    node.pointer("/metadata/name").and_then(Value::as_str).unwrap_or_default()
}

/// Deserialize a pod as sent by the scheduler.
///
/// The scheduler omits or blanks the type metadata of embedded pods, which is filled in here.
fn deserialize_pod<'de, D: Deserializer<'de>>(val: D) -> Result<Option<Pod>, D::Error> {
    let mut raw = match Option::<Value>::deserialize(val)? {
        Some(Value::Object(raw)) => raw,
        Some(Value::Null) | None => return Ok(None),
        Some(_) => return Err(DeError::custom("expected pod to be an object")),
    };
    for (key, default) in [("apiVersion", "v1"), ("kind", "Pod")] {
        let blank = raw.get(key).and_then(Value::as_str).map(str::is_empty).unwrap_or(true);
        if blank {
            raw.insert(key.into(), Value::String(default.into()));
        }
    }
    serde_json::from_value(Value::Object(raw)).map(Some).map_err(DeError::custom)
}
