//! Kubernetes integration.
//!
//! Provides the K8s backed `RecordStore`, a watcher-fed cache of StatefulSets used to serve
//! filter reads without hitting the K8s API for every candidate node, and an optional watcher
//! which records scheduling results by observing pod bindings.

mod bindings;
mod cache;
mod store;

use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::watcher::{Error as WatcherError, Event};
use kube::Resource;

pub use bindings::BindingWatcher;
pub use cache::{cache_key, StatefulSetWatcher, StatefulSetsMap};
pub use store::KubeStore;

/// The duration to pause after a K8s watcher error before polling the watcher again.
const WATCHER_ERROR_PAUSE: std::time::Duration = std::time::Duration::from_secs(10);

/// A result type used for object events coming from K8s.
type EventResult<T> = std::result::Result<Event<T>, WatcherError>;

/// Build an API handle for the given namespace, or for all namespaces.
fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// List params selecting all pods which opted into stable scheduling.
fn list_params_stable_pods() -> ListParams {
    ListParams {
        label_selector: Some(stable_core::LABEL_SELECTOR_STATEFULSET_STABLE.into()),
        ..Default::default()
    }
}
