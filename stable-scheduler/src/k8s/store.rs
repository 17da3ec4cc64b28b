use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, PostParams};
use kube::client::Client;

use crate::k8s::{cache_key, StatefulSetsMap};
use stable_core::{RecordStore, StoreError};

/// A `RecordStore` backed by the K8s API.
///
/// When built with a StatefulSets cache, `get` is served from the cache and falls back to the
/// K8s API on a miss. `get_latest` & `update` always go to the K8s API.
#[derive(Clone)]
pub struct KubeStore {
    /// K8s client.
    client: Client,
    /// An optional watcher-fed cache of StatefulSets.
    cache: Option<StatefulSetsMap>,
}

impl KubeStore {
    /// Create a new instance.
    pub fn new(client: Client) -> Self {
        Self { client, cache: None }
    }

    /// Serve reads from the given cache.
    pub fn with_cache(mut self, cache: StatefulSetsMap) -> Self {
        self.cache = Some(cache);
        self
    }

    fn api(&self, namespace: &str) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn fetch(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, StoreError> {
        match self.api(namespace).get(name).await.map_err(store_error) {
            Ok(statefulset) => Ok(Some(statefulset)),
            Err(StoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl RecordStore for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, StoreError> {
        if let Some(cache) = &self.cache {
            if let Some(statefulset) = cache.load().get(&cache_key(namespace, name)) {
                return Ok(Some(statefulset.as_ref().clone()));
            }
        }
        self.fetch(namespace, name).await
    }

    async fn get_latest(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, StoreError> {
        self.fetch(namespace, name).await
    }

    #[tracing::instrument(level = "debug", skip(self, statefulset))]
    async fn update(&self, mut statefulset: StatefulSet, expected_version: &str) -> Result<StatefulSet, StoreError> {
        let namespace = statefulset.metadata.namespace.clone().unwrap_or_default();
        let name = statefulset.metadata.name.clone().unwrap_or_default();
        // The API server rejects the replacement with a 409 if this is not the current version.
        statefulset.metadata.resource_version = Some(expected_version.into());
        self.api(&namespace)
            .replace(&name, &PostParams::default(), &statefulset)
            .await
            .map_err(store_error)
    }
}

/// Map a K8s client error onto the record store's error taxonomy.
pub(super) fn store_error(err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(res) if res.code == 409 => StoreError::Conflict,
        kube::Error::Api(res) if res.code == 404 => StoreError::NotFound,
        err => StoreError::Backend(err.into()),
    }
}
