use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use futures::stream::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::ListParams;
use kube::client::Client;
use kube::runtime::watcher::{watcher, Event};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::Config;
use crate::k8s::{scoped_api, EventResult, WATCHER_ERROR_PAUSE};

/// A map of all known StatefulSets, keyed by `{namespace}/{name}`.
pub type StatefulSetsMap = Arc<ArcSwap<HashMap<String, Arc<StatefulSet>>>>;

/// Build the cache key of the given StatefulSet.
pub fn cache_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// A K8s event watcher of StatefulSets, maintaining a `StatefulSetsMap`.
pub struct StatefulSetWatcher {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// A channel used for triggering graceful shutdown.
    shutdown: BroadcastStream<()>,

    statefulsets: StatefulSetsMap,
}

impl StatefulSetWatcher {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, shutdown: broadcast::Receiver<()>) -> (Self, StatefulSetsMap) {
        let shutdown = BroadcastStream::new(shutdown);
        let statefulsets: StatefulSetsMap = Default::default();
        (
            Self {
                client,
                config,
                shutdown,
                statefulsets: statefulsets.clone(),
            },
            statefulsets,
        )
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let api = scoped_api::<StatefulSet>(self.client.clone(), self.config.watch_namespace());
        let stream = watcher(api, ListParams::default());
        tokio::pin!(stream);

        tracing::info!("StatefulSet watcher initialized");
        loop {
            tokio::select! {
                Some(k8s_event_res) = stream.next() => self.handle_k8s_event(k8s_event_res).await,
                _ = self.shutdown.next() => break,
            }
        }

        Ok(())
    }

    /// Handle watcher events coming from K8s.
    #[tracing::instrument(level = "debug", skip(self, res))]
    async fn handle_k8s_event(&mut self, res: EventResult<StatefulSet>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from StatefulSet k8s watcher");
                let _ = tokio::time::sleep(WATCHER_ERROR_PAUSE).await;
                return;
            }
        };
        match event {
            Event::Applied(sts) => {
                let key = match object_key(&sts) {
                    Some(key) => key,
                    None => return, // Not actually possible as K8s requires name.
                };
                tracing::debug!(%key, "caching StatefulSet");
                let mut updated = self.statefulsets.load_full().as_ref().clone();
                updated.insert(key, Arc::new(sts));
                self.statefulsets.store(Arc::new(updated));
            }
            Event::Deleted(sts) => {
                let key = match object_key(&sts) {
                    Some(key) => key,
                    None => return,
                };
                tracing::debug!(%key, "evicting StatefulSet");
                let mut updated = self.statefulsets.load_full().as_ref().clone();
                updated.remove(&key);
                self.statefulsets.store(Arc::new(updated));
            }
            Event::Restarted(statefulsets) => {
                tracing::debug!("StatefulSet watcher stream restarted");
                let rebuilt = statefulsets.into_iter().fold(HashMap::new(), |mut acc, sts| {
                    if let Some(key) = object_key(&sts) {
                        acc.insert(key, Arc::new(sts));
                    }
                    acc
                });
                tracing::debug!(len = rebuilt.len(), "new StatefulSet cache created");
                self.statefulsets.store(Arc::new(rebuilt));
            }
        }
    }
}

fn object_key(sts: &StatefulSet) -> Option<String> {
    let name = sts.metadata.name.as_deref()?;
    Some(cache_key(sts.metadata.namespace.as_deref().unwrap_or("default"), name))
}
