use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::client::Client;
use kube::runtime::watcher::{watcher, Event};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::Config;
use crate::k8s::{list_params_stable_pods, scoped_api, EventResult, WATCHER_ERROR_PAUSE};
use stable_core::pod::pod_name;
use stable_core::prom::METRIC_RECORD_FAILURES;
use stable_core::{CallContext, RecordOutcome, RecordStore, StableAffinity};

/// A K8s event watcher of opted-in pods, recording the node of every bound pod.
///
/// This complements the post-bind endpoint for schedulers which can not call it. Recording is
/// idempotent, so a pod observed through both paths is recorded once.
pub struct BindingWatcher<S> {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// A channel used for triggering graceful shutdown.
    shutdown: BroadcastStream<()>,

    affinity: Arc<StableAffinity<S>>,
    /// Pod UIDs mapped to the node on which their binding has already been handled.
    handled: HashMap<String, String>,
}

impl<S: RecordStore + 'static> BindingWatcher<S> {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, affinity: Arc<StableAffinity<S>>, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            client,
            config,
            shutdown: BroadcastStream::new(shutdown),
            affinity,
            handled: Default::default(),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let api = scoped_api::<Pod>(self.client.clone(), self.config.watch_namespace());
        let stream = watcher(api, list_params_stable_pods());
        tokio::pin!(stream);

        tracing::info!("pod binding watcher initialized");
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
    async fn handle_k8s_event(&mut self, res: EventResult<Pod>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from Pod k8s watcher");
                let _ = tokio::time::sleep(WATCHER_ERROR_PAUSE).await;
                return;
            }
        };
        match event {
            Event::Applied(pod) => self.pod_applied(pod).await,
            Event::Deleted(pod) => {
                if let Some(uid) = pod.metadata.uid.as_ref() {
                    self.handled.remove(uid);
                }
            }
            Event::Restarted(pods) => {
                self.handled.retain(|uid, _| pods.iter().any(|pod| pod.metadata.uid.as_ref() == Some(uid)));
                for pod in pods {
                    self.pod_applied(pod).await;
                }
            }
        }
    }

    async fn pod_applied(&mut self, pod: Pod) {
        let node = match pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref()) {
            Some(node) if !node.is_empty() => node,
            _ => return, // Not yet bound.
        };
        let uid = pod.metadata.uid.clone().unwrap_or_default();
        if self.handled.get(&uid).map(|handled| handled == node).unwrap_or(false) {
            return;
        }

        let ctx = CallContext::with_timeout(self.config.record_timeout());
        match self.affinity.record(&ctx, &pod, node).await {
            Ok(outcome) => {
                if outcome == RecordOutcome::Recorded {
                    tracing::info!(pod = pod_name(&pod), node, "recorded scheduling result from observed binding");
                }
                self.handled.insert(uid, node.to_string());
            }
            Err(err) => {
                // Left unhandled so that the next event for this pod retries.
                metrics::increment_counter!(METRIC_RECORD_FAILURES);
                tracing::error!(error = ?err, pod = pod_name(&pod), node, "failed to record scheduling result from observed binding");
            }
        }
    }
}
