use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::k8s::{BindingWatcher, KubeStore, StatefulSetWatcher};
use crate::server::{ExtenderState, HttpServer};
use stable_core::StableAffinity;

/// The application object of the scheduler extender.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the HTTP server.
    server: JoinHandle<Result<()>>,
    /// The join handle of the StatefulSet watcher, if the cache is enabled.
    statefulsets: Option<JoinHandle<Result<()>>>,
    /// The join handle of the pod binding watcher, if enabled.
    bindings: Option<JoinHandle<Result<()>>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>, metrics: PrometheusHandle) -> Result<Self> {
        // App shutdown channel.
        let (shutdown_tx, shutdown_rx) = broadcast::channel(10);

        // Initialize K8s client.
        let client = kube::Client::try_default().await.context("error initializing K8s client")?;

        let mut store = KubeStore::new(client.clone());
        let statefulsets = if config.statefulset_cache {
            let (watcher, cache) = StatefulSetWatcher::new(client.clone(), config.clone(), shutdown_tx.subscribe());
            store = store.with_cache(cache);
            Some(watcher.spawn())
        } else {
            None
        };

        let affinity = Arc::new(
            StableAffinity::new(store)
                .with_backoff(config.backoff())
                .with_api_timeout(config.api_timeout()),
        );

        let bindings = if config.watch_bindings {
            Some(BindingWatcher::new(client.clone(), config.clone(), affinity.clone(), shutdown_tx.subscribe()).spawn())
        } else {
            None
        };

        let state = ExtenderState {
            affinity,
            client: Some(client),
            filter_timeout: config.api_timeout(),
            record_timeout: config.record_timeout(),
        };
        let server = HttpServer::new(config.clone(), state, metrics, shutdown_tx.subscribe()).spawn();

        Ok(Self {
            _config: config,
            shutdown_rx: BroadcastStream::new(shutdown_rx),
            shutdown_tx,
            server,
            statefulsets,
            bindings,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine.
        tracing::debug!("stable scheduler extender is shutting down");
        if let Err(err) = self.server.await.context("error joining HTTP server handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down HTTP server");
        }
        if let Some(handle) = self.statefulsets {
            if let Err(err) = handle.await.context("error joining StatefulSet watcher handle").and_then(|res| res) {
                tracing::error!(error = ?err, "error shutting down StatefulSet watcher");
            }
        }
        if let Some(handle) = self.bindings {
            if let Err(err) = handle.await.context("error joining pod binding watcher handle").and_then(|res| res) {
                tracing::error!(error = ?err, "error shutting down pod binding watcher");
            }
        }

        tracing::debug!("stable scheduler extender shutdown complete");
        Ok(())
    }
}
