//! The HTTP server for scheduler extender calls, healthchecks & metrics.

mod extender;

use std::sync::Arc;

use anyhow::Result;
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{extract::Extension, AddExtensionLayer, Router};
use futures::prelude::*;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
pub use extender::ExtenderState;
use stable_core::RecordStore;

/// The HTTP server.
pub struct HttpServer<S> {
    /// The application's runtime config.
    config: Arc<Config>,
    /// State shared by the extender handlers.
    state: Arc<ExtenderState<S>>,
    /// A handle for rendering Prometheus metrics.
    metrics: PrometheusHandle,
    /// A channel used for triggering graceful shutdown.
    shutdown: broadcast::Receiver<()>,
}

impl<S: RecordStore + 'static> HttpServer<S> {
    /// Create a new instance.
    pub fn new(config: Arc<Config>, state: ExtenderState<S>, metrics: PrometheusHandle, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            config,
            state: Arc::new(state),
            metrics,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        let mut shutdown = self.shutdown;
        let app = Router::new()
            .route("/health", get(|| async { StatusCode::OK }))
            .route("/metrics", get(prometheus_scrape))
            .route("/filter", post(extender::filter::<S>))
            .route("/postbind", post(extender::post_bind::<S>))
            .layer(AddExtensionLayer::new(self.state))
            .layer(AddExtensionLayer::new(self.metrics));
        let server = axum::Server::bind(&([0, 0, 0, 0], self.config.http_port).into())
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move {
                let _res = shutdown.recv().await;
            });
        tracing::info!("scheduler extender is listening at 0.0.0.0:{}", self.config.http_port);
        tokio::spawn(server.map_err(anyhow::Error::from))
    }
}

/// Handle Prometheus metrics scraping.
async fn prometheus_scrape(Extension(state): Extension<PrometheusHandle>) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static("content-type"), HeaderValue::from_static("text/plain; version=0.0.4"));
    (StatusCode::OK, headers, state.render())
}
