//! The stable scheduler extender.

mod app;
mod config;
#[cfg(test)]
mod config_test;
mod k8s;
mod server;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true).with_ansi(true))
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    let recorder = build_metrics_recorder(&cfg);
    let metrics_handle = recorder.handle();
    metrics::set_recorder(recorder).context("error setting prometheus metrics recorder")?;
    stable_core::prom::register_metrics();

    tracing::info!(
        http_port = %cfg.http_port,
        namespace = %cfg.namespace,
        statefulset_cache = cfg.statefulset_cache,
        watch_bindings = cfg.watch_bindings,
        "starting stable scheduler extender",
    );
    if let Err(err) = App::new(cfg, metrics_handle).await?.spawn().await {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}

/// Build the process-wide metrics recorder.
fn build_metrics_recorder(config: &Config) -> &'static PrometheusRecorder {
    let mut builder = PrometheusBuilder::new().add_global_label("pod", config.pod_name.clone());
    if let Some(ns) = config.watch_namespace() {
        builder = builder.add_global_label("namespace", ns);
    }
    Box::leak(Box::new(builder.build()))
}
