//! Runtime configuration.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use stable_core::Backoff;

/// The maximum number of attempts permitted for a single record write.
const MAX_RETRY_STEPS: usize = 32;
/// The maximum timeout permitted for a single K8s API call.
const MAX_API_TIMEOUT_MS: u64 = 10 * 60 * 1_000;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The port used for the scheduler extender, healthchecks & metrics.
    pub http_port: u16,

    /// The Kubernetes namespace to watch. All namespaces are watched when empty.
    #[serde(default)]
    pub namespace: String,
    /// The name of the pod on which this instance is running.
    #[serde(default = "default_pod_name")]
    pub pod_name: String,

    /// The timeout in milliseconds applied to each K8s API call.
    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,
    /// The total number of attempts made to write a scheduling record when hitting conflicts.
    #[serde(default = "default_retry_steps")]
    pub retry_steps: usize,
    /// The wait in milliseconds before the first retry of a conflicting write.
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
    /// The multiplier applied to the wait after every retry.
    #[serde(default = "default_retry_factor")]
    pub retry_factor: f64,
    /// The fraction of each wait which may be randomly added to it.
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,

    /// Serve filter reads of StatefulSets from a watcher cache instead of the K8s API.
    #[serde(default = "default_true")]
    pub statefulset_cache: bool,
    /// Record scheduling results by watching pod bindings, in addition to the post-bind endpoint.
    ///
    /// Stock schedulers never call the post-bind endpoint, so this is the only recording path
    /// for them.
    #[serde(default = "default_true")]
    pub watch_bindings: bool,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env::<Self>().context("error building config from env")?.validate()
    }

    /// Validate this config, rejecting values which would produce unbounded deadlines.
    pub fn validate(self) -> Result<Self> {
        if self.api_timeout_ms == 0 || self.api_timeout_ms > MAX_API_TIMEOUT_MS {
            bail!("API_TIMEOUT_MS must be within 1..={}, got {}", MAX_API_TIMEOUT_MS, self.api_timeout_ms);
        }
        if self.retry_steps == 0 || self.retry_steps > MAX_RETRY_STEPS {
            bail!("RETRY_STEPS must be within 1..={}, got {}", MAX_RETRY_STEPS, self.retry_steps);
        }
        if self.retry_initial_ms > MAX_API_TIMEOUT_MS {
            bail!("RETRY_INITIAL_MS must be at most {}, got {}", MAX_API_TIMEOUT_MS, self.retry_initial_ms);
        }
        if !self.retry_factor.is_finite() || self.retry_factor < 1.0 {
            bail!("RETRY_FACTOR must be a finite value of at least 1.0, got {}", self.retry_factor);
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            bail!("RETRY_JITTER must be within 0.0..=1.0, got {}", self.retry_jitter);
        }
        Ok(self)
    }

    /// The namespace to watch, if restricted to a single namespace.
    pub fn watch_namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(self.namespace.as_str())
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    /// The deadline of a single recording, covering every attempt permitted by the backoff policy.
    pub fn record_timeout(&self) -> Duration {
        let backoff = self.backoff();
        let (attempts, jitter) = (backoff.attempts().min(MAX_RETRY_STEPS), backoff.jitter.clamp(0.0, 1.0));
        let waits = Backoff { steps: attempts, jitter: 0.0, ..backoff }
            .delays()
            .map(|delay| if jitter > 0.0 { delay.mul_f64(1.0 + jitter) } else { delay })
            .fold(Duration::ZERO, Duration::saturating_add);
        self.api_timeout().saturating_mul(2 * attempts as u32).saturating_add(waits)
    }

    /// The backoff policy used for conflicting record writes.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            steps: self.retry_steps,
            duration: Duration::from_millis(self.retry_initial_ms),
            factor: self.retry_factor,
            jitter: self.retry_jitter,
            cap: None,
        }
    }
}

fn default_pod_name() -> String {
    "stable-scheduler".into()
}

fn default_api_timeout_ms() -> u64 {
    5_000
}

fn default_retry_steps() -> usize {
    4
}

fn default_retry_initial_ms() -> u64 {
    10
}

fn default_retry_factor() -> f64 {
    5.0
}

fn default_retry_jitter() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}
