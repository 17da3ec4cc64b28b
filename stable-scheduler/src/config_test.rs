use std::time::Duration;

use anyhow::Result;

use crate::config::Config;

#[test]
fn config_deserializes_from_full_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("HTTP_PORT".into(), "8888".into()),
        ("NAMESPACE".into(), "default".into()),
        ("POD_NAME".into(), "stable-scheduler-0".into()),
        ("API_TIMEOUT_MS".into(), "2000".into()),
        ("RETRY_STEPS".into(), "6".into()),
        ("RETRY_INITIAL_MS".into(), "20".into()),
        ("RETRY_FACTOR".into(), "2.0".into()),
        ("RETRY_JITTER".into(), "0.5".into()),
        ("STATEFULSET_CACHE".into(), "false".into()),
        ("WATCH_BINDINGS".into(), "false".into()),
    ])?;

    assert!(config.rust_log == "error", "unexpected value parsed for RUST_LOG, got {}, expected {}", config.rust_log, "error");
    assert!(config.http_port == 8888, "unexpected value parsed for HTTP_PORT, got {}, expected {}", config.http_port, 8888);
    assert!(config.watch_namespace() == Some("default"), "unexpected watch namespace, got {:?}, expected {:?}", config.watch_namespace(), Some("default"));
    assert!(config.pod_name == "stable-scheduler-0", "unexpected value parsed for POD_NAME, got {}, expected {}", config.pod_name, "stable-scheduler-0");
    assert!(config.api_timeout() == Duration::from_secs(2), "unexpected api timeout, got {:?}", config.api_timeout());
    let backoff = config.backoff();
    assert!(backoff.steps == 6, "unexpected value parsed for RETRY_STEPS, got {}, expected {}", backoff.steps, 6);
    assert!(backoff.duration == Duration::from_millis(20), "unexpected value parsed for RETRY_INITIAL_MS, got {:?}", backoff.duration);
    assert!((backoff.factor - 2.0).abs() < f64::EPSILON, "unexpected value parsed for RETRY_FACTOR, got {}", backoff.factor);
    assert!((backoff.jitter - 0.5).abs() < f64::EPSILON, "unexpected value parsed for RETRY_JITTER, got {}", backoff.jitter);
    assert!(!config.statefulset_cache, "expected STATEFULSET_CACHE to be false");
    assert!(!config.watch_bindings, "expected WATCH_BINDINGS to be false");

    Ok(())
}

#[test]
fn config_deserializes_from_sparse_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![("RUST_LOG".into(), "info".into()), ("HTTP_PORT".into(), "8888".into())])?;

    assert!(config.watch_namespace().is_none(), "expected all namespaces to be watched, got {:?}", config.watch_namespace());
    assert!(config.pod_name == "stable-scheduler", "unexpected default POD_NAME, got {}", config.pod_name);
    assert!(config.api_timeout() == Duration::from_secs(5), "unexpected default api timeout, got {:?}", config.api_timeout());
    assert!(config.backoff() == stable_core::Backoff::default(), "expected default backoff, got {:?}", config.backoff());
    assert!(config.statefulset_cache, "expected STATEFULSET_CACHE to default to true");
    assert!(config.watch_bindings, "expected WATCH_BINDINGS to default to true");

    Ok(())
}

#[test]
fn config_requires_http_port() {
    let res = envy::from_iter::<_, Config>(vec![("RUST_LOG".to_string(), "info".to_string())]);
    assert!(res.is_err(), "expected missing HTTP_PORT to be an error");
}

#[test]
fn record_timeout_covers_all_attempts() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "info".into()),
        ("HTTP_PORT".into(), "8888".into()),
        ("API_TIMEOUT_MS".into(), "1000".into()),
        ("RETRY_JITTER".into(), "0".into()),
    ])?;

    // 4 attempts of a read & a write each, plus waits of 10ms, 50ms & 250ms.
    let expected = Duration::from_millis(8_000 + 310);
    assert!(config.record_timeout() == expected, "unexpected record timeout, got {:?}, expected {:?}", config.record_timeout(), expected);

    Ok(())
}

fn env_with(overrides: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut env = vec![("RUST_LOG".to_string(), "info".to_string()), ("HTTP_PORT".to_string(), "8888".to_string())];
    env.extend(overrides.iter().map(|(key, val)| (key.to_string(), val.to_string())));
    env
}

#[test]
fn validate_accepts_defaults() -> Result<()> {
    let config = envy::from_iter::<_, Config>(env_with(&[]))?.validate()?;
    assert!(config.retry_steps == 4, "unexpected default RETRY_STEPS, got {}", config.retry_steps);
    Ok(())
}

#[test]
fn validate_rejects_unbounded_retry_settings() -> Result<()> {
    let cases: &[(&str, &str)] = &[
        ("RETRY_STEPS", "0"),
        ("RETRY_STEPS", "4294967297"),
        ("RETRY_JITTER", "1e300"),
        ("RETRY_JITTER", "-0.5"),
        ("RETRY_JITTER", "NaN"),
        ("RETRY_FACTOR", "inf"),
        ("RETRY_FACTOR", "NaN"),
        ("RETRY_FACTOR", "0.5"),
        ("API_TIMEOUT_MS", "0"),
        ("API_TIMEOUT_MS", "18446744073709551615"),
        ("RETRY_INITIAL_MS", "18446744073709551615"),
    ];
    for (key, val) in cases {
        let config: Config = envy::from_iter(env_with(&[(key, val)]))?;
        assert!(config.validate().is_err(), "expected {}={} to be rejected", key, val);
    }
    Ok(())
}

#[test]
fn record_timeout_saturates_instead_of_overflowing() -> Result<()> {
    let config: Config = envy::from_iter(env_with(&[
        ("API_TIMEOUT_MS", "18446744073709551615"),
        ("RETRY_STEPS", "4294967297"),
        ("RETRY_FACTOR", "1e300"),
    ]))?;

    // Unvalidated extremes must still yield a deadline rather than panicking.
    assert!(config.record_timeout() > Duration::from_secs(60), "expected a large record timeout, got {:?}", config.record_timeout());
    Ok(())
}
