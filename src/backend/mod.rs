//! C6 — Remote-State Backends. Polymorphic over the capability set
//! `{NeedsBootstrap, Bootstrap, GenerateBackendFile, Migrate, Delete}`.
//! Variants: S3, GCS, Local, Passthrough.
//!
//! Both the S3 and GCS backends wrap an async cloud SDK behind a
//! synchronous, blocking-at-the-call-site interface so the rest of the
//! engine (thread-based, not async) never has to know. `block_on` spins up
//! a single-threaded current-thread Tokio runtime for the duration of one
//! call and tears it down afterward.

pub mod gcs;
pub mod local;
pub mod s3;

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use enum_dispatch::enum_dispatch;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use once_cell::sync::Lazy;
use retry::delay::Exponential;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};

use crate::config::{RemoteState, Value};
use crate::constants::DEFAULT_BOOTSTRAP_RETRY_BUDGET_SECS;
use crate::output_cache::OutputMap;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("missing or invalid credentials for backend '{backend}'")]
    AuthError { backend: String },

    #[error("backend not bootstrapped for '{backend}' and bootstrap is disabled: {detail}")]
    MissingBackendError { backend: String, detail: String },

    #[error("bootstrap of '{backend}' failed: {detail}")]
    BootstrapFailed { backend: String, detail: String },

    #[error("migrate refused: source bucket '{bucket}' is not versioned (use --force)")]
    MigrateRefused { bucket: String },

    #[error("delete refused: bucket '{bucket}' is not versioned (use --force)")]
    DeleteRefused { bucket: String },

    #[error("unsupported backend kind '{0}'")]
    Unsupported(String),

    #[error("backend I/O error for '{backend}': {detail}")]
    Io { backend: String, detail: String },
}

static TOKIO_RUNTIME: Lazy<Mutex<Runtime>> = Lazy::new(|| {
    Mutex::new(
        Builder::new_current_thread()
            .thread_name("terragrunt-backend-io")
            .enable_all()
            .build()
            .expect("failed to build backend I/O runtime"),
    )
});

/// Drives an async cloud-SDK future to completion from synchronous code.
/// Every C6 call site goes through this single-threaded runtime rather than
/// pulling the whole engine onto an async executor.
pub fn block_on<F: Future>(future: F) -> F::Output {
    TOKIO_RUNTIME.lock().unwrap().block_on(future)
}

static BOOTSTRAP_LOCKS: Lazy<Mutex<HashMap<(String, String), Arc<Mutex<()>>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Serialises bootstrap calls for the same `(backend, bucket)` pair within
/// this process ("Remote-state bootstrap for the same bucket is serialised
/// via a process-local mutex keyed by (backend, bucket)").
fn bootstrap_lock(backend: &str, bucket: &str) -> Arc<Mutex<()>> {
    let key = (backend.to_string(), bucket.to_string());
    let mut locks = BOOTSTRAP_LOCKS.lock().unwrap();
    locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
}

type BootstrapLimiter = RateLimiter<(String, String), DefaultKeyedStateStore<(String, String)>, DefaultClock>;

static BOOTSTRAP_RATE_LIMITER: Lazy<BootstrapLimiter> =
    Lazy::new(|| RateLimiter::keyed(Quota::per_second(nonzero!(1u32))));

/// Blocks until a bootstrap call for `(backend, bucket)` is within the
/// per-key quota, bounding how hard concurrently-scheduled units hammer the
/// same cloud API while bootstrapping the same bucket.
pub fn throttle_bootstrap(backend: &str, bucket: &str) {
    let key = (backend.to_string(), bucket.to_string());
    let clock = DefaultClock::default();
    loop {
        match BOOTSTRAP_RATE_LIMITER.check_key(&key) {
            Ok(()) => return,
            Err(not_until) => std::thread::sleep(not_until.wait_time_from(clock.now())),
        }
    }
}

/// Adds up to 20% random jitter to a backoff delay, so that many units
/// retrying the same bootstrap call after a shared transient failure don't
/// all wake up and hammer the API on the same tick.
fn jittered(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let jitter_frac = rand::random::<f64>() * 0.2;
    delay + Duration::from_secs_f64(delay.as_secs_f64() * jitter_frac)
}

/// Runs `f`, retrying transient failures with bounded exponential backoff,
/// total wall-clock bounded by `DEFAULT_BOOTSTRAP_RETRY_BUDGET_SECS`.
pub fn with_retry<T, E, F>(mut f: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    let budget = Duration::from_secs(DEFAULT_BOOTSTRAP_RETRY_BUDGET_SECS);
    let mut elapsed = Duration::ZERO;
    let delays = Exponential::from_millis(200);
    let mut last_err = None;
    for delay in std::iter::once(Duration::ZERO).chain(delays) {
        if elapsed > budget {
            break;
        }
        let delay = jittered(delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        elapsed += delay;
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.expect("with_retry always attempts at least once"))
}

/// Derives the state object key/prefix from a unit's path relative to the
/// state root ("a pure function of the unit's relative path to the state
/// root, so two units never share a state object").
pub fn derive_state_key(unit_relpath: &Path) -> String {
    format!("{}/tofu.tfstate", unit_relpath.to_string_lossy().trim_end_matches('/'))
}

/// Parses a tofu/terraform state document's `outputs` block (`{"name": {
/// "value": ..., "type": ... }}`) into the same shape `engine::run` gets
/// from `terraform output -json`, for `--dependency-fetch-output-from-state`.
fn parse_state_outputs(backend: &str, bytes: &[u8]) -> Result<OutputMap, BackendError> {
    let parsed: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| BackendError::Io { backend: backend.to_string(), detail: format!("parsing state: {e}") })?;
    let outputs = parsed.get("outputs").and_then(serde_json::Value::as_object).cloned().unwrap_or_default();
    Ok(outputs
        .into_iter()
        .map(|(name, entry)| (name, Value::from(entry.get("value").cloned().unwrap_or(serde_json::Value::Null))))
        .collect())
}

#[enum_dispatch]
pub trait Backend {
    fn needs_bootstrap(&self, cfg: &RemoteState) -> Result<bool, BackendError>;
    fn bootstrap(&self, cfg: &RemoteState) -> Result<(), BackendError>;
    fn generate_backend_file(&self, cfg: &RemoteState, unit_relpath: &Path) -> Result<String, BackendError>;
    fn migrate(&self, cfg: &RemoteState, src_key: &str, dst_key: &str, force: bool) -> Result<(), BackendError>;
    fn delete(&self, cfg: &RemoteState, keys: &[String], force: bool) -> Result<(), BackendError>;
    /// Reads a unit's outputs directly from its persisted state, without
    /// staging or running the engine binary. Used by
    /// `--dependency-fetch-output-from-state` and by strict-include partial
    /// reruns to confirm a predecessor has state at all.
    fn read_outputs(&self, cfg: &RemoteState, unit_relpath: &Path) -> Result<OutputMap, BackendError>;
}

#[enum_dispatch(Backend)]
pub enum AnyBackend {
    S3(s3::S3Backend),
    Gcs(gcs::GcsBackend),
    Local(local::LocalBackend),
    Passthrough(local::PassthroughBackend),
}

/// Resolves the backend implementation named by `remote_state.backend`.
pub fn from_config(remote_state: &RemoteState) -> Result<AnyBackend, BackendError> {
    match remote_state.backend.as_str() {
        "s3" => Ok(AnyBackend::S3(s3::S3Backend::new())),
        "gcs" => Ok(AnyBackend::Gcs(gcs::GcsBackend::new())),
        "local" => Ok(AnyBackend::Local(local::LocalBackend)),
        "" => Ok(AnyBackend::Passthrough(local::PassthroughBackend)),
        other => Err(BackendError::Unsupported(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_state_key_from_relative_path() {
        assert_eq!(derive_state_key(Path::new("envs/prod/vpc")), "envs/prod/vpc/tofu.tfstate");
    }

    #[test]
    fn bootstrap_lock_is_stable_per_key() {
        let a = bootstrap_lock("s3", "my-bucket");
        let b = bootstrap_lock("s3", "my-bucket");
        assert!(Arc::ptr_eq(&a, &b));
        let c = bootstrap_lock("s3", "other-bucket");
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn with_retry_returns_first_success() {
        let mut calls = 0;
        let result: Result<i32, &str> = with_retry(|| {
            calls += 1;
            if calls < 2 {
                Err("transient")
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 2);
    }

    #[test]
    fn unknown_backend_kind_is_unsupported() {
        let rs = RemoteState { backend: "azurerm".to_string(), ..RemoteState::default() };
        let err = from_config(&rs).unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }

    #[test]
    fn parses_outputs_from_state_document() {
        let state = br#"{"version":4,"outputs":{"vpc_id":{"value":"vpc-1","type":"string"},"count":{"value":3,"type":"number"}}}"#;
        let outputs = parse_state_outputs("local", state).unwrap();
        assert_eq!(outputs.get("vpc_id"), Some(&Value::String("vpc-1".to_string())));
        assert_eq!(outputs.get("count"), Some(&Value::Number(3.0)));
    }

    #[test]
    fn parse_state_outputs_errors_on_malformed_json() {
        let err = parse_state_outputs("local", b"not json").unwrap_err();
        assert!(matches!(err, BackendError::Io { .. }));
    }
}
