//! Engine configuration (spec §4.7, §6): four knobs, loaded once from
//! environment variables, validated at startup, then threaded explicitly
//! down the Worker → Executor → Node-Executor chain. Nothing here is a
//! global — every consumer receives an [`EngineConfig`] by value or
//! reference from its caller.

use std::env;
use std::time::Duration;

use thiserror::Error;

const WORKER_POLL_INTERVAL_SECONDS: &str = "WORKER_POLL_INTERVAL_SECONDS";
const WORKER_BATCH_SIZE: &str = "WORKER_BATCH_SIZE";
const NODE_HTTP_TIMEOUT_SECONDS: &str = "NODE_HTTP_TIMEOUT_SECONDS";
const PER_WORKFLOW_POOL_SIZE: &str = "PER_WORKFLOW_POOL_SIZE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: '{value}' is not a valid positive integer")]
    InvalidValue { var: &'static str, value: String },
}

/// The four knobs in spec §6, all positive integers with documented
/// defaults. `node_http_timeout_seconds` and `per_workflow_pool_size`
/// additionally bound the HTTP dispatcher's timeout and the workflow
/// executor's bounded task pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub worker_poll_interval_seconds: u64,
    pub worker_batch_size: usize,
    pub node_http_timeout_seconds: u64,
    pub per_workflow_pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_poll_interval_seconds: 5,
            worker_batch_size: 5,
            node_http_timeout_seconds: 300,
            per_workflow_pool_size: 10,
        }
    }
}

impl EngineConfig {
    /// Loads from environment variables, falling back to the documented
    /// default for any that are unset. An unparseable or non-positive value
    /// for a *set* variable fails fast rather than silently falling back.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// The actual loader, parameterized over a variable lookup so tests can
    /// supply one without mutating the real process environment.
    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            worker_poll_interval_seconds: parse_positive(
                &lookup,
                WORKER_POLL_INTERVAL_SECONDS,
                defaults.worker_poll_interval_seconds,
            )?,
            worker_batch_size: parse_positive(&lookup, WORKER_BATCH_SIZE, defaults.worker_batch_size as u64)?
                as usize,
            node_http_timeout_seconds: parse_positive(
                &lookup,
                NODE_HTTP_TIMEOUT_SECONDS,
                defaults.node_http_timeout_seconds,
            )?,
            per_workflow_pool_size: parse_positive(
                &lookup,
                PER_WORKFLOW_POOL_SIZE,
                defaults.per_workflow_pool_size as u64,
            )? as usize,
        })
    }

    #[must_use]
    pub fn node_http_timeout(&self) -> Duration {
        Duration::from_secs(self.node_http_timeout_seconds)
    }

    #[must_use]
    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_secs(self.worker_poll_interval_seconds)
    }
}

fn parse_positive(
    lookup: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue { var, value: raw }),
    }
}
