//! The execution engine's unified error taxonomy (spec §7).
//!
//! Every error a module can raise is one variant of [`EngineError`]. The
//! Workflow Executor never matches on error internals to decide whether to
//! retry — it calls [`EngineError::is_retryable`], so the retry policy in
//! §7's table lives in exactly one place.

use thiserror::Error;

/// An error raised anywhere in the execution engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Node Executor input-preparation failure (missing required input with
    /// no default).
    #[error("validation error: {0}")]
    Validation(String),

    /// Expression Evaluator parse or runtime failure.
    #[error("expression error: {0}")]
    Expression(String),

    /// HTTP Dispatcher network/timeout failure — the request never produced
    /// a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP Dispatcher received a response with status >= 400, or one whose
    /// body failed to parse as JSON.
    #[error("http error: status {status}")]
    Http {
        status: u16,
        /// Parsed JSON body, or a raw-text prefix (<=1 KiB) if parsing failed.
        body: serde_json::Value,
    },

    /// Repository lookup miss for a Node or Workflow.
    #[error("not found: {0}")]
    NotFound(String),

    /// The enclosing Job was cancelled; the check happens at a module
    /// boundary and is never itself retried.
    #[error("job cancelled")]
    Cancelled,
}

impl EngineError {
    /// Is this error eligible for the Workflow Executor's retry policy
    /// (subject to the module actually declaring one)? See spec §7.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Expression(_) | Self::Transport(_) | Self::Http { .. } => true,
            Self::NotFound(_) | Self::Cancelled => false,
        }
    }

    /// `true` for the two errors that must propagate immediately without
    /// ever touching the Job's retry policy.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        !self.is_retryable()
    }
}
