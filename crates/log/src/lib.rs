//! Tracing initialization for the execution engine (spec §4.7).
//!
//! A single [`init`] call at process start, honouring `RUST_LOG` (falling
//! back to `info` for this crate's own spans when unset). Calling it more
//! than once — the worker loop's integration tests do, once per test binary
//! — is a no-op past the first call rather than a panic.

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. Safe to call from multiple
/// tests in the same binary: only the first call takes effect.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
