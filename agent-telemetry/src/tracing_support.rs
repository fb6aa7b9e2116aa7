//! Structured tracing helpers.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Installs a formatted subscriber honouring `RUST_LOG`, falling back to
/// `default_directive` (or `info`) when the variable is unset or invalid.
///
/// Safe to call more than once; only the first call has an effect. Returns
/// `true` when this process' global subscriber is the one installed here.
pub fn init(default_directive: Option<&str>) -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_directive.unwrap_or(DEFAULT_DIRECTIVE)))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .try_init()
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let first = init(Some("debug"));
        let second = init(None);
        assert_eq!(first, second);
    }
}
