//! Tracing setup for hosts embedding the engine.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, or `default_filter`
/// when it is unset or unparsable.
///
/// Returns `false` if a global subscriber was already installed; calling
/// this more than once is harmless.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        init_tracing("vibe_sync_client=debug");
        assert!(!init_tracing("info"));
    }
}
