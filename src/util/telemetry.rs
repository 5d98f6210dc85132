//! Structured logging setup.

/// Install the process-wide tracing subscriber.
///
/// Uses an env-filter fmt subscriber (`RUST_LOG` controls verbosity). If the
/// embedding application already installed a subscriber this is a no-op, so
/// tests and library consumers can bring their own.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
