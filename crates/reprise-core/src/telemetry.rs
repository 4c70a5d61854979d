use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber for applications embedding the
/// reprocessor.
///
/// Debug builds log human-readable lines, release builds log JSON. The
/// level comes from `RUST_LOG` and defaults to `info`. Returns an error if a
/// global subscriber is already installed.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    }
}
