use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber from `CHATPIPE_LOG`, falling
/// back to `RUST_LOG`, then to `warn`. Later calls are no-ops, so tests and
/// embedding binaries can both call this freely.
pub fn init_tracing() {
    let filter = std::env::var("CHATPIPE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
