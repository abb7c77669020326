//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install a stderr fmt subscriber. The filter comes from `TSQA_LOG`, then
/// `RUST_LOG`, then defaults to `info`. Safe to call more than once.
pub fn init() {
    let filter = EnvFilter::try_from_env("TSQA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
