//! Optional logging setup for binaries embedding this crate.
//!
//! The library itself only emits `tracing` events and never installs a
//! subscriber. Enable the `fmt-log` feature and call [`init`] from `main`
//! to get formatted output honoring `RUST_LOG`.

/// Install a process-wide fmt subscriber. Safe to call more than once; later
/// calls are no-ops.
#[cfg(feature = "fmt-log")]
pub fn init() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("logging already initialized");
    }
}
