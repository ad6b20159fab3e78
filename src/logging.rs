//! Structured logging setup.
//!
//! Log lines go to stderr so command output on stdout stays machine
//! readable. The filter is taken from `KBE_LOG`, then `RUST_LOG`, then
//! falls back to `info`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "KBE_LOG";

fn env_filter(verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(if verbose { "debug" } else { "info" })
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}
