//! Log output for the command-line binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the binary.

use tracing_subscriber::EnvFilter;

/// Default filter for a verbosity level when `RUST_LOG` is unset.
pub fn default_filter(quiet: bool, verbose: u8) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "powerline=debug,info",
        (false, _) => "powerline=trace,debug",
    }
}

/// Installs a stderr subscriber. `RUST_LOG` wins over the verbosity flags.
///
/// Returns false if a subscriber was already installed.
pub fn init(quiet: bool, verbose: u8) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(quiet, verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(verbose > 0)
        .with_target(verbose > 1)
        .try_init()
        .is_ok()
}
