//! powerline - Staged processing of power monitor captures
//!
//! Buffers of samples flow from a source through sequential and parallel
//! stages, each on its own thread, joined by bounded streams.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
#[cfg(feature = "cli")]
pub mod logging;
pub mod monitor;
pub mod pipeline;

// Sources
pub use monitor::{IterSource, MockSampleSource, ReplaySource};

// Assembly line
pub use pipeline::orchestrator::{AssemblyLine, LineBuilder, RunningLine};
pub use pipeline::stages::{FnStage, MapStage, Rechunker};
pub use pipeline::types::{BufferList, IndexedBuffer, Sample, SampleBuffer, StreamItem};

// Error handling
pub use error::{PowerlineError, Result};

// Config
pub use config::{Config, LineConfig, ReplayConfig};

// Stage framework (for advanced users)
pub use pipeline::error::ErrorReporter;
pub use pipeline::{ParallelStage, SampleSource, SequentialStage, Transformer};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
