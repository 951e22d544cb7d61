//! Default configuration constants for powerline.
//!
//! Shared between `LineConfig`, `ReplayConfig` and the CLI so the values stay in one place.

/// Capacity of each inter-stage buffer stream.
///
/// Bounded so a slow consumer applies backpressure to its producer instead of
/// letting queued sample buffers grow without limit.
pub const STREAM_CAPACITY: usize = 32;

/// Worker threads per parallel stage.
pub const PARALLEL_WORKERS: usize = 4;

/// Maximum out-of-order buffers held while restoring index order.
pub const REORDER_WINDOW: usize = 256;

/// Interval at which blocked stream reads and writes check for cancellation.
pub const POLL_INTERVAL_MS: u64 = 50;

/// Samples per buffer produced by the replay source and the rechunker.
pub const CHUNK_SIZE: usize = 500;

/// Prefix for stage thread names.
pub const THREAD_PREFIX: &str = "powerline";
