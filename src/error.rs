//! Error types for powerline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PowerlineError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Stream protocol violations
    #[error("Buffer stream used before initialize()")]
    StreamNotInitialized,

    #[error("Buffer {index} added after end_stream()")]
    StreamEnded { index: u64 },

    #[error("Upstream stage aborted before ending its stream")]
    UpstreamAborted,

    #[error("Downstream stage stopped reading")]
    DownstreamClosed,

    #[error("Pipeline cancelled")]
    Cancelled,

    // Ordering errors
    #[error("Duplicate buffer index {index}")]
    DuplicateIndex { index: u64 },

    #[error("Stream ended while waiting for buffer {expected}")]
    MissingIndex { expected: u64 },

    #[error("Reorder window overflow: {pending} buffers pending while waiting for {expected}")]
    ReorderOverflow { pending: usize, expected: u64 },

    // Stage errors
    #[error("Sample source error: {message}")]
    Source { message: String },

    #[error("Transform failed in {stage}: {message}")]
    Transform { stage: String, message: String },

    #[error("Stage '{stage}' thread panicked")]
    StagePanicked { stage: String },

    // Replay input errors
    #[error("Failed to read capture: {0}")]
    Csv(#[from] csv::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl PowerlineError {
    /// Errors that are a consequence of another stage's failure rather than a cause.
    pub fn is_secondary(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::UpstreamAborted | Self::DownstreamClosed
        )
    }

    /// Shorthand for a transform failure inside a named stage.
    pub fn transform(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transform {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, PowerlineError>;
