use crate::error::{PowerlineError, Result};
use crate::pipeline::source::SampleSource;
use crate::pipeline::transformer::StageInput;
use crate::pipeline::types::{Sample, SampleBuffer, StreamItem};
use std::collections::VecDeque;

/// Mock power monitor for testing
#[derive(Debug, Clone)]
pub struct MockSampleSource {
    is_initialized: bool,
    buffers: VecDeque<SampleBuffer>,
    reads: usize,
    fail_initialize: bool,
    fail_read_after: Option<usize>,
    error_message: String,
}

impl MockSampleSource {
    /// Create a mock that yields a single buffer of ten zero-valued samples
    pub fn new() -> Self {
        let flat = (0..10).map(|i| Sample::new(i as f64, 0.0)).collect();
        Self {
            is_initialized: false,
            buffers: VecDeque::from([flat]),
            reads: 0,
            fail_initialize: false,
            fail_read_after: None,
            error_message: "mock monitor error".to_string(),
        }
    }

    /// Configure the mock to return specific buffers, in order
    pub fn with_buffers(mut self, buffers: Vec<SampleBuffer>) -> Self {
        self.buffers = buffers.into();
        self
    }

    /// Configure the mock to fail on initialize
    pub fn with_initialize_failure(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Configure the mock to fail once `reads` buffers have been returned
    pub fn with_read_failure_after(mut self, reads: usize) -> Self {
        self.fail_read_after = Some(reads);
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the source was initialized
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    /// Number of buffers returned so far
    pub fn reads(&self) -> usize {
        self.reads
    }

    fn error(&self) -> PowerlineError {
        PowerlineError::Source {
            message: self.error_message.clone(),
        }
    }
}

impl Default for MockSampleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StageInput for MockSampleSource {
    fn initialize(&mut self) -> Result<()> {
        if self.fail_initialize {
            return Err(self.error());
        }
        self.is_initialized = true;
        Ok(())
    }
}

impl SampleSource for MockSampleSource {
    type Buffer = SampleBuffer;

    fn name(&self) -> &'static str {
        "mock-monitor"
    }

    fn read_buffer(&mut self) -> Result<StreamItem<SampleBuffer>> {
        if !self.is_initialized {
            return Err(PowerlineError::StreamNotInitialized);
        }
        if self.fail_read_after == Some(self.reads) {
            return Err(self.error());
        }
        let next = self.buffers.pop_front();
        if next.is_some() {
            self.reads += 1;
        }
        Ok(next.into())
    }
}
