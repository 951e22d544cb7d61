//! Replays a recorded monitor capture from CSV.
//!
//! Each row is `timestamp,value`. Rows are grouped into buffers of
//! `chunk_size` samples; the last buffer may be shorter.

use crate::config::ReplayConfig;
use crate::error::{PowerlineError, Result};
use crate::pipeline::source::SampleSource;
use crate::pipeline::transformer::StageInput;
use crate::pipeline::types::{Sample, SampleBuffer, StreamItem};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use tracing::debug;

type Records = csv::DeserializeRecordsIntoIter<Box<dyn Read + Send>, Sample>;

/// Sample source that reads a capture file instead of a live monitor.
pub struct ReplaySource {
    path: Option<PathBuf>,
    records: Option<Records>,
    chunk_size: usize,
    has_headers: bool,
    samples_read: u64,
}

impl ReplaySource {
    /// Replays the file at `path`. The file is opened by `initialize`.
    pub fn open(path: impl Into<PathBuf>, config: &ReplayConfig) -> Self {
        Self {
            path: Some(path.into()),
            records: None,
            chunk_size: config.chunk_size.max(1),
            has_headers: config.has_headers,
            samples_read: 0,
        }
    }

    /// Replays CSV data from any reader (for testing/flexibility).
    pub fn from_reader(reader: impl Read + Send + 'static, config: &ReplayConfig) -> Self {
        Self {
            path: None,
            records: Some(records(Box::new(reader), config.has_headers)),
            chunk_size: config.chunk_size.max(1),
            has_headers: config.has_headers,
            samples_read: 0,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Samples emitted so far.
    pub fn samples_read(&self) -> u64 {
        self.samples_read
    }
}

fn records(reader: Box<dyn Read + Send>, has_headers: bool) -> Records {
    csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .trim(csv::Trim::All)
        .from_reader(reader)
        .into_deserialize()
}

impl StageInput for ReplaySource {
    fn initialize(&mut self) -> Result<()> {
        if self.records.is_some() {
            return Ok(());
        }
        let path = self.path.as_ref().ok_or_else(|| PowerlineError::Source {
            message: "no capture to replay".to_string(),
        })?;
        let file = File::open(path).map_err(|e| PowerlineError::Source {
            message: format!("Failed to open capture {}: {}", path.display(), e),
        })?;
        debug!(path = %path.display(), chunk_size = self.chunk_size, "replaying capture");
        self.records = Some(records(Box::new(file), self.has_headers));
        Ok(())
    }
}

impl SampleSource for ReplaySource {
    type Buffer = SampleBuffer;

    fn name(&self) -> &'static str {
        "replay"
    }

    fn read_buffer(&mut self) -> Result<StreamItem<SampleBuffer>> {
        let records = self
            .records
            .as_mut()
            .ok_or(PowerlineError::StreamNotInitialized)?;

        let mut buffer = Vec::with_capacity(self.chunk_size);
        while buffer.len() < self.chunk_size {
            match records.next() {
                Some(sample) => buffer.push(sample?),
                None => break,
            }
        }

        if buffer.is_empty() {
            debug!(samples = self.samples_read, "capture exhausted");
            return Ok(StreamItem::End);
        }
        self.samples_read += buffer.len() as u64;
        Ok(StreamItem::Data(buffer))
    }
}
