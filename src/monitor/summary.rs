use crate::pipeline::types::Sample;
use std::fmt;

/// Per-buffer statistics printed by `powerline replay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferSummary {
    pub samples: usize,
    pub first_timestamp: Option<f64>,
    pub last_timestamp: Option<f64>,
    pub mean: Option<f64>,
}

impl BufferSummary {
    pub fn of(samples: &[Sample]) -> Self {
        let mean = (!samples.is_empty())
            .then(|| samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64);
        Self {
            samples: samples.len(),
            first_timestamp: samples.first().map(|s| s.timestamp),
            last_timestamp: samples.last().map(|s| s.timestamp),
            mean,
        }
    }
}

impl fmt::Display for BufferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.first_timestamp, self.last_timestamp, self.mean) {
            (Some(first), Some(last), Some(mean)) => write!(
                f,
                "{} samples  {:.3}s..{:.3}s  mean {:.4}",
                self.samples, first, last, mean
            ),
            _ => write!(f, "0 samples"),
        }
    }
}
