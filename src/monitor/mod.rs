//! Sample sources that feed an assembly line.

pub mod mock;
pub mod replay;
pub mod summary;

pub use mock::MockSampleSource;
pub use replay::ReplaySource;
pub use summary::BufferSummary;

use crate::error::Result;
use crate::pipeline::source::SampleSource;
use crate::pipeline::transformer::StageInput;
use crate::pipeline::types::StreamItem;

/// Source that yields every item of an iterator as one buffer, then ends.
pub struct IterSource<I> {
    items: I,
    name: &'static str,
}

impl<I: Iterator> IterSource<I> {
    pub fn new(items: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            items: items.into_iter(),
            name: "iter",
        }
    }

    /// Overrides the stage name used in logs.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl<I> StageInput for IterSource<I> where I: Iterator + Send {}

impl<I> SampleSource for IterSource<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    type Buffer = I::Item;

    fn name(&self) -> &'static str {
        self.name
    }

    fn read_buffer(&mut self) -> Result<StreamItem<I::Item>> {
        Ok(self.items.next().into())
    }
}
