//! Producer stage: turns external reads into a sequentially indexed stream.

use crate::error::Result;
use crate::pipeline::stream::StreamWriter;
use crate::pipeline::transformer::{StageInput, Transformer};
use crate::pipeline::types::{IndexedBuffer, StreamItem};
use std::marker::PhantomData;
use tracing::trace;

/// An external supplier of raw buffers, such as a power monitor.
///
/// This trait allows swapping implementations (real device, recorded capture, mock).
/// `initialize` (from [`StageInput`]) is called once before the first read.
pub trait SampleSource: StageInput + 'static {
    /// Buffer type produced by each read.
    type Buffer: Send + 'static;

    /// Returns the name of this source for logging and error reporting.
    fn name(&self) -> &'static str {
        "source"
    }

    /// Reads the next buffer, blocking until one is available.
    ///
    /// Returns [`StreamItem::End`] once the source is exhausted; it is not read again after that.
    fn read_buffer(&mut self) -> Result<StreamItem<Self::Buffer>>;
}

/// Stage that pulls from a [`SampleSource`] and indexes each buffer from 0.
///
/// It has no upstream stream: the source handle itself is the stage input.
pub struct SourceTransformer<S: SampleSource> {
    name: &'static str,
    output: Option<StreamWriter<S::Buffer>>,
    next_index: u64,
    _source: PhantomData<fn() -> S>,
}

impl<S: SampleSource> SourceTransformer<S> {
    pub fn new() -> Self {
        Self {
            name: "source",
            output: None,
            next_index: 0,
            _source: PhantomData,
        }
    }

    /// Overrides the stage name used in logs.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Index the next buffer will receive.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }
}

impl<S: SampleSource> Default for SourceTransformer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SampleSource> Transformer for SourceTransformer<S> {
    type Input = S;
    type Output = S::Buffer;

    fn name(&self) -> &'static str {
        self.name
    }

    fn set_output_stream(&mut self, stream: StreamWriter<S::Buffer>) {
        self.output = Some(stream);
    }

    fn output_stream_mut(&mut self) -> Option<&mut StreamWriter<S::Buffer>> {
        self.output.as_mut()
    }

    fn run(&mut self, source: &mut S) -> Result<()> {
        loop {
            match source.read_buffer()? {
                StreamItem::End => {
                    trace!(stage = self.name, buffers = self.next_index, "source exhausted");
                    if let Some(output) = self.output.as_mut() {
                        output.end_stream()?;
                    }
                    return Ok(());
                }
                StreamItem::Data(buffer) => {
                    if let Some(output) = self.output.as_mut() {
                        output.add_indexed_buffer(IndexedBuffer::new(self.next_index, buffer))?;
                    }
                    self.next_index += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PowerlineError;
    use crate::pipeline::stream::BufferStream;
    use std::collections::VecDeque;

    struct Script {
        items: VecDeque<Result<StreamItem<char>>>,
        reads_after_end: usize,
        ended: bool,
    }

    impl Script {
        fn new(items: Vec<Result<StreamItem<char>>>) -> Self {
            Self {
                items: items.into(),
                reads_after_end: 0,
                ended: false,
            }
        }
    }

    impl StageInput for Script {}

    impl SampleSource for Script {
        type Buffer = char;

        fn read_buffer(&mut self) -> Result<StreamItem<char>> {
            if self.ended {
                self.reads_after_end += 1;
            }
            let item = self.items.pop_front().unwrap_or(Ok(StreamItem::End));
            if matches!(item, Ok(StreamItem::End)) {
                self.ended = true;
            }
            item
        }
    }

    #[test]
    fn test_indexes_from_zero_in_order() {
        let (writer, mut reader) = BufferStream::new(8).split();
        let mut stage = SourceTransformer::<Script>::new();
        stage.set_output_stream(writer);
        let source = Script::new(vec![
            Ok(StreamItem::Data('a')),
            Ok(StreamItem::Data('b')),
            Ok(StreamItem::Data('c')),
            Ok(StreamItem::End),
        ]);

        stage.transform(source).unwrap();

        reader.initialize().unwrap();
        let received: Vec<(u64, char)> = reader
            .collect_remaining()
            .unwrap()
            .into_iter()
            .map(|b| (b.index, b.buffer))
            .collect();
        assert_eq!(received, vec![(0, 'a'), (1, 'b'), (2, 'c')]);
        assert_eq!(stage.next_index(), 3);
        assert_eq!(reader.remove_indexed_buffer().unwrap(), StreamItem::End);
    }

    #[test]
    fn test_empty_source_only_ends() {
        let (writer, mut reader) = BufferStream::new(2).split();
        let mut stage = SourceTransformer::<Script>::new();
        stage.set_output_stream(writer);

        stage.transform(Script::new(vec![Ok(StreamItem::End)])).unwrap();

        reader.initialize().unwrap();
        assert_eq!(reader.remove_indexed_buffer().unwrap(), StreamItem::End);
        assert_eq!(stage.next_index(), 0);
    }

    #[test]
    fn test_read_failure_aborts_downstream() {
        let (writer, mut reader) = BufferStream::new(4).split();
        let mut stage = SourceTransformer::<Script>::new().with_name("monitor");
        stage.set_output_stream(writer);
        let source = Script::new(vec![
            Ok(StreamItem::Data('a')),
            Err(PowerlineError::Source {
                message: "usb disconnected".to_string(),
            }),
        ]);

        let err = stage.transform(source).unwrap_err();
        assert!(err.to_string().contains("usb disconnected"));

        reader.initialize().unwrap();
        assert!(matches!(
            reader.remove_indexed_buffer().unwrap(),
            StreamItem::Data(_)
        ));
        assert!(matches!(
            reader.remove_indexed_buffer(),
            Err(PowerlineError::UpstreamAborted)
        ));
    }

    #[test]
    fn test_not_read_after_end() {
        let mut stage = SourceTransformer::<Script>::new();
        let mut source = Script::new(vec![Ok(StreamItem::Data('a')), Ok(StreamItem::End)]);

        StageInput::initialize(&mut source).unwrap();
        stage.run(&mut source).unwrap();

        assert!(source.ended);
        assert_eq!(source.reads_after_end, 0);
    }
}
