//! Ordered mid-stage with dense re-indexing.

use crate::error::Result;
use crate::pipeline::stream::{StreamReader, StreamWriter};
use crate::pipeline::transformer::Transformer;
use crate::pipeline::types::{BufferList, IndexedBuffer, StreamItem};

/// Per-buffer logic of a stage that must see its input strictly in arrival order.
///
/// One input may produce any number of outputs, including none.
pub trait SequentialStage: Send + 'static {
    /// The buffer type this stage receives.
    type Input: Send + 'static;
    /// The buffer type this stage produces.
    type Output: Send + 'static;

    /// Returns the name of this stage for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Called once before the first buffer.
    fn on_begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Processes a single input buffer.
    fn transform_buffer(&mut self, buffer: Self::Input) -> Result<BufferList<Self::Output>>;

    /// Emits anything still held back once the input has ended.
    ///
    /// Sent before the output stream is ended.
    fn flush(&mut self) -> Result<BufferList<Self::Output>> {
        Ok(BufferList::empty())
    }

    /// Called once on shutdown, also after a failure.
    fn on_end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Runs a [`SequentialStage`] and numbers its outputs densely from `next_index`.
///
/// Output indices never have gaps, whatever the upstream indices or fan-out.
pub struct SequentialTransformer<S: SequentialStage> {
    stage: S,
    output: Option<StreamWriter<S::Output>>,
    next_index: u64,
}

impl<S: SequentialStage> SequentialTransformer<S> {
    pub fn new(stage: S) -> Self {
        Self {
            stage,
            output: None,
            next_index: 0,
        }
    }

    /// Starts output numbering at `index` instead of 0.
    pub fn with_start_index(mut self, index: u64) -> Self {
        self.next_index = index;
        self
    }

    /// Index the next emitted buffer will receive.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    /// Emits `buffers` with indices `next_index..next_index + n`, in order.
    ///
    /// Accepts a [`BufferList`] or a single raw buffer. An empty list emits
    /// nothing and leaves the counter untouched.
    pub fn send_buffers(&mut self, buffers: impl Into<BufferList<S::Output>>) -> Result<()> {
        for buffer in buffers.into() {
            if let Some(output) = self.output.as_mut() {
                output.add_indexed_buffer(IndexedBuffer::new(self.next_index, buffer))?;
            }
            self.next_index += 1;
        }
        Ok(())
    }
}

impl<S: SequentialStage> Transformer for SequentialTransformer<S> {
    type Input = StreamReader<S::Input>;
    type Output = S::Output;

    fn name(&self) -> &'static str {
        self.stage.name()
    }

    fn set_output_stream(&mut self, stream: StreamWriter<S::Output>) {
        self.output = Some(stream);
    }

    fn output_stream_mut(&mut self) -> Option<&mut StreamWriter<S::Output>> {
        self.output.as_mut()
    }

    fn on_begin(&mut self) -> Result<()> {
        self.stage.on_begin()
    }

    fn run(&mut self, input: &mut StreamReader<S::Input>) -> Result<()> {
        while let StreamItem::Data(item) = input.remove_indexed_buffer()? {
            let outputs = self.stage.transform_buffer(item.buffer)?;
            self.send_buffers(outputs)?;
        }
        let tail = self.stage.flush()?;
        self.send_buffers(tail)?;
        match self.output.as_mut() {
            Some(output) => output.end_stream(),
            None => Ok(()),
        }
    }

    fn on_end(&mut self) -> Result<()> {
        self.stage.on_end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PowerlineError;
    use crate::pipeline::stream::BufferStream;

    // Emits `input` copies of each value (so 0 drops it).
    struct Repeat;

    impl SequentialStage for Repeat {
        type Input = u32;
        type Output = u32;

        fn name(&self) -> &'static str {
            "repeat"
        }

        fn transform_buffer(&mut self, buffer: u32) -> Result<BufferList<u32>> {
            Ok(std::iter::repeat_n(buffer, buffer as usize).collect())
        }
    }

    struct Identity;

    impl SequentialStage for Identity {
        type Input = char;
        type Output = char;

        fn name(&self) -> &'static str {
            "identity"
        }

        fn transform_buffer(&mut self, buffer: char) -> Result<BufferList<char>> {
            Ok(buffer.into())
        }
    }

    fn wired<S: SequentialStage>(
        stage: SequentialTransformer<S>,
    ) -> (SequentialTransformer<S>, StreamReader<S::Output>) {
        let (writer, mut reader) = BufferStream::new(64).split();
        let mut stage = stage;
        stage.set_output_stream(writer);
        stage.output_stream_mut().unwrap().initialize().unwrap();
        reader.initialize().unwrap();
        (stage, reader)
    }

    fn feed<B: Send>(items: Vec<(u64, B)>) -> StreamReader<B> {
        let (mut writer, reader) = BufferStream::new(64).split();
        writer.initialize().unwrap();
        for (index, buffer) in items {
            writer.add_indexed_buffer(IndexedBuffer::new(index, buffer)).unwrap();
        }
        writer.end_stream().unwrap();
        reader
    }

    #[test]
    fn test_send_buffers_assigns_consecutive_indices() {
        let (mut stage, mut reader) = wired(SequentialTransformer::new(Repeat).with_start_index(5));

        stage
            .send_buffers(BufferList::new(vec![10u32, 11, 12]))
            .unwrap();

        assert_eq!(stage.next_index(), 8);
        stage.output_stream_mut().unwrap().end_stream().unwrap();
        let indices: Vec<u64> = reader
            .collect_remaining()
            .unwrap()
            .iter()
            .map(|b| b.index)
            .collect();
        assert_eq!(indices, vec![5, 6, 7]);
    }

    #[test]
    fn test_send_empty_list_is_noop() {
        let (mut stage, mut reader) = wired(SequentialTransformer::new(Repeat).with_start_index(3));

        stage.send_buffers(BufferList::empty()).unwrap();

        assert_eq!(stage.next_index(), 3);
        stage.output_stream_mut().unwrap().end_stream().unwrap();
        assert!(reader.collect_remaining().unwrap().is_empty());
    }

    #[test]
    fn test_send_single_raw_buffer() {
        let (mut stage, mut reader) = wired(SequentialTransformer::new(Repeat));

        stage.send_buffers(42u32).unwrap();

        assert_eq!(stage.next_index(), 1);
        stage.output_stream_mut().unwrap().end_stream().unwrap();
        assert_eq!(
            reader.collect_remaining().unwrap(),
            vec![IndexedBuffer::new(0, 42)]
        );
    }

    #[test]
    fn test_reindexes_densely_under_variable_fan_out() {
        let (writer, mut reader) = BufferStream::new(64).split();
        let mut stage = SequentialTransformer::new(Repeat);
        stage.set_output_stream(writer);
        // Upstream indices are sparse and the fan-out is 2, 0, 3, 1.
        let input = feed(vec![(4, 2), (9, 0), (10, 3), (20, 1)]);

        stage.transform(input).unwrap();

        reader.initialize().unwrap();
        let received: Vec<(u64, u32)> = reader
            .collect_remaining()
            .unwrap()
            .into_iter()
            .map(|b| (b.index, b.buffer))
            .collect();
        assert_eq!(
            received,
            vec![(0, 2), (1, 2), (2, 3), (3, 3), (4, 3), (5, 1)]
        );
        assert_eq!(stage.next_index(), 6);
    }

    #[test]
    fn test_identity_preserves_arrival_order() {
        let (writer, mut reader) = BufferStream::new(8).split();
        let mut stage = SequentialTransformer::new(Identity);
        stage.set_output_stream(writer);

        stage
            .transform(feed(vec![(0, 'a'), (1, 'b'), (2, 'c')]))
            .unwrap();

        reader.initialize().unwrap();
        assert_eq!(
            reader.collect_remaining().unwrap(),
            vec![
                IndexedBuffer::new(0, 'a'),
                IndexedBuffer::new(1, 'b'),
                IndexedBuffer::new(2, 'c'),
            ]
        );
        assert_eq!(reader.remove_indexed_buffer().unwrap(), StreamItem::End);
    }

    #[test]
    fn test_flush_is_sent_before_end() {
        struct Batch {
            held: Vec<u8>,
        }

        impl SequentialStage for Batch {
            type Input = u8;
            type Output = Vec<u8>;

            fn name(&self) -> &'static str {
                "batch"
            }

            fn transform_buffer(&mut self, buffer: u8) -> Result<BufferList<Vec<u8>>> {
                self.held.push(buffer);
                if self.held.len() == 2 {
                    return Ok(std::mem::take(&mut self.held).into());
                }
                Ok(BufferList::empty())
            }

            fn flush(&mut self) -> Result<BufferList<Vec<u8>>> {
                if self.held.is_empty() {
                    Ok(BufferList::empty())
                } else {
                    Ok(std::mem::take(&mut self.held).into())
                }
            }
        }

        let (writer, mut reader) = BufferStream::new(8).split();
        let mut stage = SequentialTransformer::new(Batch { held: Vec::new() });
        stage.set_output_stream(writer);

        stage
            .transform(feed(vec![(0, 1), (1, 2), (2, 3)]))
            .unwrap();

        reader.initialize().unwrap();
        assert_eq!(
            reader.collect_remaining().unwrap(),
            vec![IndexedBuffer::new(0, vec![1, 2]), IndexedBuffer::new(1, vec![3])]
        );
    }

    #[test]
    fn test_transform_error_propagates_and_aborts() {
        struct Failing;

        impl SequentialStage for Failing {
            type Input = u8;
            type Output = u8;

            fn name(&self) -> &'static str {
                "failing"
            }

            fn transform_buffer(&mut self, buffer: u8) -> Result<BufferList<u8>> {
                if buffer == 2 {
                    return Err(PowerlineError::transform("failing", "bad sample"));
                }
                Ok(buffer.into())
            }
        }

        let (writer, mut reader) = BufferStream::new(8).split();
        let mut stage = SequentialTransformer::new(Failing);
        stage.set_output_stream(writer);

        let err = stage
            .transform(feed(vec![(0, 1), (1, 2), (2, 3)]))
            .unwrap_err();
        assert!(matches!(err, PowerlineError::Transform { .. }));

        reader.initialize().unwrap();
        assert_eq!(
            reader.remove_indexed_buffer().unwrap(),
            StreamItem::Data(IndexedBuffer::new(0, 1))
        );
        assert!(matches!(
            reader.remove_indexed_buffer(),
            Err(PowerlineError::UpstreamAborted)
        ));
    }

    #[test]
    fn test_upstream_abort_fails_stage() {
        let (mut writer, reader) = BufferStream::new(8).split();
        writer.initialize().unwrap();
        writer.add_indexed_buffer(IndexedBuffer::new(0, 'a')).unwrap();
        writer.abort();

        let mut stage = SequentialTransformer::new(Identity);
        let err = stage.transform(reader).unwrap_err();
        assert!(matches!(err, PowerlineError::UpstreamAborted));
    }
}
