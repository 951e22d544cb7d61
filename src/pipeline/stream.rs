//! Inter-stage buffer streams.
//!
//! A [`BufferStream`] is a bounded FIFO with exactly one writer and one reader.
//! It is split into a [`StreamWriter`] owned by the upstream stage and a
//! [`StreamReader`] owned by the downstream stage, so the single-writer and
//! single-reader rules are enforced by ownership.
//!
//! The writer terminates the stream with [`StreamWriter::end_stream`]. A writer
//! that fails calls [`StreamWriter::abort`] instead; dropping a writer that was
//! never ended counts as an abort, so a reader can never wait forever on a
//! stage that is gone.

use crate::defaults;
use crate::error::{PowerlineError, Result};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::reorder::ReorderBuffer;
use crate::pipeline::transformer::StageInput;
use crate::pipeline::types::{IndexedBuffer, StreamItem};
use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// What actually travels through the channel.
enum Frame<B> {
    Buffer(IndexedBuffer<B>),
    End,
    Abort,
}

/// A freshly wired stream, not yet handed to its two stages.
pub struct BufferStream<B> {
    writer: StreamWriter<B>,
    reader: StreamReader<B>,
}

impl<B: Send> BufferStream<B> {
    /// Creates a stream holding at most `capacity` buffers, with its own cancel token.
    pub fn new(capacity: usize) -> Self {
        Self::with_cancel(
            capacity,
            CancelToken::new(),
            Duration::from_millis(defaults::POLL_INTERVAL_MS),
        )
    }

    /// Creates a stream whose blocking operations stop once `cancel` fires.
    ///
    /// `poll_interval` bounds how long a blocked read or write takes to notice.
    pub fn with_cancel(capacity: usize, cancel: CancelToken, poll_interval: Duration) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            writer: StreamWriter {
                tx: Some(tx),
                initialized: false,
                ended: false,
                cancel: cancel.clone(),
                poll_interval,
            },
            reader: StreamReader {
                rx,
                initialized: false,
                state: ReadState::Open,
                cancel,
                poll_interval,
                reorder: None,
            },
        }
    }

    /// Separates the writing and reading halves.
    pub fn split(self) -> (StreamWriter<B>, StreamReader<B>) {
        (self.writer, self.reader)
    }
}

/// The upstream half of a [`BufferStream`].
pub struct StreamWriter<B> {
    tx: Option<Sender<Frame<B>>>,
    initialized: bool,
    ended: bool,
    cancel: CancelToken,
    poll_interval: Duration,
}

impl<B: Send> StreamWriter<B> {
    /// Marks the writer ready. Calling it again has no effect.
    pub fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    /// Appends a buffer, blocking while the stream is full.
    ///
    /// Adding after [`end_stream`](Self::end_stream) is a protocol violation.
    pub fn add_indexed_buffer(&mut self, item: IndexedBuffer<B>) -> Result<()> {
        if self.ended {
            return Err(PowerlineError::StreamEnded { index: item.index });
        }
        if !self.initialized {
            return Err(PowerlineError::StreamNotInitialized);
        }
        self.send(Frame::Buffer(item))
    }

    /// Terminates the stream. Ending an already ended stream does nothing.
    pub fn end_stream(&mut self) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        let result = self.send(Frame::End);
        self.tx = None;
        result
    }

    /// Terminates the stream after a failure without blocking.
    ///
    /// The reader sees [`PowerlineError::UpstreamAborted`]. No effect once ended.
    pub fn abort(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        if let Some(tx) = self.tx.take() {
            // A full queue is fine: dropping the sender reads as an abort too.
            let _ = tx.try_send(Frame::Abort);
        }
    }

    /// True once the stream was ended or aborted.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// The cancel token this stream observes.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn send(&mut self, mut frame: Frame<B>) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(PowerlineError::DownstreamClosed);
        };
        loop {
            if self.cancel.is_cancelled() {
                return Err(PowerlineError::Cancelled);
            }
            match tx.send_timeout(frame, self.poll_interval) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => frame = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(PowerlineError::DownstreamClosed);
                }
            }
        }
    }
}

impl<B> std::fmt::Debug for StreamWriter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("initialized", &self.initialized)
            .field("ended", &self.ended)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Open,
    Ended,
    Aborted,
}

/// The downstream half of a [`BufferStream`].
pub struct StreamReader<B> {
    rx: Receiver<Frame<B>>,
    initialized: bool,
    state: ReadState,
    cancel: CancelToken,
    poll_interval: Duration,
    reorder: Option<ReorderBuffer<B>>,
}

impl<B: Send> StreamReader<B> {
    /// Marks the reader ready. Calling it again has no effect.
    pub fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    /// Switches the reader to index order.
    ///
    /// Buffers are then released gap-free starting at `start_index`, holding
    /// at most `max_pending` early arrivals.
    pub fn ordered(mut self, start_index: u64, max_pending: usize) -> Self {
        self.reorder = Some(ReorderBuffer::new(start_index, max_pending));
        self
    }

    /// True when the reader restores index order.
    pub fn is_ordered(&self) -> bool {
        self.reorder.is_some()
    }

    /// Takes the next buffer, blocking until data or the end marker arrives.
    ///
    /// After the end marker every call returns [`StreamItem::End`].
    pub fn remove_indexed_buffer(&mut self) -> Result<StreamItem<IndexedBuffer<B>>> {
        self.remove_unless(None)
    }

    /// Like [`remove_indexed_buffer`](Self::remove_indexed_buffer), but gives up
    /// with [`PowerlineError::Cancelled`] once `halted` is set.
    pub(crate) fn remove_or_halt(
        &mut self,
        halted: &AtomicBool,
    ) -> Result<StreamItem<IndexedBuffer<B>>> {
        self.remove_unless(Some(halted))
    }

    /// True once the end marker has been observed.
    pub fn is_ended(&self) -> bool {
        self.state == ReadState::Ended
    }

    /// Drains the stream to its end marker.
    pub fn collect_remaining(&mut self) -> Result<Vec<IndexedBuffer<B>>> {
        let mut buffers = Vec::new();
        while let StreamItem::Data(item) = self.remove_indexed_buffer()? {
            buffers.push(item);
        }
        Ok(buffers)
    }

    fn remove_unless(
        &mut self,
        halted: Option<&AtomicBool>,
    ) -> Result<StreamItem<IndexedBuffer<B>>> {
        if !self.initialized {
            return Err(PowerlineError::StreamNotInitialized);
        }
        loop {
            if let Some(ready) = self.reorder.as_mut().and_then(ReorderBuffer::pop_ready) {
                return Ok(StreamItem::Data(ready));
            }
            match self.recv_frame(halted)? {
                StreamItem::Data(item) => match self.reorder.as_mut() {
                    Some(reorder) => reorder.push(item)?,
                    None => return Ok(StreamItem::Data(item)),
                },
                StreamItem::End => {
                    if let Some(reorder) = self.reorder.as_ref() {
                        reorder.finish()?;
                    }
                    return Ok(StreamItem::End);
                }
            }
        }
    }

    fn recv_frame(&mut self, halted: Option<&AtomicBool>) -> Result<StreamItem<IndexedBuffer<B>>> {
        match self.state {
            ReadState::Ended => return Ok(StreamItem::End),
            ReadState::Aborted => return Err(PowerlineError::UpstreamAborted),
            ReadState::Open => {}
        }
        loop {
            let stop = halted.is_some_and(|flag| flag.load(Ordering::SeqCst));
            if stop || self.cancel.is_cancelled() {
                return Err(PowerlineError::Cancelled);
            }
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(Frame::Buffer(item)) => return Ok(StreamItem::Data(item)),
                Ok(Frame::End) => {
                    self.state = ReadState::Ended;
                    return Ok(StreamItem::End);
                }
                Ok(Frame::Abort) | Err(RecvTimeoutError::Disconnected) => {
                    self.state = ReadState::Aborted;
                    return Err(PowerlineError::UpstreamAborted);
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}

impl<B: Send> StageInput for StreamReader<B> {
    fn initialize(&mut self) -> Result<()> {
        StreamReader::initialize(self)
    }
}

impl<B> std::fmt::Debug for StreamReader<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("initialized", &self.initialized)
            .field("state", &self.state)
            .field("ordered", &self.reorder.is_some())
            .finish()
    }
}
