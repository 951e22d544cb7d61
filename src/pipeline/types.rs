//! Data types carried between assembly line stages.

/// A single raw reading from a power monitor.
///
/// Values are passed through untouched; unit conversion belongs to the stage
/// functions that consume them.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct Sample {
    /// Seconds since capture start.
    pub timestamp: f64,
    /// Raw monitor value.
    pub value: f64,
}

impl Sample {
    /// Creates a new sample.
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// The buffer type produced by power monitor sources.
pub type SampleBuffer = Vec<Sample>;

/// A buffer tagged with its position in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedBuffer<B> {
    /// Sequence number used to establish or restore total order.
    pub index: u64,
    /// The payload.
    pub buffer: B,
}

impl<B> IndexedBuffer<B> {
    /// Creates a new indexed buffer.
    pub fn new(index: u64, buffer: B) -> Self {
        Self { index, buffer }
    }

    /// Replaces the payload while keeping the index.
    pub fn map<C>(self, f: impl FnOnce(B) -> C) -> IndexedBuffer<C> {
        IndexedBuffer {
            index: self.index,
            buffer: f(self.buffer),
        }
    }
}

/// Either a value or the end-of-stream marker.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<T> {
    /// A value.
    Data(T),
    /// No further values will follow.
    End,
}

impl<T> StreamItem<T> {
    /// Returns true for the end-of-stream marker.
    pub fn is_end(&self) -> bool {
        matches!(self, StreamItem::End)
    }

    /// Converts into an `Option`, mapping `End` to `None`.
    pub fn into_data(self) -> Option<T> {
        match self {
            StreamItem::Data(value) => Some(value),
            StreamItem::End => None,
        }
    }
}

impl<T> From<Option<T>> for StreamItem<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => StreamItem::Data(value),
            None => StreamItem::End,
        }
    }
}

/// The un-indexed outputs of one transform call, in order.
///
/// May be empty (the input produced nothing), hold one buffer, or many.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferList<B>(Vec<B>);

impl<B> BufferList<B> {
    /// Creates a list from buffers in emission order.
    pub fn new(buffers: Vec<B>) -> Self {
        Self(buffers)
    }

    /// A list with no buffers.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// A list holding exactly one buffer.
    pub fn single(buffer: B) -> Self {
        Self(vec![buffer])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends a buffer.
    pub fn push(&mut self, buffer: B) {
        self.0.push(buffer);
    }

    /// Consumes the list, returning the buffers.
    pub fn into_vec(self) -> Vec<B> {
        self.0
    }
}

impl<B> Default for BufferList<B> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<B> From<B> for BufferList<B> {
    fn from(buffer: B) -> Self {
        Self::single(buffer)
    }
}

impl<B> FromIterator<B> for BufferList<B> {
    fn from_iter<I: IntoIterator<Item = B>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<B> IntoIterator for BufferList<B> {
    type Item = B;
    type IntoIter = std::vec::IntoIter<B>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
