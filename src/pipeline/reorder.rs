//! Restores index order for buffers emitted out of order by parallel stages.

use crate::error::{PowerlineError, Result};
use crate::pipeline::types::IndexedBuffer;
use std::collections::BTreeMap;

/// Holds out-of-order buffers until a contiguous prefix can be released.
#[derive(Debug)]
pub struct ReorderBuffer<B> {
    pending: BTreeMap<u64, B>,
    next_expected: u64,
    max_pending: usize,
}

impl<B> ReorderBuffer<B> {
    /// Creates a buffer expecting `start_index` first and holding at most
    /// `max_pending` buffers that cannot be released yet.
    pub fn new(start_index: u64, max_pending: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            next_expected: start_index,
            max_pending: max_pending.max(1),
        }
    }

    /// Accepts a buffer in any order.
    ///
    /// The buffer that is next in line is always accepted; anything else fails
    /// once `max_pending` buffers are already waiting.
    pub fn push(&mut self, item: IndexedBuffer<B>) -> Result<()> {
        if item.index < self.next_expected || self.pending.contains_key(&item.index) {
            return Err(PowerlineError::DuplicateIndex { index: item.index });
        }
        if item.index != self.next_expected && self.pending.len() >= self.max_pending {
            return Err(PowerlineError::ReorderOverflow {
                pending: self.pending.len(),
                expected: self.next_expected,
            });
        }
        self.pending.insert(item.index, item.buffer);
        Ok(())
    }

    /// Releases the next buffer if it has arrived.
    pub fn pop_ready(&mut self) -> Option<IndexedBuffer<B>> {
        let index = self.next_expected;
        let buffer = self.pending.remove(&index)?;
        self.next_expected += 1;
        Some(IndexedBuffer::new(index, buffer))
    }

    /// Checks that nothing is left waiting once the input has ended.
    pub fn finish(&self) -> Result<()> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(PowerlineError::MissingIndex {
                expected: self.next_expected,
            })
        }
    }

    /// Index of the buffer that will be released next.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Number of buffers waiting for an earlier index.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
