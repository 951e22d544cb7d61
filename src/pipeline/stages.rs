//! Ready-made stages: closure adaptors and a rechunker.

use crate::error::Result;
use crate::pipeline::parallel::ParallelStage;
use crate::pipeline::sequential::SequentialStage;
use crate::pipeline::types::BufferList;
use std::marker::PhantomData;

/// Sequential stage backed by a closure returning zero or more buffers.
pub struct FnStage<In, Out, F> {
    name: &'static str,
    f: F,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> FnStage<In, Out, F>
where
    F: FnMut(In) -> Result<BufferList<Out>>,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self {
            name,
            f,
            _types: PhantomData,
        }
    }
}

impl<In, Out, F> SequentialStage for FnStage<In, Out, F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: FnMut(In) -> Result<BufferList<Out>> + Send + 'static,
{
    type Input = In;
    type Output = Out;

    fn name(&self) -> &'static str {
        self.name
    }

    fn transform_buffer(&mut self, buffer: In) -> Result<BufferList<Out>> {
        (self.f)(buffer)
    }
}

/// Parallel stage backed by a one-to-one closure.
pub struct MapStage<In, Out, F> {
    name: &'static str,
    f: F,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> MapStage<In, Out, F>
where
    F: Fn(In) -> Result<Out>,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self {
            name,
            f,
            _types: PhantomData,
        }
    }
}

impl<In, Out, F> ParallelStage for MapStage<In, Out, F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Result<Out> + Send + Sync + 'static,
{
    type Input = In;
    type Output = Out;

    fn name(&self) -> &'static str {
        self.name
    }

    fn transform_buffer(&self, buffer: In) -> Result<Out> {
        (self.f)(buffer)
    }
}

/// Re-slices a stream of buffers into buffers of exactly `chunk_size` items.
///
/// Each input yields as many full chunks as it completes, possibly none. The
/// short remainder is emitted once the input ends.
#[derive(Debug)]
pub struct Rechunker<T> {
    chunk_size: usize,
    pending: Vec<T>,
}

impl<T> Rechunker<T> {
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            pending: Vec::with_capacity(chunk_size),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Items held back waiting to complete a chunk.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<T: Send + 'static> SequentialStage for Rechunker<T> {
    type Input = Vec<T>;
    type Output = Vec<T>;

    fn name(&self) -> &'static str {
        "rechunk"
    }

    fn transform_buffer(&mut self, buffer: Vec<T>) -> Result<BufferList<Vec<T>>> {
        let mut chunks = BufferList::empty();
        for item in buffer {
            self.pending.push(item);
            if self.pending.len() == self.chunk_size {
                let full = Vec::with_capacity(self.chunk_size);
                chunks.push(std::mem::replace(&mut self.pending, full));
            }
        }
        Ok(chunks)
    }

    fn flush(&mut self) -> Result<BufferList<Vec<T>>> {
        if self.pending.is_empty() {
            return Ok(BufferList::empty());
        }
        Ok(BufferList::single(std::mem::take(&mut self.pending)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PowerlineError;

    #[test]
    fn test_fn_stage_calls_closure() {
        let mut stage = FnStage::new("split", |s: String| -> Result<BufferList<String>> {
            Ok(s.split(' ').map(str::to_string).collect())
        });

        let out = stage.transform_buffer("a b".to_string()).unwrap();
        assert_eq!(out.into_vec(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(SequentialStage::name(&stage), "split");
    }

    #[test]
    fn test_map_stage_calls_closure() {
        let stage = MapStage::new("negate", |v: i32| -> Result<i32> { Ok(-v) });
        assert_eq!(stage.transform_buffer(4).unwrap(), -4);
        assert_eq!(ParallelStage::name(&stage), "negate");
    }

    #[test]
    fn test_map_stage_propagates_error() {
        let stage = MapStage::new("fail", |_: i32| -> Result<i32> {
            Err(PowerlineError::transform("fail", "nope"))
        });
        assert!(stage.transform_buffer(1).is_err());
    }

    #[test]
    fn test_rechunker_fan_out_varies() {
        let mut stage = Rechunker::new(3);

        // 2 items: nothing complete yet.
        assert!(stage.transform_buffer(vec![1, 2]).unwrap().is_empty());
        // 7 more: completes three chunks.
        let out = stage.transform_buffer(vec![3, 4, 5, 6, 7, 8, 9]).unwrap();
        assert_eq!(
            out.into_vec(),
            vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]
        );
        assert_eq!(stage.pending_len(), 0);
        // 1 more: held back.
        assert!(stage.transform_buffer(vec![10]).unwrap().is_empty());
        assert_eq!(stage.flush().unwrap().into_vec(), vec![vec![10]]);
        assert!(stage.flush().unwrap().is_empty());
    }

    #[test]
    fn test_rechunker_zero_size_means_one() {
        let mut stage = Rechunker::new(0);
        assert_eq!(stage.chunk_size(), 1);
        assert_eq!(stage.transform_buffer(vec!['a', 'b']).unwrap().len(), 2);
    }
}
