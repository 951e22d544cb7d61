//! Unordered mid-stage that keeps each buffer's original index.
//!
//! Buffers are handed to a small pool of scoped worker threads and written
//! downstream in completion order. Each output keeps the index of its input,
//! so a consumer that needs total order can restore it with an ordered reader.
//!
//! Dispatch never runs more than `window` buffers ahead of the oldest buffer
//! not yet emitted. An ordered reader with the same window downstream
//! therefore cannot overflow, however long a single buffer takes.

use crate::defaults;
use crate::error::{PowerlineError, Result};
use crate::pipeline::stream::{StreamReader, StreamWriter};
use crate::pipeline::transformer::Transformer;
use crate::pipeline::types::{IndexedBuffer, StreamItem};
use crossbeam_channel::bounded;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::trace;

/// Per-buffer logic of a stage whose buffers may be processed concurrently.
///
/// Exactly one output is produced for every input.
pub trait ParallelStage: Send + Sync + 'static {
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

    /// Processes a single buffer. May run on several threads at once.
    fn transform_buffer(&self, buffer: Self::Input) -> Result<Self::Output>;

    /// Called once on shutdown, also after a failure.
    fn on_end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Runs a [`ParallelStage`] on `workers` threads.
pub struct ParallelTransformer<S: ParallelStage> {
    stage: S,
    output: Option<StreamWriter<S::Output>>,
    workers: usize,
    window: usize,
}

impl<S: ParallelStage> ParallelTransformer<S> {
    pub fn new(stage: S) -> Self {
        Self {
            stage,
            output: None,
            workers: defaults::PARALLEL_WORKERS,
            window: defaults::REORDER_WINDOW,
        }
    }

    /// Sets the number of worker threads (at least 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Sets how far dispatch may run ahead of the oldest unemitted buffer (at least 1).
    ///
    /// Match it to the window of any ordered reader fed by this stage.
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }
}

impl<S: ParallelStage> Transformer for ParallelTransformer<S> {
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
        let name = self.stage.name();
        let stage = &self.stage;
        let output = &mut self.output;
        let workers = self.workers;

        let (job_tx, job_rx) = bounded::<(u64, IndexedBuffer<S::Input>)>(workers);
        let (done_tx, done_rx) = bounded::<(u64, u64, Result<S::Output>)>(workers);
        let halted = AtomicBool::new(false);
        let halted = &halted;
        let lead = Lead::new(self.window);
        let lead = &lead;

        let (collected, dispatched) = thread::scope(|scope| {
            // Reads upstream and hands buffers to the pool.
            let dispatcher = scope.spawn(move || -> Result<()> {
                loop {
                    match input.remove_or_halt(halted) {
                        Ok(StreamItem::Data(item)) => {
                            let Some(seq) = lead.acquire(halted) else {
                                return Ok(());
                            };
                            if job_tx.send((seq, item)).is_err() {
                                return Ok(());
                            }
                        }
                        Ok(StreamItem::End) => return Ok(()),
                        Err(PowerlineError::Cancelled) if halted.load(Ordering::SeqCst) => {
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }
                }
            });

            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for (seq, item) in job_rx.iter() {
                        let result = stage.transform_buffer(item.buffer);
                        if done_tx.send((seq, item.index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(done_tx);

            // This thread is the only writer of the output stream.
            let mut first_error = None;
            for (seq, index, result) in done_rx.iter() {
                if first_error.is_some() {
                    continue;
                }
                let emitted = result.and_then(|buffer| match output.as_mut() {
                    Some(output) => output.add_indexed_buffer(IndexedBuffer::new(index, buffer)),
                    None => Ok(()),
                });
                match emitted {
                    Ok(()) => {
                        lead.finish(seq);
                        trace!(stage = name, index, "buffer emitted");
                    }
                    Err(e) => {
                        halted.store(true, Ordering::SeqCst);
                        lead.wake();
                        first_error = Some(e);
                    }
                }
            }

            let dispatched = dispatcher
                .join()
                .unwrap_or_else(|_| Err(PowerlineError::StagePanicked { stage: name.to_string() }));
            (first_error, dispatched)
        });

        if let Some(e) = collected {
            return Err(e);
        }
        dispatched?;
        match output.as_mut() {
            Some(output) => output.end_stream(),
            None => Ok(()),
        }
    }

    fn on_end(&mut self) -> Result<()> {
        self.stage.on_end()
    }
}

/// Limits how far dispatch runs ahead of the oldest buffer not yet emitted.
///
/// Buffers are numbered in dispatch order. A number is finished once its
/// output has been written downstream.
struct Lead {
    state: Mutex<LeadState>,
    advanced: Condvar,
    window: u64,
}

#[derive(Default)]
struct LeadState {
    dispatched: u64,
    oldest_unfinished: u64,
    finished: BTreeSet<u64>,
}

impl Lead {
    fn new(window: usize) -> Self {
        Self {
            state: Mutex::new(LeadState::default()),
            advanced: Condvar::new(),
            window: window.max(1) as u64,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LeadState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks until the window has room, then numbers the next buffer.
    ///
    /// Returns `None` once the stage has halted.
    fn acquire(&self, halted: &AtomicBool) -> Option<u64> {
        let poll = Duration::from_millis(defaults::POLL_INTERVAL_MS);
        let mut state = self.lock();
        loop {
            if halted.load(Ordering::SeqCst) {
                return None;
            }
            if state.dispatched - state.oldest_unfinished < self.window {
                break;
            }
            state = match self.advanced.wait_timeout(state, poll) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        let seq = state.dispatched;
        state.dispatched += 1;
        Some(seq)
    }

    fn finish(&self, seq: u64) {
        let mut state = self.lock();
        state.finished.insert(seq);
        loop {
            let oldest = state.oldest_unfinished;
            if !state.finished.remove(&oldest) {
                break;
            }
            state.oldest_unfinished += 1;
        }
        drop(state);
        self.advanced.notify_all();
    }

    fn wake(&self) {
        self.advanced.notify_all();
    }
}
