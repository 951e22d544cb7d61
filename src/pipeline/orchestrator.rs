//! Assembly line that wires stages together and runs each on its own thread.
//!
//! ```no_run
//! use powerline::config::LineConfig;
//! use powerline::monitor::IterSource;
//! use powerline::pipeline::{AssemblyLine, MapStage, Rechunker};
//! use powerline::pipeline::types::Sample;
//!
//! # fn main() -> powerline::Result<()> {
//! let samples = (0..10).map(|i| vec![Sample::new(i as f64, 1.0)]);
//! let buffers = AssemblyLine::new(LineConfig::default())
//!     .source(IterSource::new(samples))
//!     .sequential(Rechunker::new(4))
//!     .parallel(MapStage::new("count", |buffer: Vec<Sample>| Ok(buffer.len())))
//!     .start()?
//!     .collect()?;
//! assert_eq!(buffers.len(), 3);
//! # Ok(())
//! # }
//! ```

use crate::config::LineConfig;
use crate::defaults;
use crate::error::{PowerlineError, Result};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::error::{ErrorReporter, FirstFailure, LogReporter};
use crate::pipeline::parallel::{ParallelStage, ParallelTransformer};
use crate::pipeline::sequential::{SequentialStage, SequentialTransformer};
use crate::pipeline::source::{SampleSource, SourceTransformer};
use crate::pipeline::stream::{BufferStream, StreamReader};
use crate::pipeline::transformer::Transformer;
use crate::pipeline::types::{IndexedBuffer, StreamItem};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

type StageJob = Box<dyn FnOnce() -> Result<()> + Send>;

/// A wired stage waiting to be started.
struct PendingStage {
    name: &'static str,
    job: StageJob,
}

/// Runs a stage in a dedicated thread.
pub struct StageRunner {
    /// Handle to the spawned thread.
    handle: Option<JoinHandle<()>>,
    /// Name of the stage (cached for error reporting).
    name: &'static str,
}

impl StageRunner {
    /// Spawns `job` on a thread named after the stage.
    ///
    /// A failure is reported, recorded in `failure`, and cancels the rest of the line.
    fn spawn(
        stage: PendingStage,
        cancel: CancelToken,
        failure: Arc<FirstFailure>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self> {
        let PendingStage { name, job } = stage;
        let handle = thread::Builder::new()
            .name(format!("{}-{}", defaults::THREAD_PREFIX, name))
            .spawn(move || {
                if let Err(e) = job() {
                    reporter.report(name, &e);
                    cancel.cancel();
                    failure.record(name, e);
                }
            })?;

        Ok(Self {
            handle: Some(handle),
            name,
        })
    }

    /// Waits for the stage thread to complete.
    pub fn join(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| PowerlineError::StagePanicked {
                stage: self.name.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Returns the name of the stage.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Entry point for building an assembly line.
pub struct AssemblyLine {
    config: LineConfig,
    error_reporter: Arc<dyn ErrorReporter>,
    cancel: CancelToken,
}

impl AssemblyLine {
    /// Creates a new assembly line with the default error reporter.
    pub fn new(config: LineConfig) -> Self {
        Self {
            config,
            error_reporter: Arc::new(LogReporter),
            cancel: CancelToken::new(),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Uses an externally owned cancel token, e.g. one tied to Ctrl-C.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Starts the line with its producer stage.
    pub fn source<S: SampleSource>(self, source: S) -> LineBuilder<S::Buffer> {
        let (writer, reader) = self.stream().split();
        let name = source.name();
        let mut transformer = SourceTransformer::<S>::new().with_name(name);
        transformer.set_output_stream(writer);

        LineBuilder {
            line: self,
            stages: vec![PendingStage {
                name,
                job: Box::new(move || transformer.transform(source)),
            }],
            tail: reader,
            tail_unordered: false,
        }
    }

    fn stream<B: Send>(&self) -> BufferStream<B> {
        BufferStream::with_cancel(
            self.config.stream_capacity,
            self.cancel.clone(),
            self.config.poll_interval(),
        )
    }
}

/// An assembly line under construction whose last stage emits `B`.
pub struct LineBuilder<B> {
    line: AssemblyLine,
    stages: Vec<PendingStage>,
    tail: StreamReader<B>,
    /// True when the last stage may emit out of index order.
    tail_unordered: bool,
}

impl<B: Send + 'static> LineBuilder<B> {
    /// Appends a stage that sees buffers in index order and re-indexes its output.
    ///
    /// Following a parallel stage, its input is reordered first.
    pub fn sequential<S>(self, stage: S) -> LineBuilder<S::Output>
    where
        S: SequentialStage<Input = B>,
    {
        let transformer = SequentialTransformer::new(stage);
        self.append(transformer, false)
    }

    /// Appends a parallel stage using the configured number of workers.
    pub fn parallel<S>(self, stage: S) -> LineBuilder<S::Output>
    where
        S: ParallelStage<Input = B>,
    {
        let workers = self.line.config.workers;
        self.parallel_with_workers(stage, workers)
    }

    /// Appends a parallel stage running on `workers` threads.
    ///
    /// The stage never runs further ahead of its oldest pending buffer than
    /// the reorder window, so an ordered reader behind it cannot overflow.
    pub fn parallel_with_workers<S>(self, stage: S, workers: usize) -> LineBuilder<S::Output>
    where
        S: ParallelStage<Input = B>,
    {
        let transformer = ParallelTransformer::new(stage)
            .with_workers(workers)
            .with_window(self.line.config.reorder_window);
        self.append(transformer, true)
    }

    /// Number of stages wired so far, the source included.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Starts every stage; the final output is delivered in index order.
    pub fn start(self) -> Result<RunningLine<B>> {
        self.launch(true)
    }

    /// Starts every stage without reordering the final output.
    pub fn start_unordered(self) -> Result<RunningLine<B>> {
        self.launch(false)
    }

    /// Wires `transformer` after the current tail. `unordered` marks a stage
    /// whose output may leave index order.
    fn append<T>(self, mut transformer: T, unordered: bool) -> LineBuilder<T::Output>
    where
        T: Transformer<Input = StreamReader<B>>,
    {
        // A parallel stage bounds its lead by dispatch order, so it needs ordered input too.
        let input = ordered_if(self.tail, self.tail_unordered, self.line.config.reorder_window);
        let (writer, reader) = self.line.stream().split();
        transformer.set_output_stream(writer);

        let mut stages = self.stages;
        stages.push(PendingStage {
            name: transformer.name(),
            job: Box::new(move || transformer.transform(input)),
        });

        LineBuilder {
            line: self.line,
            stages,
            tail: reader,
            tail_unordered: unordered,
        }
    }

    fn launch(self, ordered_output: bool) -> Result<RunningLine<B>> {
        let LineBuilder {
            line,
            stages,
            tail,
            tail_unordered,
        } = self;
        let output = if ordered_output {
            ordered_if(tail, tail_unordered, line.config.reorder_window)
        } else {
            tail
        };

        let failure = Arc::new(FirstFailure::default());
        let mut running = RunningLine {
            output: Some(output),
            runners: Vec::with_capacity(stages.len()),
            cancel: line.cancel.clone(),
            failure: failure.clone(),
        };

        let stage_count = stages.len();
        for stage in stages {
            let name = stage.name;
            match StageRunner::spawn(
                stage,
                line.cancel.clone(),
                failure.clone(),
                line.error_reporter.clone(),
            ) {
                Ok(runner) => running.runners.push(runner),
                Err(e) => {
                    line.error_reporter.report(name, &e);
                    // Dropping `running` cancels and joins what was already spawned.
                    return Err(e);
                }
            }
        }

        info!(stages = stage_count, "assembly line started");
        Ok(running)
    }
}

fn ordered_if<B: Send>(reader: StreamReader<B>, unordered: bool, window: usize) -> StreamReader<B> {
    if unordered {
        reader.ordered(0, window)
    } else {
        reader
    }
}

/// Handle to a running assembly line.
pub struct RunningLine<B> {
    output: Option<StreamReader<B>>,
    runners: Vec<StageRunner>,
    cancel: CancelToken,
    failure: Arc<FirstFailure>,
}

impl<B: Send> RunningLine<B> {
    /// The final stream, until it is taken.
    pub fn output(&mut self) -> Option<&mut StreamReader<B>> {
        self.output.as_mut()
    }

    /// Takes ownership of the final stream, e.g. to hand it to a sink thread.
    pub fn take_output(&mut self) -> Option<StreamReader<B>> {
        self.output.take()
    }

    /// Signals every stage to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Names of the running stages, in line order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.runners.iter().map(StageRunner::name).collect()
    }

    /// Reads the final stream to its end, then waits for every stage.
    ///
    /// A stage failure takes precedence over the read error it caused.
    pub fn collect(self) -> Result<Vec<IndexedBuffer<B>>> {
        let mut buffers = Vec::new();
        self.for_each(|buffer| {
            buffers.push(buffer);
            Ok(())
        })?;
        Ok(buffers)
    }

    /// Passes every buffer of the final stream to `f`, then waits for every stage.
    ///
    /// An error from `f` cancels the line and is returned unless a stage failed on its own.
    pub fn for_each<F>(mut self, mut f: F) -> Result<()>
    where
        F: FnMut(IndexedBuffer<B>) -> Result<()>,
    {
        let Some(mut output) = self.output.take() else {
            return Err(PowerlineError::Other("output stream already taken".to_string()));
        };

        let consumed = output.initialize().and_then(|()| loop {
            match output.remove_indexed_buffer()? {
                StreamItem::Data(buffer) => f(buffer)?,
                StreamItem::End => break Ok(()),
            }
        });
        if consumed.is_err() {
            self.cancel.cancel();
        }
        drop(output);

        match (consumed, self.wait()) {
            (Err(e), Err(waited)) if waited.is_secondary() => Err(e),
            (_, Err(waited)) => Err(waited),
            (consumed, Ok(())) => consumed,
        }
    }

    /// Waits for every stage to finish and returns the first failure, if any.
    ///
    /// An output stream that was neither read nor taken is dropped first, so
    /// stages still writing to it stop instead of blocking.
    pub fn wait(mut self) -> Result<()> {
        self.output = None;
        self.join_all();
        match self.failure.take() {
            Some((stage, e)) => {
                debug!(stage = %stage, "assembly line failed");
                Err(e)
            }
            None => {
                debug!("assembly line finished");
                Ok(())
            }
        }
    }

    fn join_all(&mut self) {
        for runner in self.runners.drain(..) {
            let name = runner.name();
            if let Err(e) = runner.join() {
                self.cancel.cancel();
                self.failure.record(name, e);
            }
        }
    }
}

impl<B> Drop for RunningLine<B> {
    fn drop(&mut self) {
        if self.runners.is_empty() {
            return;
        }
        self.output = None;
        self.cancel.cancel();
        for runner in self.runners.drain(..) {
            let name = runner.name();
            if let Err(e) = runner.join() {
                debug!(stage = name, error = %e, "stage failed during teardown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::IterSource;
    use crate::pipeline::stages::{FnStage, MapStage};
    use crate::pipeline::types::BufferList;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockReporter {
        errors: Mutex<Vec<(String, String)>>,
    }

    impl ErrorReporter for MockReporter {
        fn report(&self, stage: &str, error: &PowerlineError) {
            let mut errors = self.errors.lock().unwrap();
            errors.push((stage.to_string(), error.to_string()));
        }
    }

    fn small_config() -> LineConfig {
        LineConfig {
            stream_capacity: 2,
            workers: 3,
            reorder_window: 64,
            poll_interval_ms: 5,
        }
    }

    #[test]
    fn test_source_to_sequential_identity() {
        let buffers = AssemblyLine::new(small_config())
            .source(IterSource::new(vec!['a', 'b', 'c']))
            .sequential(FnStage::new("identity", |c: char| Ok(BufferList::single(c))))
            .start()
            .unwrap()
            .collect()
            .unwrap();

        assert_eq!(
            buffers,
            vec![
                IndexedBuffer::new(0, 'a'),
                IndexedBuffer::new(1, 'b'),
                IndexedBuffer::new(2, 'c'),
            ]
        );
    }

    #[test]
    fn test_parallel_output_is_reordered() {
        let buffers = AssemblyLine::new(small_config())
            .source(IterSource::new(0..40u64))
            .parallel(MapStage::new("jitter", |v: u64| {
                thread::sleep(std::time::Duration::from_millis((v * 7) % 5));
                Ok(v * 2)
            }))
            .start()
            .unwrap()
            .collect()
            .unwrap();

        let expected: Vec<IndexedBuffer<u64>> =
            (0..40).map(|i| IndexedBuffer::new(i, i * 2)).collect();
        assert_eq!(buffers, expected);
    }

    #[test]
    fn test_sequential_after_parallel_sees_index_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();

        AssemblyLine::new(small_config())
            .source(IterSource::new(0..20u64))
            .parallel(MapStage::new("jitter", |v: u64| {
                thread::sleep(std::time::Duration::from_millis((20 - v) % 4));
                Ok(v)
            }))
            .sequential(FnStage::new("record", move |v: u64| {
                record.lock().unwrap().push(v);
                Ok(BufferList::<u64>::empty())
            }))
            .start()
            .unwrap()
            .collect()
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_first_error_is_surfaced_and_line_torn_down() {
        let reporter = Arc::new(MockReporter::default());

        let result = AssemblyLine::new(small_config())
            .with_error_reporter(reporter.clone())
            .source(IterSource::new(0..1000u32))
            .sequential(FnStage::new("picky", |v: u32| {
                if v == 5 {
                    Err(PowerlineError::transform("picky", "sample 5 rejected"))
                } else {
                    Ok(BufferList::single(v))
                }
            }))
            .parallel(MapStage::new("pass", Ok))
            .start()
            .unwrap()
            .collect();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("sample 5 rejected"));

        let errors = reporter.errors.lock().unwrap();
        assert!(errors.iter().any(|(stage, _)| stage == "picky"));
    }

    #[test]
    fn test_stage_names_in_line_order() {
        let mut running = AssemblyLine::new(small_config())
            .source(IterSource::new(vec![1u8]))
            .sequential(FnStage::new("first", |v: u8| Ok(BufferList::single(v))))
            .parallel(MapStage::new("second", Ok))
            .start()
            .unwrap();

        assert_eq!(running.stage_names(), vec!["iter", "first", "second"]);
        let output = running.output().unwrap();
        output.initialize().unwrap();
        assert_eq!(output.collect_remaining().unwrap().len(), 1);
        running.wait().unwrap();
    }

    #[test]
    fn test_cancel_stops_endless_source() {
        let running = AssemblyLine::new(small_config())
            .source(IterSource::new(0u64..))
            .parallel(MapStage::new("pass", Ok))
            .start()
            .unwrap();

        thread::sleep(std::time::Duration::from_millis(20));
        running.cancel();

        let err = running.wait().unwrap_err();
        assert!(err.is_secondary());
    }

    #[test]
    fn test_consumer_error_cancels_line() {
        let running = AssemblyLine::new(small_config())
            .source(IterSource::new(0u64..))
            .start()
            .unwrap();

        let err = running
            .for_each(|buffer| {
                if buffer.index == 3 {
                    return Err(PowerlineError::Other("sink full".to_string()));
                }
                Ok(())
            })
            .unwrap_err();

        assert_eq!(err.to_string(), "sink full");
    }

    #[test]
    fn test_parallel_after_parallel_stays_ordered() {
        let buffers = AssemblyLine::new(LineConfig {
            reorder_window: 4,
            ..small_config()
        })
        .source(IterSource::new(0..30u64))
        .parallel(MapStage::new("jitter", |v: u64| {
            thread::sleep(std::time::Duration::from_millis((v * 3) % 4));
            Ok(v)
        }))
        .parallel(MapStage::new("stall", |v: u64| {
            if v == 1 {
                thread::sleep(std::time::Duration::from_millis(40));
            }
            Ok(v + 1)
        }))
        .start()
        .unwrap()
        .collect()
        .unwrap();

        let expected: Vec<IndexedBuffer<u64>> =
            (0..30).map(|i| IndexedBuffer::new(i, i + 1)).collect();
        assert_eq!(buffers, expected);
    }

    #[test]
    fn test_builder_counts_stages() {
        let builder = AssemblyLine::new(small_config())
            .source(IterSource::new(vec![1u8]))
            .parallel(MapStage::new("x", Ok));
        assert_eq!(builder.stage_count(), 2);
    }
}
