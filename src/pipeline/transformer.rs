//! Base stage contract shared by source, sequential and parallel stages.

use crate::error::Result;
use crate::pipeline::stream::StreamWriter;
use tracing::{debug, warn};

/// Something a stage reads from: an upstream stream or an external source handle.
pub trait StageInput: Send {
    /// Acquires whatever the input needs before the first read.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A stage in an assembly line.
///
/// Implementors provide the processing loop in [`run`](Self::run); callers only
/// use [`transform`](Self::transform), which drives the whole lifecycle.
pub trait Transformer: Send + 'static {
    /// What the stage reads from.
    type Input: StageInput;
    /// Buffer type written to the output stream.
    type Output: Send + 'static;

    /// Returns the name of this stage for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Records the downstream stream. A terminal stage may have none.
    fn set_output_stream(&mut self, stream: StreamWriter<Self::Output>);

    /// The downstream stream, if one was set.
    fn output_stream_mut(&mut self) -> Option<&mut StreamWriter<Self::Output>>;

    /// Stage-specific setup, called after both streams are initialized.
    fn on_begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Stage-specific processing loop.
    ///
    /// Must end the output stream once the input is exhausted.
    fn run(&mut self, input: &mut Self::Input) -> Result<()>;

    /// Stage-specific teardown. Runs on every exit path once setup succeeded.
    fn on_end(&mut self) -> Result<()> {
        Ok(())
    }

    /// Runs the stage to completion.
    ///
    /// Initializes the input and output, then calls `on_begin`, `run` and
    /// `on_end`. `on_end` runs even when `on_begin` or `run` failed, and on any
    /// failure the output stream is aborted so the next stage stops waiting.
    /// The first error is returned; nothing is retried.
    fn transform(&mut self, mut input: Self::Input) -> Result<()> {
        let stage = self.name();

        let setup = input.initialize().and_then(|()| match self.output_stream_mut() {
            Some(output) => output.initialize(),
            None => Ok(()),
        });
        if let Err(e) = setup {
            abort_output(self);
            return Err(e);
        }

        debug!(stage, "stage started");
        let result = self.on_begin().and_then(|()| self.run(&mut input));
        let result = result.and(self.on_end());

        match &result {
            Ok(()) => debug!(stage, "stage finished"),
            Err(e) => {
                warn!(stage, error = %e, "stage failed");
                abort_output(self);
            }
        }
        result
    }
}

fn abort_output<T: Transformer + ?Sized>(stage: &mut T) {
    if let Some(output) = stage.output_stream_mut() {
        output.abort();
    }
}
