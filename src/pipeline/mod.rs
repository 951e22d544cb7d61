//! Staged assembly line for buffers of samples.
//!
//! Every stage runs in its own thread and hands indexed buffers downstream
//! through bounded crossbeam channels, so a slow stage backs up the ones
//! before it.

pub mod cancel;
pub mod error;
pub mod orchestrator;
pub mod parallel;
pub mod reorder;
pub mod sequential;
pub mod source;
pub mod stages;
pub mod stream;
pub mod transformer;
pub mod types;

pub use cancel::CancelToken;
pub use error::{ErrorReporter, LogReporter};
pub use orchestrator::{AssemblyLine, LineBuilder, RunningLine, StageRunner};
pub use parallel::{ParallelStage, ParallelTransformer};
pub use reorder::ReorderBuffer;
pub use sequential::{SequentialStage, SequentialTransformer};
pub use source::{SampleSource, SourceTransformer};
pub use stages::{FnStage, MapStage, Rechunker};
pub use stream::{BufferStream, StreamReader, StreamWriter};
pub use transformer::{StageInput, Transformer};
pub use types::{BufferList, IndexedBuffer, Sample, SampleBuffer, StreamItem};
