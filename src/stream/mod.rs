//! Stream plumbing shared by the local and remote engines.
//!
//! - [`StreamFanout`] copies one source to many sinks, [`merge_sources`]
//!   concatenates many sources into one destination
//! - [`CaptureBuffer`] and [`SharedSink`] are the sinks both engines write to
//! - [`ProgressWriter`] samples bytes written for progress reporting
//! - [`ErrorAggregator`] joins concurrent copy tasks and keeps the first
//!   real failure

mod aggregate;
mod buffer;
mod fanout;
mod progress;

pub use aggregate::ErrorAggregator;
pub use buffer::{BoxedReader, BoxedWriter, ByteSink, CaptureBuffer, SharedSink};
pub use fanout::{merge_sources, StreamFanout, COPY_BUFFER_SIZE};
pub use progress::{LogProgress, NoProgress, ProgressObserver, ProgressWriter};
