//! Audio building blocks: PCM format rules, output buffers, render sinks,
//! the sweep oscillator and the decode path.

pub mod buffer;
pub mod decoder;
pub mod output;
pub mod simulated;
pub mod sink;
pub mod types;
pub mod wavetable;

pub use buffer::{BufferId, OutputBuffer};
pub use sink::{RenderSink, SinkKind};
pub use types::{Destination, PcmFormat, SessionConfig};
