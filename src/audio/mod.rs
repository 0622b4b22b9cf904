//! Audio output: a low-latency streaming sink and an external-player fallback.

pub mod fallback;
pub mod sink;

pub use fallback::FallbackSink;
pub use sink::{AudioOutput, CpalSink};
