//! Sample-stream building blocks.
//!
//! ```text
//! [source] ──► Stream ──► [Splitter] ──► main / named / VFO Streams ──► consumers
//! ```
//!
//! - [`Stream`] - swap-buffer SPSC channel every block communicates over
//! - [`Splitter`] - fan-out with per-VFO frequency translation
//! - [`FileSink`] - raw `.cf32` recorder
//! - [`DecimatorBlock`] - integer decimation ahead of VFO recordings

pub mod block;
pub mod decimator;
pub mod file_sink;
pub mod rotator;
pub mod splitter;
pub mod stream;

pub use block::{BlockRunner, WorkResult};
pub use decimator::{BoxcarDecimator, DecimatorBlock};
pub use file_sink::{read_cf32, FileSink, CF32_EXTENSION};
pub use rotator::{hz_to_rad, phase_increment, Rotator};
pub use splitter::{SampleStream, Splitter};
pub use stream::{Stream, STREAM_BUFFER_SIZE};
