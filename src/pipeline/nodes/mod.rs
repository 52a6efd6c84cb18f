//! Built-in pipeline implementations.

pub mod baseband_capture;

pub use baseband_capture::{BasebandCapture, BasebandCaptureLive};
