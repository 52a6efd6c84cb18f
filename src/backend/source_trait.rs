//! SampleSource trait for a unified hardware interface
//!
//! A source owns a thread that pushes sample batches into its output
//! [`SampleStream`]; nothing else crosses the boundary. The recorder wires
//! that stream into the splitter input and drives the source through this
//! trait, so real drivers and the mock source are interchangeable.

use crate::dsp::SampleStream;
use crate::error::Result;
use crate::types::SourceStatus;
use std::sync::Arc;

/// Unified interface for sample sources
///
/// Implementations must be `Send` so the recorder can hand them between the
/// control thread and the restart supervisor.
///
/// # Example
///
/// ```ignore
/// fn restart(source: &mut dyn SampleSource) -> Result<()> {
///     source.close();
///     source.open()?;
///     source.start()
/// }
/// ```
pub trait SampleSource: Send {
    /// Human-readable name of the device
    fn name(&self) -> &str;

    /// Acquire the device handle
    fn open(&mut self) -> Result<()>;

    /// Begin streaming into [`SampleSource::output_stream`]
    ///
    /// Requires a prior successful [`SampleSource::open`] and a non-zero
    /// samplerate.
    fn start(&mut self) -> Result<()>;

    /// Stop streaming; the device stays open
    fn stop(&mut self);

    /// Release the device handle, stopping first if needed
    fn close(&mut self);

    /// Status as last reported by the driver or set by the owner
    fn status(&self) -> SourceStatus;

    /// Override the reported status
    fn set_status(&mut self, status: SourceStatus);

    /// Samples per second, 0 when not configured
    fn samplerate(&self) -> f64;

    /// Stream the source writes into. Stable for the life of the source.
    fn output_stream(&self) -> Arc<SampleStream>;
}
