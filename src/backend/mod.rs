//! Backend module: sample sources and their supervision
//!
//! # Components
//!
//! - [`SampleSource`] - hardware source contract; each source pushes batches
//!   into its own output stream from a driver-owned thread
//! - [`MockSource`] - synthetic source for running without hardware (feature-gated)
//! - [`RestartSupervisor`] - polled state machine that reopens a failed or
//!   stalled source with exponential backoff
//!
//! # Example
//!
//! ```ignore
//! use iqtap::backend::{MockSource, SampleSource};
//!
//! let mut source = MockSource::new(48_000.0);
//! source.open()?;
//! source.start()?;
//! let stream = source.output_stream();
//! ```

#[cfg(feature = "mock-source")]
pub mod mock_source;
pub mod source_trait;
pub mod supervisor;

#[cfg(feature = "mock-source")]
pub use mock_source::{MockFaults, MockGenerator, MockSignal, MockSource};
pub use source_trait::SampleSource;
pub use supervisor::{RestartSupervisor, RestartTarget, SupervisorState};
