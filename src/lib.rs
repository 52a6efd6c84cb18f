//! # iqtap: real-time IQ fan-out with staged run archives
//!
//! Ingests a complex-sample radio stream, fans it out to any number of
//! consumers (a main tap, named recording taps, frequency-shifted VFO taps)
//! and manages the on-disk runs those consumers produce: staged under a
//! temporary name, promoted atomically on stop, evicted oldest-first when the
//! archive outgrows its quota.
//!
//! ## Architecture
//!
//! - **DSP**: swap-buffer streams, the splitter/channelizer and the blocks
//!   around it, each running on its own thread
//! - **Backend**: the hardware source contract, a synthetic source, and the
//!   restart supervisor that reopens a failed or stalled source
//! - **Pipeline**: the live/offline pipeline contract, worker pools and the
//!   built-in baseband capture pipeline
//! - **Ops**: run staging, promotion and quota eviction, plus the observable
//!   [`ops::OpsState`] fed by the event bus
//! - **Recorder**: wires all of the above around one source
//!
//! ```text
//! source ──► Splitter ──► taps ──► live pipelines / file sinks ──► <run dir>
//!                                                                     │
//!                     EventBus ◄── RunLifecycleManager (promote, evict) ┘
//! ```
//!
//! ## Configuration
//!
//! Settings load from a TOML file; the default location is in the
//! platform-appropriate data directory under `dev.hxyulin.iqtap`.
//!
//! ## Example
//!
//! ```ignore
//! use iqtap::{backend::MockSource, pipeline::BasebandCapture, AppConfig, EventBus, Recorder};
//! use std::sync::Arc;
//!
//! let config = AppConfig::load_or_default("iqtap.toml");
//! let source = MockSource::new(config.source.samplerate);
//! let recorder = Recorder::new(config, Box::new(source), Arc::new(EventBus::new()))?;
//!
//! recorder.start()?;
//! recorder.start_processing(Arc::new(BasebandCapture::new()), serde_json::json!({}), None)?;
//! // ...
//! let outcome = recorder.stop_processing();
//! ```

pub mod backend;
pub mod config;
pub mod dsp;
pub mod error;
pub mod events;
pub mod ops;
pub mod pipeline;
pub mod recorder;
mod sync;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{IqTapError, Result};
pub use events::EventBus;
pub use recorder::Recorder;
pub use types::{RxStatus, Sample, SdrStatus, SourceStatus};
