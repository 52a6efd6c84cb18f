//! Mock construction helpers

#[cfg(feature = "mock-source")]
use iqtap::{
    backend::{MockFaults, MockSignal, MockSource},
    config::AppConfig,
    EventBus, Recorder, Sample,
};
#[cfg(feature = "mock-source")]
use std::sync::Arc;

/// Mock source producing a constant sample, paced at its samplerate
#[cfg(feature = "mock-source")]
pub fn constant_source(config: &AppConfig, sample: Sample) -> MockSource {
    MockSource::new(config.source.samplerate)
        .with_signal(MockSignal::Constant(sample))
        .with_batch_size(config.source.batch_size)
}

/// Recorder over a constant mock source, with the source's fault handle
#[cfg(feature = "mock-source")]
pub fn create_test_recorder(config: AppConfig) -> (Recorder, MockFaults, Arc<EventBus>) {
    let source = constant_source(&config, Sample::new(0.5, -0.25));
    let faults = source.faults();
    let bus = Arc::new(EventBus::new());
    let recorder = Recorder::new(config, Box::new(source), bus.clone()).unwrap();
    (recorder, faults, bus)
}
