//! Mock Sample Source for Testing
//!
//! A synthetic [`SampleSource`] that runs without hardware. It generates
//! batches from a [`MockSignal`] on its own thread and can be told to
//! misbehave through a cloneable [`MockFaults`] handle, which stays usable
//! after the source itself has been handed to a recorder.
//!
//! # Fault injection
//!
//! - [`MockFaults::set_stalled`] - keep reporting Online but stop producing
//! - [`MockFaults::fail_next_opens`] - make the next `n` opens fail
//! - [`MockFaults::report_status`] - change the status the driver reports
//!
//! # Enabling
//!
//! Available with the `mock-source` feature (on by default).

use crate::backend::source_trait::SampleSource;
use crate::dsp::{BlockRunner, Rotator, SampleStream, WorkResult};
use crate::error::{IqTapError, Result};
use crate::sync::lock;
use crate::types::{Sample, SourceStatus};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Pause between polls while stalled
const STALL_POLL: Duration = Duration::from_millis(10);

/// Signal the mock source produces
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockSignal {
    /// Complex exponential at `offset_hz` from the centre frequency
    Tone { offset_hz: f64, amplitude: f32 },
    /// The same sample repeated
    Constant(Sample),
    /// Uniform noise in `[-amplitude, amplitude]` on both components
    Noise { amplitude: f32 },
}

impl Default for MockSignal {
    fn default() -> Self {
        MockSignal::Tone {
            offset_hz: 1000.0,
            amplitude: 0.5,
        }
    }
}

/// Stateful batch generator for a [`MockSignal`]
#[derive(Debug, Clone)]
pub struct MockGenerator {
    signal: MockSignal,
    rotator: Rotator,
    seed: u64,
}

impl MockGenerator {
    pub fn new(signal: MockSignal, samplerate: f64) -> Self {
        let offset = match signal {
            MockSignal::Tone { offset_hz, .. } => offset_hz,
            _ => 0.0,
        };
        Self {
            signal,
            rotator: Rotator::new(offset, samplerate),
            seed: 0x9E37_79B9_7F4A_7C15,
        }
    }

    /// Generate the next `len` samples, continuous with the previous batch
    pub fn next_batch(&mut self, len: usize) -> Vec<Sample> {
        match self.signal {
            MockSignal::Tone { amplitude, .. } => {
                let carrier = vec![Sample::new(amplitude, 0.0); len];
                let mut out = vec![Sample::default(); len];
                self.rotator.rotate(&carrier, &mut out);
                out
            }
            MockSignal::Constant(s) => vec![s; len],
            MockSignal::Noise { amplitude } => (0..len)
                .map(|_| {
                    let re = (self.next_random() * 2.0 - 1.0) as f32 * amplitude;
                    let im = (self.next_random() * 2.0 - 1.0) as f32 * amplitude;
                    Sample::new(re, im)
                })
                .collect(),
        }
    }

    /// xorshift64, in `[0, 1]`
    fn next_random(&mut self) -> f64 {
        let mut s = self.seed;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.seed = s;
        (s as f64) / (u64::MAX as f64)
    }
}

#[derive(Debug, Default)]
struct FaultState {
    stalled: AtomicBool,
    fail_opens: AtomicUsize,
    status: Mutex<SourceStatus>,
}

/// Fault-injection handle shared with a [`MockSource`]
#[derive(Debug, Clone, Default)]
pub struct MockFaults {
    inner: Arc<FaultState>,
}

impl MockFaults {
    /// Stop (or resume) producing samples without changing the status
    pub fn set_stalled(&self, stalled: bool) {
        self.inner.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn is_stalled(&self) -> bool {
        self.inner.stalled.load(Ordering::SeqCst)
    }

    /// Make the next `count` calls to `open` fail
    pub fn fail_next_opens(&self, count: usize) {
        self.inner.fail_opens.store(count, Ordering::SeqCst);
    }

    /// Simulate the driver reporting `status`
    pub fn report_status(&self, status: SourceStatus) {
        *lock(&self.inner.status) = status;
    }

    fn status(&self) -> SourceStatus {
        *lock(&self.inner.status)
    }

    fn take_open_failure(&self) -> bool {
        self.inner
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Synthetic sample source
#[derive(Debug)]
pub struct MockSource {
    name: String,
    samplerate: f64,
    batch_size: usize,
    signal: MockSignal,
    realtime: bool,
    opened: bool,
    stream: Arc<SampleStream>,
    runner: BlockRunner,
    faults: MockFaults,
}

impl MockSource {
    pub fn new(samplerate: f64) -> Self {
        Self {
            name: "Mock Source".to_string(),
            samplerate,
            batch_size: 8192,
            signal: MockSignal::default(),
            realtime: true,
            opened: false,
            stream: Arc::new(SampleStream::new()),
            runner: BlockRunner::new(),
            faults: MockFaults::default(),
        }
    }

    pub fn with_signal(mut self, signal: MockSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Pace batches at the nominal samplerate (default) or run as fast as
    /// the consumer drains
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn faults(&self) -> MockFaults {
        self.faults.clone()
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }
}

impl SampleSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        if self.faults.take_open_failure() {
            self.faults.report_status(SourceStatus::Error);
            return Err(IqTapError::Source(format!("{}: device not found", self.name)));
        }
        self.opened = true;
        tracing::debug!("{} opened", self.name);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if !self.opened {
            return Err(IqTapError::Source(format!("{} is not open", self.name)));
        }
        if self.samplerate <= 0.0 {
            return Err(IqTapError::Source("Samplerate not set!".to_string()));
        }
        if self.runner.is_running() {
            return Ok(());
        }

        self.stream.clear_write_stop();
        let stream = self.stream.clone();
        let faults = self.faults.clone();
        let mut generator = MockGenerator::new(self.signal, self.samplerate);
        let batch_size = self.batch_size;
        let pace = self
            .realtime
            .then(|| Duration::from_secs_f64(batch_size as f64 / self.samplerate));

        self.runner.start("mock-source", move || {
            if faults.is_stalled() {
                std::thread::sleep(STALL_POLL);
                return WorkResult::Continue;
            }
            let batch = generator.next_batch(batch_size);
            if !stream.write_all(&batch) {
                return WorkResult::Done;
            }
            if let Some(pace) = pace {
                std::thread::sleep(pace);
            }
            WorkResult::Continue
        })?;
        tracing::info!("{} streaming at {} SPS", self.name, self.samplerate);
        Ok(())
    }

    fn stop(&mut self) {
        let stream = self.stream.clone();
        self.runner.stop(|| stream.stop_writer());
        self.stream.clear_write_stop();
    }

    fn close(&mut self) {
        self.stop();
        self.opened = false;
        tracing::debug!("{} closed", self.name);
    }

    fn status(&self) -> SourceStatus {
        self.faults.status()
    }

    fn set_status(&mut self, status: SourceStatus) {
        self.faults.report_status(status);
    }

    fn samplerate(&self) -> f64 {
        self.samplerate
    }

    fn output_stream(&self) -> Arc<SampleStream> {
        self.stream.clone()
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_is_continuous_across_batches() {
        let mut gen = MockGenerator::new(
            MockSignal::Tone {
                offset_hz: 250.0,
                amplitude: 1.0,
            },
            1000.0,
        );
        let mut joined = gen.next_batch(3);
        joined.extend(gen.next_batch(5));

        let mut single = MockGenerator::new(
            MockSignal::Tone {
                offset_hz: 250.0,
                amplitude: 1.0,
            },
            1000.0,
        );
        let whole = single.next_batch(8);
        for (a, b) in joined.iter().zip(&whole) {
            assert!((a - b).norm() < 1e-5);
        }
        // Quarter-rate tone: sample 1 is +j.
        assert!((whole[1] - Sample::new(0.0, 1.0)).norm() < 1e-5);
    }

    #[test]
    fn test_noise_stays_in_range() {
        let mut gen = MockGenerator::new(MockSignal::Noise { amplitude: 0.25 }, 1000.0);
        assert!(gen
            .next_batch(256)
            .iter()
            .all(|s| s.re.abs() <= 0.25 && s.im.abs() <= 0.25));
    }

    #[test]
    fn test_open_failures_are_consumed() {
        let mut src = MockSource::new(1000.0);
        let faults = src.faults();
        faults.fail_next_opens(2);
        assert!(src.open().is_err());
        assert_eq!(src.status(), SourceStatus::Error);
        assert!(src.open().is_err());
        assert!(src.open().is_ok());
        assert!(src.is_open());
    }

    #[test]
    fn test_start_requires_open() {
        let mut src = MockSource::new(1000.0);
        assert!(src.start().is_err());
        let mut zero = MockSource::new(0.0);
        zero.open().unwrap();
        assert!(zero.start().is_err());
    }

    #[test]
    fn test_streams_until_stopped() {
        let mut src = MockSource::new(1000.0)
            .with_signal(MockSignal::Constant(Sample::new(0.5, -0.5)))
            .with_batch_size(16)
            .with_realtime(false);
        src.open().unwrap();
        src.start().unwrap();
        let stream = src.output_stream();
        let batch = stream.read_to_vec().unwrap();
        assert_eq!(batch, vec![Sample::new(0.5, -0.5); 16]);
        src.close();
        assert!(!src.is_open());
    }
}
