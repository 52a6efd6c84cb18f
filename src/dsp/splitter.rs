//! Stream router / channelizer.
//!
//! The splitter pulls batches from one input [`Stream`] and fans them out to:
//!
//! - the always-present **main** output,
//! - any number of **named** outputs (verbatim copies),
//! - any number of **VFO** outputs (frequency-translated copies).
//!
//! Named and VFO outputs live in separate id namespaces. Map iteration order
//! is irrelevant: each tap receives the same batch independently.
//!
//! # Locking
//!
//! A single state lock covers tap structure *and* the whole per-batch fan-out,
//! so a control thread can never remove or replace a tap while the data plane
//! is copying into or publishing its stream. The last-input timestamp is a
//! relaxed atomic and is written before the lock is taken.

use crate::dsp::block::{BlockRunner, WorkResult};
use crate::dsp::rotator::Rotator;
use crate::dsp::stream::Stream;
use crate::sync::lock;
use crate::types::Sample;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub type SampleStream = Stream<Sample>;

#[derive(Debug)]
struct OutputTap {
    stream: Arc<SampleStream>,
    enabled: bool,
}

impl OutputTap {
    fn new() -> Self {
        Self {
            stream: Arc::new(SampleStream::new()),
            enabled: false,
        }
    }
}

#[derive(Debug)]
struct VfoTap {
    stream: Arc<SampleStream>,
    enabled: bool,
    offset_hz: f64,
    rotator: Rotator,
}

#[derive(Debug, Default)]
struct SplitterState {
    main_enabled: bool,
    outputs: HashMap<String, OutputTap>,
    vfo_outputs: HashMap<String, VfoTap>,
}

/// Per-batch fan-out of one input stream to main, named and VFO outputs.
#[derive(Debug)]
pub struct Splitter {
    input: Mutex<Arc<SampleStream>>,
    main_output: Arc<SampleStream>,
    state: Mutex<SplitterState>,
    /// Reference point for `last_input_ns`.
    epoch: Instant,
    /// Nanoseconds since `epoch` of the last non-empty batch; 0 = never.
    last_input_ns: AtomicU64,
    runner: Mutex<BlockRunner>,
}

fn copy_into(stream: &SampleStream, batch: &[Sample]) {
    let mut buf = stream.write_buf();
    buf.clear();
    buf.extend_from_slice(batch);
}

impl Splitter {
    pub fn new(input: Arc<SampleStream>) -> Self {
        Self {
            input: Mutex::new(input),
            main_output: Arc::new(SampleStream::new()),
            state: Mutex::new(SplitterState::default()),
            epoch: Instant::now(),
            last_input_ns: AtomicU64::new(0),
            runner: Mutex::new(BlockRunner::new()),
        }
    }

    /// Replace the input stream. Only meaningful while the splitter is stopped.
    pub fn set_input(&self, input: Arc<SampleStream>) {
        *lock(&self.input) = input;
    }

    pub fn input(&self) -> Arc<SampleStream> {
        lock(&self.input).clone()
    }

    // ── Main ──

    pub fn main_output(&self) -> Arc<SampleStream> {
        self.main_output.clone()
    }

    pub fn set_main_enabled(&self, enabled: bool) {
        lock(&self.state).main_enabled = enabled;
    }

    pub fn is_main_enabled(&self) -> bool {
        lock(&self.state).main_enabled
    }

    // ── Named outputs ──

    /// Create a disabled output. No-op if `id` already exists.
    pub fn add_output(&self, id: &str) {
        lock(&self.state)
            .outputs
            .entry(id.to_string())
            .or_insert_with(OutputTap::new);
    }

    pub fn del_output(&self, id: &str) {
        lock(&self.state).outputs.remove(id);
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) {
        if let Some(tap) = lock(&self.state).outputs.get_mut(id) {
            tap.enabled = enabled;
        }
    }

    /// Stream of output `id`, or `None` if it does not exist (yet).
    pub fn get_output(&self, id: &str) -> Option<Arc<SampleStream>> {
        lock(&self.state).outputs.get(id).map(|t| t.stream.clone())
    }

    /// Replace the output's stream with a fresh one and disable it, dropping
    /// any stale batch a previous consumer left behind.
    pub fn reset_output(&self, id: &str) {
        if let Some(tap) = lock(&self.state).outputs.get_mut(id) {
            tap.stream = Arc::new(SampleStream::new());
            tap.enabled = false;
        }
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        lock(&self.state)
            .outputs
            .get(id)
            .map(|t| t.enabled)
            .unwrap_or(false)
    }

    pub fn output_ids(&self) -> Vec<String> {
        lock(&self.state).outputs.keys().cloned().collect()
    }

    // ── VFO outputs ──

    /// Create a disabled VFO shifted by `offset_hz`. No-op if `id` exists.
    pub fn add_vfo(&self, id: &str, samplerate: f64, offset_hz: f64) {
        lock(&self.state)
            .vfo_outputs
            .entry(id.to_string())
            .or_insert_with(|| VfoTap {
                stream: Arc::new(SampleStream::new()),
                enabled: false,
                offset_hz,
                rotator: Rotator::new(offset_hz, samplerate),
            });
    }

    pub fn del_vfo(&self, id: &str) {
        lock(&self.state).vfo_outputs.remove(id);
    }

    pub fn set_vfo_enabled(&self, id: &str, enabled: bool) {
        if let Some(vfo) = lock(&self.state).vfo_outputs.get_mut(id) {
            vfo.enabled = enabled;
        }
    }

    pub fn get_vfo_output(&self, id: &str) -> Option<Arc<SampleStream>> {
        lock(&self.state)
            .vfo_outputs
            .get(id)
            .map(|v| v.stream.clone())
    }

    pub fn reset_vfo(&self, id: &str) {
        if let Some(vfo) = lock(&self.state).vfo_outputs.get_mut(id) {
            vfo.stream = Arc::new(SampleStream::new());
            vfo.enabled = false;
        }
    }

    /// Retune an existing VFO. The running phase is kept.
    pub fn set_vfo_offset(&self, id: &str, samplerate: f64, offset_hz: f64) {
        if let Some(vfo) = lock(&self.state).vfo_outputs.get_mut(id) {
            vfo.offset_hz = offset_hz;
            vfo.rotator.retune(offset_hz, samplerate);
        }
    }

    pub fn is_vfo_enabled(&self, id: &str) -> bool {
        lock(&self.state)
            .vfo_outputs
            .get(id)
            .map(|v| v.enabled)
            .unwrap_or(false)
    }

    pub fn vfo_offset(&self, id: &str) -> Option<f64> {
        lock(&self.state).vfo_outputs.get(id).map(|v| v.offset_hz)
    }

    pub fn vfo_ids(&self) -> Vec<String> {
        lock(&self.state).vfo_outputs.keys().cloned().collect()
    }

    // ── Liveness ──

    /// Seconds since the last non-empty batch, or `-1.0` before any arrived.
    pub fn seconds_since_last_input(&self) -> f64 {
        let last_ns = self.last_input_ns.load(Ordering::Relaxed);
        if last_ns == 0 {
            return -1.0;
        }
        let now_ns = self.epoch.elapsed().as_nanos() as u64;
        now_ns.saturating_sub(last_ns) as f64 / 1e9
    }

    fn mark_input(&self) {
        let now_ns = (self.epoch.elapsed().as_nanos() as u64).max(1);
        self.last_input_ns.store(now_ns, Ordering::Relaxed);
    }

    // ── Data plane ──

    /// Pull one batch from the input and fan it out.
    pub fn work(&self) -> WorkResult {
        let input = self.input();
        let n = match input.read() {
            Some(n) if n > 0 => n,
            Some(_) => {
                input.flush();
                return WorkResult::Continue;
            }
            None => {
                input.flush();
                return WorkResult::Done;
            }
        };

        self.mark_input();

        let mut state = lock(&self.state);
        {
            let in_buf = input.read_buf();
            let n = n.min(in_buf.len());
            let batch = &in_buf[..n];

            if state.main_enabled {
                copy_into(&self.main_output, batch);
            }

            for tap in state.outputs.values().filter(|t| t.enabled) {
                copy_into(&tap.stream, batch);
            }

            for vfo in state.vfo_outputs.values_mut().filter(|v| v.enabled) {
                if vfo.offset_hz == 0.0 {
                    copy_into(&vfo.stream, batch);
                } else {
                    let mut buf = vfo.stream.write_buf();
                    buf.resize(n, Sample::default());
                    vfo.rotator.rotate(batch, &mut buf[..n]);
                }
            }
        }

        input.flush();

        if state.main_enabled {
            self.main_output.swap(n);
        }
        for tap in state.outputs.values().filter(|t| t.enabled) {
            tap.stream.swap(n);
        }
        for vfo in state.vfo_outputs.values().filter(|v| v.enabled) {
            vfo.stream.swap(n);
        }

        WorkResult::Continue
    }

    /// Spawn the data-plane thread.
    pub fn start(self: &Arc<Self>) -> std::io::Result<()> {
        let input = self.input();
        input.clear_read_stop();
        let splitter = self.clone();
        lock(&self.runner).start("splitter", move || splitter.work())
    }

    /// Stop the data-plane thread and join it.
    pub fn stop(&self) {
        let input = self.input();
        lock(&self.runner).stop(|| input.stop_reader());
        input.clear_read_stop();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.runner).is_running()
    }
}
