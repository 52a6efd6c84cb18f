//! Stateful complex rotator used for per-tap frequency translation.
//!
//! `out[n] = in[n] * phase; phase *= phase_increment`. The phase is kept
//! across calls so consecutive batches join without a discontinuity.

use crate::types::Sample;
use std::f64::consts::TAU;

/// Renormalize the running phase to unit magnitude every this many samples.
const RENORM_INTERVAL: u32 = 512;

/// Angular step in radians per sample for a shift of `hz` at `samplerate`.
pub fn hz_to_rad(hz: f64, samplerate: f64) -> f64 {
    if samplerate == 0.0 {
        return 0.0;
    }
    TAU * hz / samplerate
}

/// Unit-magnitude phase increment for a shift of `offset_hz` at `samplerate`.
pub fn phase_increment(offset_hz: f64, samplerate: f64) -> Sample {
    let rad = hz_to_rad(offset_hz, samplerate);
    Sample::new(rad.cos() as f32, rad.sin() as f32)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotator {
    phase: Sample,
    phase_increment: Sample,
    /// Samples processed since the last renormalization. Persisted so that
    /// renormalization points do not depend on batch boundaries.
    since_renorm: u32,
}

impl Rotator {
    pub fn new(offset_hz: f64, samplerate: f64) -> Self {
        Self {
            phase: Sample::new(1.0, 0.0),
            phase_increment: phase_increment(offset_hz, samplerate),
            since_renorm: 0,
        }
    }

    pub fn phase(&self) -> Sample {
        self.phase
    }

    pub fn phase_increment(&self) -> Sample {
        self.phase_increment
    }

    /// Change the frequency shift. The running phase is preserved.
    pub fn retune(&mut self, offset_hz: f64, samplerate: f64) {
        self.phase_increment = phase_increment(offset_hz, samplerate);
    }

    /// Rotate `input` into `output`. Both slices must have the same length.
    pub fn rotate(&mut self, input: &[Sample], output: &mut [Sample]) {
        debug_assert_eq!(input.len(), output.len());
        for (out, x) in output.iter_mut().zip(input) {
            *out = *x * self.phase;
            self.phase *= self.phase_increment;
            self.since_renorm += 1;
            if self.since_renorm == RENORM_INTERVAL {
                self.since_renorm = 0;
                let norm = self.phase.norm();
                if norm > 0.0 {
                    self.phase /= norm;
                }
            }
        }
    }
}
