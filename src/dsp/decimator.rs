//! Integer-factor decimator for VFO recordings.
//!
//! Averages each group of `factor` consecutive samples into one output
//! sample. Partial groups carry over between batches, so output does not
//! depend on how the input was chunked.

use crate::dsp::block::{BlockRunner, WorkResult};
use crate::dsp::splitter::SampleStream;
use crate::types::Sample;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct BoxcarDecimator {
    factor: usize,
    acc: Sample,
    count: usize,
}

impl BoxcarDecimator {
    pub fn new(factor: usize) -> Self {
        Self {
            factor: factor.max(1),
            acc: Sample::default(),
            count: 0,
        }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Decimate `input`, appending produced samples to `output`.
    pub fn process(&mut self, input: &[Sample], output: &mut Vec<Sample>) {
        let scale = 1.0 / self.factor as f32;
        for s in input {
            self.acc += *s;
            self.count += 1;
            if self.count == self.factor {
                output.push(self.acc * scale);
                self.acc = Sample::default();
                self.count = 0;
            }
        }
    }
}

/// Stream block wrapping [`BoxcarDecimator`].
#[derive(Debug)]
pub struct DecimatorBlock {
    input: Arc<SampleStream>,
    output: Arc<SampleStream>,
    factor: usize,
    runner: BlockRunner,
}

impl DecimatorBlock {
    pub fn new(input: Arc<SampleStream>, factor: usize) -> Self {
        Self {
            input,
            output: Arc::new(SampleStream::new()),
            factor: factor.max(1),
            runner: BlockRunner::new(),
        }
    }

    pub fn output(&self) -> Arc<SampleStream> {
        self.output.clone()
    }

    pub fn start(&mut self) -> std::io::Result<()> {
        let input = self.input.clone();
        let output = self.output.clone();
        let mut decim = BoxcarDecimator::new(self.factor);
        self.runner.start("decimator", move || {
            let Some(n) = input.read() else {
                return WorkResult::Done;
            };
            let produced = {
                let in_buf = input.read_buf();
                let mut out_buf = output.write_buf();
                out_buf.clear();
                decim.process(&in_buf[..n.min(in_buf.len())], &mut out_buf);
                out_buf.len()
            };
            input.flush();
            if produced > 0 && !output.swap(produced) {
                return WorkResult::Done;
            }
            WorkResult::Continue
        })
    }

    pub fn stop(&mut self) {
        let input = self.input.clone();
        let output = self.output.clone();
        self.runner.stop(|| {
            input.stop_reader();
            output.stop_writer();
        });
        self.input.clear_read_stop();
        self.output.clear_write_stop();
    }
}

impl Drop for DecimatorBlock {
    fn drop(&mut self) {
        self.stop();
    }
}
