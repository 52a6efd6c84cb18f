//! Built-in baseband capture pipeline.
//!
//! Live, it writes the tap verbatim to `baseband.cf32` with a `meta.json`
//! describing the run, and announces the first non-empty batch as the run's
//! first valid frame. Offline, it reads a `.cf32` file back and writes a
//! `products.json` summary holding the strongest spectral component.

use crate::dsp::SampleStream;
use crate::events::{EventBus, FirstValidFrameEvent};
use crate::ops::archive::META_FILE_NAME;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::{LivePipeline, PipelineDefinition, PipelineDescriptor};
use crate::types::Sample;
use crossbeam_channel::{bounded, Receiver};
use rustfft::FftPlanner;
use serde::Serialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub const BASEBAND_CAPTURE_NAME: &str = "baseband_capture";
pub const BASEBAND_FILE_NAME: &str = "baseband.cf32";
pub const PRODUCTS_FILE_NAME: &str = "products.json";

/// FFT length used by the offline pass unless `fft_size` is given.
pub const DEFAULT_FFT_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct BasebandCapture {
    descriptor: PipelineDescriptor,
}

impl Default for BasebandCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl BasebandCapture {
    pub fn new() -> Self {
        Self {
            descriptor: PipelineDescriptor::new(BASEBAND_CAPTURE_NAME, "Baseband Capture"),
        }
    }
}

fn samplerate_param(params: &Value) -> PipelineResult<f64> {
    match params.get("samplerate").and_then(Value::as_f64) {
        Some(sr) if sr > 0.0 => Ok(sr),
        _ => Err(PipelineError::InvalidParameter {
            key: "samplerate".to_string(),
            message: "must be a positive number".to_string(),
        }),
    }
}

#[derive(Debug, Serialize)]
struct CaptureMeta<'a> {
    pipeline: &'a str,
    run_id: &'a str,
    timestamp: f64,
    samplerate: f64,
    format: &'a str,
    samples: u64,
}

#[derive(Debug, Serialize)]
struct Products {
    pipeline: String,
    input: String,
    samples: usize,
    samplerate: f64,
    fft_size: usize,
    peak_offset_hz: f64,
    peak_power_db: f64,
    mean_power_db: f64,
}

impl PipelineDefinition for BasebandCapture {
    fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    fn build_live(
        &self,
        params: &Value,
        output_dir: &Path,
        events: Arc<EventBus>,
    ) -> PipelineResult<Box<dyn LivePipeline>> {
        Ok(Box::new(BasebandCaptureLive {
            pipeline: self.descriptor.name.clone(),
            output_dir: output_dir.to_path_buf(),
            samplerate: samplerate_param(params)?,
            start_timestamp: params
                .get("start_timestamp")
                .and_then(Value::as_f64)
                .unwrap_or_else(crate::types::unix_now_secs),
            run_id: params
                .get("run_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            events,
            running: Arc::new(AtomicBool::new(false)),
            samples: Arc::new(AtomicU64::new(0)),
            input: None,
            done: None,
            files: Vec::new(),
        }))
    }

    fn run_offline(&self, input: &Path, output_dir: &Path, params: &Value) -> PipelineResult<Vec<PathBuf>> {
        let samplerate = samplerate_param(params)?;
        let fft_size = params
            .get("fft_size")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_FFT_SIZE)
            .max(1);

        let samples = crate::dsp::read_cf32(input)?;
        if samples.is_empty() {
            return Err(PipelineError::EmptyInput(input.display().to_string()));
        }

        let n = samples.len().min(fft_size);
        let mut spectrum: Vec<Sample> = samples[..n].to_vec();
        FftPlanner::<f32>::new().plan_fft_forward(n).process(&mut spectrum);

        let (peak_bin, peak_mag_sq) = spectrum
            .iter()
            .map(|c| c.norm_sqr() as f64)
            .enumerate()
            .fold((0, f64::MIN), |best, (i, m)| if m > best.1 { (i, m) } else { best });
        let signed_bin = if peak_bin < n.div_ceil(2) {
            peak_bin as f64
        } else {
            peak_bin as f64 - n as f64
        };
        let norm = (n as f64) * (n as f64);
        let mean_power = samples.iter().map(|s| s.norm_sqr() as f64).sum::<f64>() / samples.len() as f64;

        let products = Products {
            pipeline: self.descriptor.name.clone(),
            input: input.display().to_string(),
            samples: samples.len(),
            samplerate,
            fft_size: n,
            peak_offset_hz: signed_bin * samplerate / n as f64,
            peak_power_db: to_db(peak_mag_sq / norm),
            mean_power_db: to_db(mean_power),
        };

        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(PRODUCTS_FILE_NAME);
        std::fs::write(&path, serde_json::to_string_pretty(&products)?)?;
        tracing::info!(path = ?path, "Peak at {:.1} Hz", products.peak_offset_hz);
        Ok(vec![path])
    }
}

fn to_db(power: f64) -> f64 {
    10.0 * power.max(1e-20).log10()
}

/// Live instance of [`BasebandCapture`].
pub struct BasebandCaptureLive {
    pipeline: String,
    output_dir: PathBuf,
    samplerate: f64,
    start_timestamp: f64,
    run_id: String,
    events: Arc<EventBus>,
    running: Arc<AtomicBool>,
    samples: Arc<AtomicU64>,
    input: Option<Arc<SampleStream>>,
    done: Option<Receiver<()>>,
    files: Vec<PathBuf>,
}

impl BasebandCaptureLive {
    fn write_meta(&self) -> std::io::Result<PathBuf> {
        let meta = CaptureMeta {
            pipeline: &self.pipeline,
            run_id: &self.run_id,
            timestamp: self.start_timestamp,
            samplerate: self.samplerate,
            format: crate::dsp::CF32_EXTENSION,
            samples: self.samples.load(Ordering::Relaxed),
        };
        let path = self.output_dir.join(META_FILE_NAME);
        let text = serde_json::to_string_pretty(&meta).map_err(std::io::Error::from)?;
        std::fs::write(&path, text)?;
        Ok(path)
    }

    pub fn samples_written(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

impl LivePipeline for BasebandCaptureLive {
    fn start(&mut self, input: Arc<SampleStream>, pool: &WorkerPool) -> PipelineResult<()> {
        if self.done.is_some() {
            return Ok(());
        }

        let baseband_path = self.output_dir.join(BASEBAND_FILE_NAME);
        let mut writer = Some(BufWriter::new(File::create(&baseband_path)?));
        let meta_path = self.write_meta()?;
        self.files = vec![baseband_path.clone(), meta_path];

        let (done_tx, done_rx) = bounded(1);
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let samples = self.samples.clone();
        let events = self.events.clone();
        let run_id = self.run_id.clone();
        let source = self.pipeline.clone();
        let stream = input.clone();
        pool.push(move |_| {
            let mut announced = false;
            let mut consume = |n: usize| {
                if n == 0 {
                    return;
                }
                if let Some(w) = writer.as_mut() {
                    let buf = stream.read_buf();
                    let written = buf[..n.min(buf.len())].iter().try_for_each(|s| {
                        w.write_all(&s.re.to_le_bytes())?;
                        w.write_all(&s.im.to_le_bytes())
                    });
                    if let Err(e) = written {
                        // Keep draining so the tap never stalls the splitter.
                        tracing::error!(path = ?baseband_path, "Capture write failed: {}", e);
                        writer = None;
                    }
                }
                samples.fetch_add(n as u64, Ordering::Relaxed);
                if !announced {
                    announced = true;
                    events.fire_event(FirstValidFrameEvent {
                        run_id: run_id.clone(),
                        source: source.clone(),
                    });
                }
            };

            while running.load(Ordering::SeqCst) {
                let Some(n) = stream.read() else {
                    break;
                };
                consume(n);
                stream.flush();
            }
            // A batch published before stop was requested still belongs to the run.
            if let Some(n) = stream.take_pending() {
                consume(n);
                stream.flush();
            }

            if let Some(mut w) = writer {
                if let Err(e) = w.flush() {
                    tracing::error!(path = ?baseband_path, "Capture flush failed: {}", e);
                }
            }
            let _ = done_tx.send(());
        })?;

        self.input = Some(input);
        self.done = Some(done_rx);
        tracing::debug!(run_id = %self.run_id, "Baseband capture started in {:?}", self.output_dir);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(done) = self.done.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        if let Some(input) = self.input.take() {
            input.stop_reader();
            let _ = done.recv();
            input.clear_read_stop();
        }
        if let Err(e) = self.write_meta() {
            tracing::warn!(run_id = %self.run_id, "Failed to update capture metadata: {}", e);
        }
        tracing::debug!(
            run_id = %self.run_id,
            "Baseband capture stopped after {} samples",
            self.samples_written()
        );
    }

    fn output_files(&self) -> Vec<PathBuf> {
        self.files.clone()
    }
}

impl Drop for BasebandCaptureLive {
    fn drop(&mut self) {
        self.stop();
    }
}
