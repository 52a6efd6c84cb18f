//! Raw baseband recorder.
//!
//! Drains a sample stream on its own thread and, while a recording is armed,
//! appends interleaved little-endian `f32` I/Q pairs (`.cf32`) to a file.
//! While not recording, batches are consumed and discarded so the upstream
//! tap never stalls.

use crate::dsp::block::{BlockRunner, WorkResult};
use crate::dsp::splitter::SampleStream;
use crate::sync::lock;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Extension appended to recordings.
pub const CF32_EXTENSION: &str = "cf32";

#[derive(Debug, Default)]
struct Recording {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    samplerate: f64,
    samples_written: u64,
}

impl Recording {
    fn finish(&mut self) -> Option<PathBuf> {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::error!("Failed to flush recording {:?}: {}", self.path, e);
            }
        }
        self.path.take()
    }
}

#[derive(Debug)]
pub struct FileSink {
    input: Arc<SampleStream>,
    recording: Arc<Mutex<Recording>>,
    runner: BlockRunner,
}

impl FileSink {
    pub fn new(input: Arc<SampleStream>) -> Self {
        Self {
            input,
            recording: Arc::new(Mutex::new(Recording::default())),
            runner: BlockRunner::new(),
        }
    }

    /// Start draining the input stream.
    pub fn start(&mut self) -> std::io::Result<()> {
        let input = self.input.clone();
        let recording = self.recording.clone();
        self.runner.start("file-sink", move || {
            let Some(n) = input.read() else {
                return WorkResult::Done;
            };
            {
                let buf = input.read_buf();
                let mut rec = lock(&recording);
                if let Some(writer) = rec.writer.as_mut() {
                    let n = n.min(buf.len());
                    let mut failed = None;
                    for s in &buf[..n] {
                        if let Err(e) = writer
                            .write_all(&s.re.to_le_bytes())
                            .and_then(|_| writer.write_all(&s.im.to_le_bytes()))
                        {
                            failed = Some(e);
                            break;
                        }
                    }
                    match failed {
                        Some(e) => {
                            tracing::error!("Recording write failed, stopping: {}", e);
                            rec.finish();
                        }
                        None => rec.samples_written += n as u64,
                    }
                }
            }
            input.flush();
            WorkResult::Continue
        })
    }

    /// Stop the drain thread. An armed recording is finalized first.
    pub fn stop(&mut self) {
        self.stop_recording();
        let input = self.input.clone();
        self.runner.stop(|| input.stop_reader());
        self.input.clear_read_stop();
    }

    /// Arm a recording at `<path_base>.cf32`. Returns the full file path.
    pub fn start_recording(&self, path_base: impl AsRef<Path>, samplerate: f64) -> std::io::Result<PathBuf> {
        let path = PathBuf::from(format!(
            "{}.{}",
            path_base.as_ref().display(),
            CF32_EXTENSION
        ));
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&path)?;

        let mut rec = lock(&self.recording);
        rec.finish();
        rec.writer = Some(BufWriter::new(file));
        rec.path = Some(path.clone());
        rec.samplerate = samplerate;
        rec.samples_written = 0;
        tracing::info!("Recording to {:?} at {} SPS", path, samplerate);
        Ok(path)
    }

    /// Finalize the current recording, returning its path if one was armed.
    pub fn stop_recording(&self) -> Option<PathBuf> {
        let mut rec = lock(&self.recording);
        let samples = rec.samples_written;
        let path = rec.finish();
        if let Some(ref p) = path {
            tracing::info!("Recording finished: {:?} ({} samples)", p, samples);
        }
        path
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.recording).writer.is_some()
    }

    pub fn recording_path(&self) -> Option<PathBuf> {
        lock(&self.recording).path.clone()
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read back a `.cf32` file written by [`FileSink`].
pub fn read_cf32(path: impl AsRef<Path>) -> std::io::Result<Vec<crate::types::Sample>> {
    let bytes = std::fs::read(path)?;
    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            crate::types::Sample::new(
                f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
            )
        })
        .collect())
}
