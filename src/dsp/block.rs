//! Thread runner shared by every stream block.
//!
//! A block owns a worker thread that calls its `work` closure until the block
//! is stopped or `work` returns [`WorkResult::Done`]. Stopping is cooperative:
//! callers first unblock the streams the worker may be waiting on, then join.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Outcome of a single `work` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkResult {
    /// Keep calling `work`.
    Continue,
    /// Exit the worker loop.
    Done,
}

#[derive(Debug, Default)]
pub struct BlockRunner {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BlockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    #[cfg(test)]
    fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Spawn the worker. No-op if already running.
    pub fn start<F>(&mut self, name: &str, mut work: F) -> std::io::Result<()>
    where
        F: FnMut() -> WorkResult + Send + 'static,
    {
        if self.handle.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    if work() == WorkResult::Done {
                        break;
                    }
                }
                tracing::trace!("Block thread exiting");
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Clear the running flag and join the worker.
    ///
    /// `unblock` runs between the two steps and must wake any stream wait the
    /// worker could be parked in.
    pub fn stop(&mut self, unblock: impl FnOnce()) {
        self.running.store(false, Ordering::SeqCst);
        unblock();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Block thread panicked");
            }
        }
    }
}

impl Drop for BlockRunner {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
