//! Fixed-size worker pool.
//!
//! Jobs are queued on an unbounded crossbeam channel and executed by `size`
//! named threads. Each job receives the index of the worker running it.
//! Dropping the pool closes the queue, lets queued jobs drain, and joins every
//! worker.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crossbeam_channel::{unbounded, Sender};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce(usize) + Send + 'static>;

pub struct WorkerPool {
    name: String,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.workers.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(name: &str, size: usize) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size.max(1));
        for index in 0..size.max(1) {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job(index);
                    }
                })?;
            workers.push(handle);
        }
        tracing::debug!("Worker pool {} started with {} thread(s)", name, workers.len());
        Ok(Self {
            name: name.to_string(),
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job. Fails only once the pool is shutting down.
    pub fn push<F>(&self, job: F) -> PipelineResult<()>
    where
        F: FnOnce(usize) + Send + 'static,
    {
        self.sender
            .as_ref()
            .ok_or(PipelineError::PoolClosed)?
            .send(Box::new(job))
            .map_err(|_| PipelineError::PoolClosed)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Worker in pool {} panicked", self.name);
            }
        }
    }
}
