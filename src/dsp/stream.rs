//! Swap-buffer single-producer/single-consumer sample channel.
//!
//! A writer fills the write buffer, then calls [`Stream::swap`] to publish the
//! first `n` elements. The reader blocks in [`Stream::read`] until a batch is
//! published, inspects it through [`Stream::read_buf`], and releases it with
//! [`Stream::flush`]. The writer cannot publish again until the reader has
//! flushed, which gives natural backpressure.
//!
//! ```text
//! writer: write_buf() -> fill -> swap(n) ──┐
//!                                          ▼
//! reader:                   read() -> read_buf() -> flush()
//! ```
//!
//! Both ends can be stopped independently; a stopped stream wakes every
//! waiter so block threads can exit.

use crate::sync::{lock, recover};
use std::sync::{Condvar, Mutex, MutexGuard};

/// Maximum batch size a stream is expected to carry.
pub const STREAM_BUFFER_SIZE: usize = 1_000_000;

#[derive(Debug)]
struct StreamState {
    /// A published batch is waiting for the reader.
    data_ready: bool,
    /// The reader has released the previous batch.
    can_swap: bool,
    /// Length of the published batch.
    len: usize,
    reader_stop: bool,
    writer_stop: bool,
}

/// Bounded swap-buffer channel between one writer and one reader.
#[derive(Debug)]
pub struct Stream<T> {
    state: Mutex<StreamState>,
    swap_cv: Condvar,
    read_cv: Condvar,
    write_buf: Mutex<Vec<T>>,
    read_buf: Mutex<Vec<T>>,
}

impl<T> Default for Stream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Stream<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StreamState {
                data_ready: false,
                can_swap: true,
                len: 0,
                reader_stop: false,
                writer_stop: false,
            }),
            swap_cv: Condvar::new(),
            read_cv: Condvar::new(),
            write_buf: Mutex::new(Vec::new()),
            read_buf: Mutex::new(Vec::new()),
        }
    }

    /// Exclusive access to the write buffer.
    ///
    /// The guard must be dropped before calling [`Stream::swap`].
    pub fn write_buf(&self) -> MutexGuard<'_, Vec<T>> {
        lock(&self.write_buf)
    }

    /// Shared access to the published batch. Only the first `n` elements
    /// returned by the last [`Stream::read`] are meaningful.
    ///
    /// The guard must be dropped before calling [`Stream::flush`].
    pub fn read_buf(&self) -> MutexGuard<'_, Vec<T>> {
        lock(&self.read_buf)
    }

    /// Publish the first `n` elements of the write buffer.
    ///
    /// Blocks until the reader flushed the previous batch. Returns `false`
    /// without publishing if either end has been stopped.
    pub fn swap(&self, n: usize) -> bool {
        let mut state = lock(&self.state);
        while !state.can_swap && !state.reader_stop && !state.writer_stop {
            state = recover(self.swap_cv.wait(state));
        }
        if state.reader_stop || state.writer_stop {
            return false;
        }

        {
            let mut write = lock(&self.write_buf);
            let mut read = lock(&self.read_buf);
            std::mem::swap(&mut *write, &mut *read);
        }

        state.can_swap = false;
        state.data_ready = true;
        state.len = n;
        drop(state);
        self.read_cv.notify_all();
        true
    }

    /// Block until a batch is published. Returns `None` once the reader end
    /// has been stopped.
    pub fn read(&self) -> Option<usize> {
        let mut state = lock(&self.state);
        while !state.data_ready && !state.reader_stop {
            state = recover(self.read_cv.wait(state));
        }
        if state.reader_stop {
            return None;
        }
        state.data_ready = false;
        Some(state.len)
    }

    /// Release the batch returned by the last [`Stream::read`].
    pub fn flush(&self) {
        let mut state = lock(&self.state);
        state.can_swap = true;
        drop(state);
        self.swap_cv.notify_all();
    }

    /// Make the reader end return `None` and release a blocked writer.
    pub fn stop_reader(&self) {
        let mut state = lock(&self.state);
        state.reader_stop = true;
        drop(state);
        self.read_cv.notify_all();
        self.swap_cv.notify_all();
    }

    /// Make pending and future swaps fail.
    pub fn stop_writer(&self) {
        let mut state = lock(&self.state);
        state.writer_stop = true;
        drop(state);
        self.swap_cv.notify_all();
    }

    pub fn clear_read_stop(&self) {
        lock(&self.state).reader_stop = false;
    }

    pub fn clear_write_stop(&self) {
        lock(&self.state).writer_stop = false;
    }

    /// Take a published batch without waiting, even after the reader end was
    /// stopped. Follow with [`Stream::flush`] like a normal read.
    pub fn take_pending(&self) -> Option<usize> {
        let mut state = lock(&self.state);
        if !state.data_ready {
            return None;
        }
        state.data_ready = false;
        Some(state.len)
    }

    #[cfg(test)]
    fn is_reader_stopped(&self) -> bool {
        lock(&self.state).reader_stop
    }
}

impl<T: Clone> Stream<T> {
    /// Copy `data` into the write buffer and publish it.
    pub fn write_all(&self, data: &[T]) -> bool {
        {
            let mut buf = self.write_buf();
            buf.clear();
            buf.extend_from_slice(data);
        }
        self.swap(data.len())
    }

    /// Read one batch, copy it out, and flush. Returns `None` once stopped.
    pub fn read_to_vec(&self) -> Option<Vec<T>> {
        let n = self.read()?;
        let out = {
            let buf = self.read_buf();
            buf[..n.min(buf.len())].to_vec()
        };
        self.flush();
        Some(out)
    }
}
