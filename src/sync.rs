//! Poison-tolerant locking helpers.
//!
//! A panic on one worker thread must not wedge the data plane, so every lock in
//! the crate recovers the inner value instead of propagating poison.

use std::sync::{LockResult, Mutex, MutexGuard, PoisonError};

#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
pub(crate) fn recover<G>(res: LockResult<G>) -> G {
    res.unwrap_or_else(PoisonError::into_inner)
}
