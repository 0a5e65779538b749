//! Lock utilities for proper error handling of poisoned locks

use crate::core::error::{Error, Result};
use std::sync::{Condvar, Mutex, MutexGuard};

/// Lock a Mutex and handle poisoning
pub fn lock_mutex<'a, T>(lock: &'a Mutex<T>, context: &str) -> Result<MutexGuard<'a, T>> {
    lock.lock()
        .map_err(|_| Error::internal(format!("Mutex lock poisoned: {}", context)))
}

/// Wait on a Condvar and handle poisoning
pub fn wait_condvar<'a, T>(
    cond: &Condvar,
    guard: MutexGuard<'a, T>,
    context: &str,
) -> Result<MutexGuard<'a, T>> {
    cond.wait(guard)
        .map_err(|_| Error::internal(format!("Condvar wait poisoned: {}", context)))
}
