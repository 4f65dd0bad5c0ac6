// resumeblu - single-peer byte-stream sessions over a discoverable radio transport
//
// One side listens while the other may connect; whichever role produces a live
// stream first is promoted into a pump and the sibling attempt is discarded.

pub mod radio;
pub mod session;

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
/// Every critical section in this crate leaves its state consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
