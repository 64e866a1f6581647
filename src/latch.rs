//! Writer-preferring reader/writer latch.
//!
//! `std::sync::RwLock` does not promise any particular reader/writer
//! fairness policy, and on some platforms it is reader-preferring, which
//! starves the structural (write) operations this engine relies on for
//! directory doubling, bucket splits, and B+Tree page splits. This module
//! ports the original engine's `WfirstRWLock` (writer-first) discipline: once
//! a writer is waiting, no new reader is admitted until that writer (and any
//! writers queued after it) has run.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};

struct State {
    active_readers: u32,
    writer_active: bool,
    writers_waiting: u32,
}

/// A reader/writer latch that favors waiting writers over new readers.
pub struct Latch<T> {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Latch<T> {}
unsafe impl<T: Send> Sync for Latch<T> {}

impl<T> Latch<T> {
    pub fn new(value: T) -> Self {
        Latch {
            state: Mutex::new(State {
                active_readers: 0,
                writer_active: false,
                writers_waiting: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn read(&self) -> LatchReadGuard<'_, T> {
        let mut state = self.state.lock().unwrap();
        while state.writer_active || state.writers_waiting > 0 {
            state = self.readable.wait(state).unwrap();
        }
        state.active_readers += 1;
        LatchReadGuard { latch: self }
    }

    pub fn write(&self) -> LatchWriteGuard<'_, T> {
        let mut state = self.state.lock().unwrap();
        state.writers_waiting += 1;
        while state.writer_active || state.active_readers > 0 {
            state = self.writable.wait(state).unwrap();
        }
        state.writers_waiting -= 1;
        state.writer_active = true;
        LatchWriteGuard { latch: self }
    }

    /// Like [`read`](Self::read), but the guard owns a clone of `latch`
    /// itself rather than borrowing it. Needed by latch-crabbing descents,
    /// which keep a variable number of ancestor guards alive in a `Vec`
    /// across loop iterations — a plain borrowed guard can't outlive the
    /// loop-local `Arc` it would otherwise need to borrow from.
    pub fn read_owned(latch: &Arc<Latch<T>>) -> LatchReadOwned<T> {
        let mut state = latch.state.lock().unwrap();
        while state.writer_active || state.writers_waiting > 0 {
            state = latch.readable.wait(state).unwrap();
        }
        state.active_readers += 1;
        drop(state);
        LatchReadOwned {
            latch: Arc::clone(latch),
        }
    }

    /// Owned counterpart to [`write`](Self::write); see [`read_owned`](Self::read_owned).
    pub fn write_owned(latch: &Arc<Latch<T>>) -> LatchWriteOwned<T> {
        let mut state = latch.state.lock().unwrap();
        state.writers_waiting += 1;
        while state.writer_active || state.active_readers > 0 {
            state = latch.writable.wait(state).unwrap();
        }
        state.writers_waiting -= 1;
        state.writer_active = true;
        drop(state);
        LatchWriteOwned {
            latch: Arc::clone(latch),
        }
    }

    fn unlock_read(&self) {
        let mut state = self.state.lock().unwrap();
        state.active_readers -= 1;
        if state.active_readers == 0 {
            if state.writers_waiting > 0 {
                self.writable.notify_one();
            } else {
                self.readable.notify_all();
            }
        }
    }

    fn unlock_write(&self) {
        let mut state = self.state.lock().unwrap();
        state.writer_active = false;
        if state.writers_waiting > 0 {
            self.writable.notify_one();
        } else {
            self.readable.notify_all();
        }
    }
}

pub struct LatchReadGuard<'a, T> {
    latch: &'a Latch<T>,
}

impl<'a, T> Deref for LatchReadGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.latch.data.get() }
    }
}

impl<'a, T> Drop for LatchReadGuard<'a, T> {
    fn drop(&mut self) {
        self.latch.unlock_read();
    }
}

pub struct LatchWriteGuard<'a, T> {
    latch: &'a Latch<T>,
}

impl<'a, T> Deref for LatchWriteGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.latch.data.get() }
    }
}

impl<'a, T> DerefMut for LatchWriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.latch.data.get() }
    }
}

impl<'a, T> Drop for LatchWriteGuard<'a, T> {
    fn drop(&mut self) {
        self.latch.unlock_write();
    }
}

/// An owned counterpart to [`LatchReadGuard`] that holds an `Arc<Latch<T>>`
/// instead of borrowing one.
pub struct LatchReadOwned<T> {
    latch: Arc<Latch<T>>,
}

impl<T> Deref for LatchReadOwned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.latch.data.get() }
    }
}

impl<T> Drop for LatchReadOwned<T> {
    fn drop(&mut self) {
        self.latch.unlock_read();
    }
}

/// An owned counterpart to [`LatchWriteGuard`] that holds an `Arc<Latch<T>>`
/// instead of borrowing one.
pub struct LatchWriteOwned<T> {
    latch: Arc<Latch<T>>,
}

impl<T> Deref for LatchWriteOwned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.latch.data.get() }
    }
}

impl<T> DerefMut for LatchWriteOwned<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.latch.data.get() }
    }
}

impl<T> Drop for LatchWriteOwned<T> {
    fn drop(&mut self) {
        self.latch.unlock_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_readers_see_consistent_value() {
        let latch = Arc::new(Latch::new(7));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let latch = Arc::clone(&latch);
            handles.push(thread::spawn(move || {
                let guard = latch.read();
                assert_eq!(*guard, 7);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn writer_mutates_exclusively() {
        let latch = Latch::new(0);
        {
            let mut guard = latch.write();
            *guard += 1;
        }
        assert_eq!(*latch.read(), 1);
    }

    #[test]
    fn owned_guards_can_outlive_their_originating_scope() {
        let latch = Arc::new(Latch::new(0));
        let mut guard = Latch::write_owned(&latch);
        *guard += 5;
        let held = vec![guard]; // moved into a container, as a crabbing descent would
        assert_eq!(*held[0], 5);
        drop(held);
        assert_eq!(*Latch::read_owned(&latch), 5);
    }
}
