//! Shared-memory word with blocking wait/notify
//!
//! The single cell of state that several workers may observe at once. It is
//! an opaque buffer to the encoder: cloning the handle shares the cell, it
//! is never copied into a fresh one.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

struct WordCell {
    value: AtomicI32,
    gate: Mutex<()>,
    wake: Condvar,
}

/// A 32-bit word shared between execution units
#[derive(Clone)]
pub struct SharedWord {
    cell: Arc<WordCell>,
}

impl SharedWord {
    pub fn new(initial: i32) -> Self {
        Self {
            cell: Arc::new(WordCell {
                value: AtomicI32::new(initial),
                gate: Mutex::new(()),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn load(&self) -> i32 {
        self.cell.value.load(Ordering::Acquire)
    }

    pub fn store(&self, value: i32) {
        self.cell.value.store(value, Ordering::Release);
    }

    /// Atomically replace `current` with `new`, returning the previous value on failure
    pub fn compare_exchange(&self, current: i32, new: i32) -> Result<i32, i32> {
        self.cell
            .value
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    /// Block the calling thread while the word still equals `expected`
    pub fn wait(&self, expected: i32) {
        let mut gate = self.cell.gate.lock();
        while self.load() == expected {
            self.cell.wake.wait(&mut gate);
        }
    }

    /// Wake one thread blocked in `wait`
    pub fn notify_one(&self) -> bool {
        let _gate = self.cell.gate.lock();
        self.cell.wake.notify_one()
    }

    /// Wake every thread blocked in `wait`
    pub fn notify_all(&self) -> usize {
        let _gate = self.cell.gate.lock();
        self.cell.wake.notify_all()
    }

    /// True when both handles refer to the same cell
    pub fn same_cell(&self, other: &SharedWord) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for SharedWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWord")
            .field("value", &self.load())
            .finish()
    }
}
