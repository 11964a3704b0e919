//! Shared-memory mutex
//!
//! A binary lock over one [`SharedWord`]. Marshalling moves a handle to the
//! same word, so a worker that receives the mutex locks the host's cell.
//! `lock()` blocks the whole thread: a worker holding or waiting on the
//! lock services no other messages meanwhile.

use spindle_codec::{CodecError, Fields, Marshal, MarshalObject, SharedWord};
use std::fmt;
use tracing::trace;

const UNLOCKED: i32 = 0;
const LOCKED: i32 = 1;

/// Non-reentrant, non-fair binary lock shared across workers
#[derive(Clone)]
pub struct Mutex {
    word: SharedWord,
}

impl Mutex {
    pub fn new() -> Self {
        Self {
            word: SharedWord::new(UNLOCKED),
        }
    }

    /// Wrap an existing word; its current value decides the initial state
    pub fn from_word(word: SharedWord) -> Self {
        Self { word }
    }

    pub fn word(&self) -> &SharedWord {
        &self.word
    }

    pub fn is_locked(&self) -> bool {
        self.word.load() == LOCKED
    }

    /// Block until the lock is acquired
    pub fn lock(&self) -> MutexLock {
        loop {
            if let Some(lock) = self.try_lock() {
                return lock;
            }
            self.word.wait(LOCKED);
        }
    }

    pub fn try_lock(&self) -> Option<MutexLock> {
        self.word.compare_exchange(UNLOCKED, LOCKED).ok()?;
        trace!("Mutex acquired");
        Some(MutexLock {
            word: self.word.clone(),
            released: false,
        })
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl MarshalObject for Mutex {
    fn into_fields(self: Box<Self>) -> spindle_codec::Result<Fields> {
        Ok(Fields::new().with("word", self.word))
    }

    fn eq_object(&self, other: &dyn MarshalObject) -> bool {
        other
            .as_any()
            .downcast_ref::<Mutex>()
            .map_or(false, |other| self.word.same_cell(&other.word))
    }
}

impl Marshal for Mutex {
    fn from_fields(mut fields: Fields) -> spindle_codec::Result<Self> {
        let word: SharedWord = fields.take("word", "Mutex")?;
        if !fields.is_empty() {
            return Err(CodecError::malformed("Mutex carries a single 'word' field"));
        }
        Ok(Self::from_word(word))
    }
}

/// Proof of ownership; releases on [`MutexLock::dispose`] or drop
#[must_use = "the mutex is released as soon as the lock is dropped"]
pub struct MutexLock {
    word: SharedWord,
    released: bool,
}

impl MutexLock {
    /// Unlock and wake one waiter
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.word.store(UNLOCKED);
        self.word.notify_one();
        trace!("Mutex released");
    }
}

impl Drop for MutexLock {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for MutexLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexLock")
            .field("released", &self.released)
            .finish()
    }
}
