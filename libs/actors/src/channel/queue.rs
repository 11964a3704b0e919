//! Rendezvous FIFO between a producer and waiting consumers

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::oneshot;

struct QueueState<T> {
    items: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
}

/// Holds either buffered items or waiting consumers, never both
///
/// Cancelling a `dequeue` after an item was handed to it drops that item.
pub struct Queue<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Hand `item` to the oldest live waiter, or buffer it
    pub fn enqueue(&self, item: T) {
        let mut state = self.state.lock();
        let mut item = item;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => return,
                // Waiter was cancelled; try the next one.
                Err(returned) => item = returned,
            }
        }
        state.items.push_back(item);
    }

    /// Next item, suspending until one is enqueued
    pub async fn dequeue(&self) -> T {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return item;
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                rx
            };
            if let Ok(item) = waiter.await {
                return item;
            }
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Buffered items
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumers currently suspended in `dequeue`
    pub fn waiting(&self) -> usize {
        self.state
            .lock()
            .waiters
            .iter()
            .filter(|waiter| !waiter.is_closed())
            .count()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Queue")
            .field("items", &state.items.len())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
