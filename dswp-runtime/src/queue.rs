//! Bounded Single-Producer/Single-Consumer Queue
//!
//! The inter-stage link of a decoupled pipeline. `push` blocks while the
//! queue is full, `pop` blocks while it is empty, ordering is strictly FIFO,
//! and closing the queue is how a finished producer signals end-of-stream:
//! pending items drain normally, then `pop` returns `None`.
//!
//! Mutex-plus-condvar keeps the implementation obviously correct; stage
//! granularity is whole loop iterations, so the lock is not the bottleneck.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO channel between two pipeline stages.
pub struct SpscQueue<T> {
    state: Mutex<QueueState<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> SpscQueue<T> {
    /// Create a queue holding at most `capacity` in-flight values.
    ///
    /// # Panics
    /// A zero capacity could never accept a push and panics immediately.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue a value, blocking while the queue is full.
    ///
    /// Pushing into a closed queue drops the value; the consumer already
    /// decided the stream is over.
    pub fn push(&self, value: T) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.items.len() == self.capacity && !state.closed {
            state = self.not_full.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        if state.closed {
            return;
        }
        state.items.push_back(value);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Dequeue the oldest value, blocking while the queue is empty.
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.items.is_empty() && !state.closed {
            state = self.not_empty.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        let value = state.items.pop_front();
        drop(state);
        if value.is_some() {
            self.not_full.notify_one();
        }
        value
    }

    /// Mark end-of-stream. Queued values remain poppable; blocked peers
    /// wake up.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Number of values currently queued.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
