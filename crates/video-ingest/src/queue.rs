//! Bounded single-producer/single-consumer frame queue with oldest-drop
//! overflow.
//!
//! One mutex and one condvar per queue: the capture/publish side and the one
//! reader both take the lock, and every blocking wait wakes on either
//! data-available or close. The producer is never blocked — when the queue is
//! at capacity the oldest entry is evicted before the new one is pushed.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::types::Frame;

/// Result of a blocking take on a frame queue.
pub enum PollOutcome {
    /// A frame was dequeued.
    Frame(Frame),
    /// The timeout elapsed with no frame available. Not an error.
    TimedOut,
    /// The queue was closed; no further frames will arrive.
    Closed,
}

struct QueueState {
    frames: VecDeque<Frame>,
    closed: bool,
}

pub struct FrameQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    available: Condvar,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a frame, evicting the oldest entry first if the queue is at
    /// capacity. Returns `true` when an eviction happened. Pushing to a
    /// closed queue is a no-op.
    pub fn push(&self, frame: Frame) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return false;
        }
        let mut evicted = false;
        while state.frames.len() >= self.capacity {
            state.frames.pop_front();
            evicted = true;
        }
        state.frames.push_back(frame);
        drop(state);
        self.available.notify_one();
        evicted
    }

    /// Blocking dequeue with timeout. Wakes early if the queue is closed.
    pub fn take(&self, timeout: Duration) -> PollOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(frame) = state.frames.pop_front() {
                return PollOutcome::Frame(frame);
            }
            if state.closed {
                return PollOutcome::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return PollOutcome::TimedOut;
            }
            let (next, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = next;
        }
    }

    /// Non-blocking dequeue.
    pub fn try_take(&self) -> Option<Frame> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the queue and wake every blocked taker. Queued frames remain
    /// drainable via [`FrameQueue::try_take`].
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed
    }
}
