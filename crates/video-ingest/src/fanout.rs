//! Fan-out buffer: one bounded queue per declared consumer, all fed by a
//! single publisher.
//!
//! Independent queues keep a slow consumer from pushing back on the producer
//! or starving its siblings; each detection task loses its own frames
//! (oldest first) and nobody else's.

use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    queue::{FrameQueue, PollOutcome},
    types::Frame,
};

pub struct FanOutBuffer {
    queues: HashMap<String, Arc<FrameQueue>>,
}

impl FanOutBuffer {
    /// Precompute one bounded queue per consumer name.
    pub fn new<S: AsRef<str>>(consumer_names: &[S], depth_per_queue: usize) -> Self {
        let queues = consumer_names
            .iter()
            .map(|name| {
                (
                    name.as_ref().to_string(),
                    Arc::new(FrameQueue::new(depth_per_queue)),
                )
            })
            .collect();
        Self { queues }
    }

    pub fn consumer_names(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    /// Push the frame into every per-consumer queue, evicting the oldest
    /// entry independently per queue. Never blocks the publisher.
    pub fn publish(&self, frame: &Frame) {
        for (name, queue) in &self.queues {
            if queue.push(frame.clone()) {
                metrics::counter!("ingest_fanout_evicted_total", "consumer" => name.clone())
                    .increment(1);
            }
            metrics::gauge!("ingest_fanout_depth", "consumer" => name.clone())
                .set(queue.len() as f64);
        }
    }

    /// Consumer-side blocking take.
    pub fn take(&self, name: &str, timeout: Duration) -> PollOutcome {
        match self.queues.get(name) {
            Some(queue) => queue.take(timeout),
            None => PollOutcome::Closed,
        }
    }

    /// Current depth of one consumer queue.
    pub fn depth(&self, name: &str) -> usize {
        self.queues.get(name).map(|q| q.len()).unwrap_or(0)
    }

    /// Close every queue, waking all blocked takers. Used during drain.
    pub fn close(&self) {
        for queue in self.queues.values() {
            queue.close();
        }
    }
}
