use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::RequestTiming;

/// Bounded hand-off queue for completed request timings.
///
/// Application threads push; the reporter drains. When full the oldest
/// timing is discarded.
#[derive(Debug)]
pub struct RequestTimingSink {
    capacity: usize,
    queue: Mutex<VecDeque<RequestTiming>>,
    discarded: AtomicU64,
}

impl RequestTimingSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn add(&self, timing: RequestTiming) {
        let mut queue = self.queue.lock();
        queue.push_back(timing);
        if queue.len() > self.capacity {
            queue.pop_front();
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn drain(&self) -> Vec<RequestTiming> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timings pushed out because the queue was full.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}
