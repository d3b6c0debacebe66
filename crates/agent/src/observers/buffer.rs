use super::ObservedEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Thread-safe bounded event buffer with drop-oldest overflow policy.
pub struct RingBuffer {
    capacity: usize,
    events: Mutex<VecDeque<ObservedEvent>>,
    observed: AtomicU64,
    dropped: AtomicU64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            observed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, event: ObservedEvent) {
        let mut events = self.events.lock().expect("ring buffer poisoned");
        if events.len() >= self.capacity {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
        self.observed.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove and return up to `limit` events, oldest first.
    pub fn drain(&self, limit: usize) -> Vec<ObservedEvent> {
        let mut events = self.events.lock().expect("ring buffer poisoned");
        let take = limit.min(events.len());
        events.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("ring buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn observed_total(&self) -> u64 {
        self.observed.load(Ordering::Relaxed)
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::ActivityKind;
    use serde_json::json;

    fn event(n: u64) -> ObservedEvent {
        ObservedEvent::new(ActivityKind::Process, json!({"pid": n}))
    }

    #[test]
    fn overflow_drops_oldest() {
        let buffer = RingBuffer::new(3);
        for n in 0..5 {
            buffer.push(event(n));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped_total(), 2);

        let drained = buffer.drain(10);
        assert_eq!(drained.len(), 3);
        // Events 0 and 1 were evicted.
        assert_eq!(drained[0].details["pid"], 2);
        assert_eq!(drained[2].details["pid"], 4);
    }

    #[test]
    fn drain_removes_what_it_returns() {
        let buffer = RingBuffer::new(10);
        for n in 0..4 {
            buffer.push(event(n));
        }
        assert_eq!(buffer.drain(2).len(), 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.drain(10).len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.drain(10).is_empty());
    }
}
