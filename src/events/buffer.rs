//! Fixed-capacity ring buffer for domain events.
//!
//! Producers publish; each consumer holds its own cursor and is notified of
//! new events through a `watch` channel carrying the head position. A
//! consumer whose cursor falls behind the ring's base has lagged and must
//! resynchronize from a fresh snapshot.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::watch;

use crate::events::DomainEvent;

struct Inner {
    events: VecDeque<DomainEvent>,
    /// Logical index of the first event still held in the ring.
    base: u64,
}

/// Fixed-capacity ring buffer with cursor-based multi-reader access.
pub struct EventBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    head: watch::Sender<u64>,
}

impl EventBuffer {
    /// Create a new buffer holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (head, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::with_capacity(capacity),
                base: 0,
            }),
            capacity,
            head,
        }
    }

    /// Publish an event, evicting the oldest if the ring is full.
    pub fn publish(&self, event: DomainEvent) {
        let new_head = {
            let mut inner = self.inner.lock().expect("event buffer lock poisoned");
            if inner.events.len() >= self.capacity {
                inner.events.pop_front();
                inner.base += 1;
            }
            inner.events.push_back(event);
            inner.base + inner.events.len() as u64
        };
        let _ = self.head.send(new_head);
    }

    /// Subscribe, returning the current head position (the cursor to start
    /// reading from) and a receiver notified whenever the head advances.
    pub fn subscribe(&self) -> (u64, watch::Receiver<u64>) {
        let head = *self.head.borrow();
        (head, self.head.subscribe())
    }

    /// Read the event at a cursor position.
    ///
    /// Returns `None` both when the cursor is ahead of the head (nothing new)
    /// and when it is behind the base (the consumer lagged); distinguish via
    /// [`EventBuffer::base_offset`].
    pub fn read(&self, cursor: u64) -> Option<DomainEvent> {
        let inner = self.inner.lock().expect("event buffer lock poisoned");
        if cursor < inner.base {
            return None;
        }
        inner.events.get((cursor - inner.base) as usize).cloned()
    }

    /// Logical index of the oldest event still held.
    pub fn base_offset(&self) -> u64 {
        self.inner.lock().expect("event buffer lock poisoned").base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ScrapeJobEvent;

    fn make_event(id: i32) -> DomainEvent {
        DomainEvent::ScrapeJob(ScrapeJobEvent::Completed { id, subject: None })
    }

    #[test]
    fn publish_and_read_single_event() {
        let buffer = EventBuffer::new(10);
        let (cursor, _) = buffer.subscribe();

        buffer.publish(make_event(1));

        assert!(buffer.read(cursor).is_some());
    }

    #[test]
    fn cursor_advances_to_head() {
        let buffer = EventBuffer::new(10);
        let (mut cursor, _) = buffer.subscribe();

        for id in 1..=3 {
            buffer.publish(make_event(id));
        }

        for _ in 0..3 {
            assert!(buffer.read(cursor).is_some());
            cursor += 1;
        }
        assert!(buffer.read(cursor).is_none(), "past head");
    }

    #[test]
    fn oldest_events_pruned_at_capacity() {
        let buffer = EventBuffer::new(3);
        let (initial_cursor, _) = buffer.subscribe();

        for id in 1..=4 {
            buffer.publish(make_event(id));
        }

        // Initial cursor fell behind the base
        assert!(buffer.read(initial_cursor).is_none());
        assert_eq!(buffer.base_offset(), 1);
        assert!(buffer.read(1).is_some());
    }

    #[tokio::test]
    async fn subscribe_notifies_on_publish() {
        let buffer = EventBuffer::new(10);
        let (_, mut watch_rx) = buffer.subscribe();

        buffer.publish(make_event(1));

        assert!(watch_rx.has_changed().unwrap());
        assert_eq!(*watch_rx.borrow_and_update(), 1);
    }
}
