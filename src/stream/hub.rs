//! The stream hub: one value owning the event ring and the computed-stream
//! manager.
//!
//! Producers (ingest, queue operations, scheduler) publish typed domain
//! events; gateway connections subscribe to both the raw event feed and the
//! computed updates. Snapshot state lives behind the ring (event-backed
//! streams rebuild snapshots from the store; computed streams cache their
//! last value in the manager).

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::{broadcast, watch};

use crate::events::{DomainEvent, EventBuffer};
use crate::stream::computed::{ComputedCacheKey, ComputedStreamManager, ComputedUpdate};

/// Number of events the ring retains; a subscriber that falls further behind
/// is resynced from a fresh snapshot.
const EVENT_BUFFER_CAPACITY: usize = 1024;

/// Registry of the typed streams.
#[derive(Clone)]
pub struct StreamHub {
    events: Arc<EventBuffer>,
    computed: ComputedStreamManager,
}

impl StreamHub {
    /// Build the hub and start the computed-stream background task.
    pub fn new(pool: PgPool) -> Self {
        let events = Arc::new(EventBuffer::new(EVENT_BUFFER_CAPACITY));
        let computed = ComputedStreamManager::new(events.clone(), pool);
        Self { events, computed }
    }

    /// The shared event buffer, for components that publish through
    /// `DbContext`.
    pub fn events(&self) -> &Arc<EventBuffer> {
        &self.events
    }

    /// Publish a domain event to every stream consumer.
    pub fn publish(&self, event: DomainEvent) {
        self.events.publish(event);
    }

    /// Subscribe to the raw event feed: current cursor plus head notifier.
    pub fn subscribe_events(&self) -> (u64, watch::Receiver<u64>) {
        self.events.subscribe()
    }

    /// Oldest event position still held by the ring.
    pub fn base_offset(&self) -> u64 {
        self.events.base_offset()
    }

    /// Read one event at a cursor position.
    pub fn read_event(&self, cursor: u64) -> Option<DomainEvent> {
        self.events.read(cursor)
    }

    /// Subscribe to computed-stream updates.
    pub fn subscribe_computed(&self) -> broadcast::Receiver<ComputedUpdate> {
        self.computed.subscribe()
    }

    /// Register interest in a computed cache key.
    pub fn register_computed(&self, key: ComputedCacheKey) {
        self.computed.register(key);
    }

    /// Deregister interest in a computed cache key.
    pub fn deregister_computed(&self, key: ComputedCacheKey) {
        self.computed.deregister(key);
    }
}
