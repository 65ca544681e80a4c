//! Database context with automatic event emission.
//!
//! All store operations that change observable state go through this context
//! so the matching domain event reaches the stream hub without each call site
//! remembering to publish it.

use sqlx::PgPool;
use std::sync::Arc;

use crate::data::ingest::CourseOps;
use crate::data::scrape_jobs::ScrapeJobOps;
use crate::events::EventBuffer;

/// Database context wrapping the pool and the event buffer.
#[derive(Clone)]
pub struct DbContext {
    pool: PgPool,
    events: Arc<EventBuffer>,
}

impl DbContext {
    pub fn new(pool: PgPool, events: Arc<EventBuffer>) -> Self {
        Self { pool, events }
    }

    /// The underlying connection pool, for read-only queries.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The event buffer events are published into.
    pub fn events(&self) -> &EventBuffer {
        &self.events
    }

    /// Scrape job queue operations.
    pub fn scrape_jobs(&self) -> ScrapeJobOps<'_> {
        ScrapeJobOps::new(self)
    }

    /// Course ingest operations.
    pub fn courses(&self) -> CourseOps<'_> {
        CourseOps::new(self)
    }
}
