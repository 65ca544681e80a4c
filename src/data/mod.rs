//! Relational store: row types, queue operations, the diff-and-ingest
//! pipeline, and the query functions the read API contracts consume.

pub mod audit;
mod context;
pub mod courses;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod reference;
pub mod scrape_jobs;
pub mod scraper_stats;
pub mod sessions;
pub mod term_subjects;
pub mod terms;
pub mod users;

pub use context::DbContext;
