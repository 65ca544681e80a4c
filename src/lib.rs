//! Continuous monitor for an Ellucian Banner course-registration instance.
//!
//! The core is a persistent scrape-job queue dispatching HTTP scrapes against
//! the Banner self-service API, a diff-and-ingest pipeline emitting a compact
//! change feed into Postgres, and a realtime snapshot+delta streaming layer
//! over WebSockets.

pub mod app;
pub mod banner;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod logging;
pub mod scraper;
pub mod services;
pub mod signals;
pub mod state;
pub mod status;
pub mod stream;
pub mod utils;
pub mod web;
