//! Per-stream snapshot builders and event matchers.

pub mod audit_log;
pub mod scrape_jobs;
