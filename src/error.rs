//! Crate-wide result alias.
//!
//! Most fallible paths propagate `anyhow::Error` with context attached at the
//! I/O boundary; typed errors exist only where a caller branches on the kind
//! (see `banner::errors` and `scraper::jobs`).

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
