//! Error types for the Banner API client.
//!
//! The variants mirror the retry taxonomy the worker applies: transport and
//! rate-limit failures retry, an invalid session retries after one re-ensure,
//! decode failures retry a bounded number of times.

#[derive(Debug, thiserror::Error)]
pub enum BannerApiError {
    /// Network error, timeout, or a non-2xx response with no usable body.
    #[error("transport failure: {0}")]
    Transport(#[source] anyhow::Error),

    /// The upstream answered with an HTML login page instead of JSON; the
    /// session cookies are gone or the term selection was dropped.
    #[error("Banner session is invalid or expired: {0}")]
    InvalidSession(String),

    /// Upstream 429, or an empty first page that signals throttling.
    #[error("rate limited by Banner (status {status})")]
    RateLimited { status: u16 },

    /// The response was JSON but didn't match the expected shape.
    #[error("failed to decode response from {url} (status {status})")]
    ParseFailed {
        status: u16,
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// Cookie warm-up failed: `JSESSIONID` / `SSB_COOKIE` never materialized.
    #[error("session setup failed: {0}")]
    SessionSetupFailed(String),
}
