//! Rate limiting for Banner API requests.
//!
//! Combines rate limiter logic with HTTP middleware enforcement, classifying
//! requests by URL pattern and throttling each class independently so a burst
//! of searches cannot starve session upkeep.

use crate::config::RateLimitingConfig;
use crate::utils::fmt_duration;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Different types of Banner API requests, each with its own rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Metadata lookups: `/getTerms`, `/get_subject`, `/get_campus`,
    /// `/get_instructionalMethod`, `/get_partOfTerm`, `/get_attribute`
    Metadata,
    /// Session creation and management: `/registration`, `/selfServiceMenu`,
    /// `/term/termSelection`, `/term/search`
    Session,
    /// Data form resets: `/resetDataForm`
    Reset,
    /// Course search requests: `/searchResults`, `/classSearch`
    Search,
}

/// Static rule table for endpoint classification.
/// Ordered most-specific first so `/classSearch/getTerms` matches Metadata,
/// not Search.
const ENDPOINT_RULES: &[(RequestType, &[&str])] = &[
    (
        RequestType::Metadata,
        &[
            "/getTerms",
            "/get_subject",
            "/get_campus",
            "/get_instructionalMethod",
            "/get_partOfTerm",
            "/get_attribute",
        ],
    ),
    (
        RequestType::Session,
        &[
            "/registration",
            "/selfServiceMenu",
            "/term/termSelection",
            "/term/search",
        ],
    ),
    (RequestType::Reset, &["/resetDataForm"]),
    (RequestType::Search, &["/searchResults", "/classSearch"]),
];

/// Classifies a URL path into a request type using `ENDPOINT_RULES`.
fn classify(path: &str) -> RequestType {
    for (request_type, patterns) in ENDPOINT_RULES {
        if patterns.iter().any(|p| path.contains(p)) {
            return *request_type;
        }
    }
    RequestType::Search // fallback for unknown endpoints
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A rate limiter that manages different request types with different limits.
pub struct BannerRateLimiter {
    session_limiter: DirectLimiter,
    search_limiter: DirectLimiter,
    metadata_limiter: DirectLimiter,
    reset_limiter: DirectLimiter,
}

impl BannerRateLimiter {
    /// Creates a new rate limiter with the given configuration.
    pub fn new(config: &RateLimitingConfig) -> Self {
        let quota = |rpm: u32| {
            Quota::with_period(Duration::from_secs(60) / rpm.max(1))
                .expect("non-zero rate limit period")
                .allow_burst(NonZeroU32::new(config.burst_allowance.max(1)).unwrap())
        };

        Self {
            session_limiter: RateLimiter::direct(quota(config.session_rpm)),
            search_limiter: RateLimiter::direct(quota(config.search_rpm)),
            metadata_limiter: RateLimiter::direct(quota(config.metadata_rpm)),
            reset_limiter: RateLimiter::direct(quota(config.reset_rpm)),
        }
    }

    /// Waits for permission to make a request of the given type.
    pub async fn wait_for_permission(&self, request_type: RequestType) {
        let limiter = match request_type {
            RequestType::Session => &self.session_limiter,
            RequestType::Search => &self.search_limiter,
            RequestType::Metadata => &self.metadata_limiter,
            RequestType::Reset => &self.reset_limiter,
        };
        limiter.until_ready().await;
    }
}

/// Middleware that throttles outgoing Banner requests per endpoint class.
pub struct RateLimitMiddleware {
    limiter: Arc<BannerRateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(config: &RateLimitingConfig) -> Self {
        Self {
            limiter: Arc::new(BannerRateLimiter::new(config)),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let request_type = classify(req.url().path());

        let waited = Instant::now();
        self.limiter.wait_for_permission(request_type).await;
        let waited = waited.elapsed();

        if waited > Duration::from_millis(100) {
            debug!(
                ?request_type,
                path = req.url().path(),
                waited = fmt_duration(waited),
                "request throttled"
            );
        }

        next.run(req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_most_specific_first() {
        assert_eq!(classify("/classSearch/getTerms"), RequestType::Metadata);
        assert_eq!(classify("/classSearch/get_subject"), RequestType::Metadata);
        assert_eq!(classify("/searchResults/searchResults"), RequestType::Search);
        assert_eq!(classify("/classSearch/resetDataForm"), RequestType::Reset);
        assert_eq!(classify("/registration/registration"), RequestType::Session);
        assert_eq!(classify("/term/search"), RequestType::Session);
        assert_eq!(classify("/unknown/endpoint"), RequestType::Search);
    }
}
