//! Banner API client module.
//!
//! Everything that talks to the Ellucian Banner self-service instance lives
//! here: session/cookie management, request building and signing, rate
//! limiting, and decoding of upstream JSON into domain models.

pub mod api;
pub mod errors;
pub mod json;
pub mod middleware;
pub mod models;
pub mod query;
pub mod session;

pub use api::BannerApi;
pub use errors::BannerApiError;
pub use models::{BannerTerm, Course, Pair, SearchResult};
pub use query::{QueryBuildError, SearchQuery, ValidatedQuery};
