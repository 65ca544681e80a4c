//! Banner API client: request building, decoding, and auth-expiry recovery.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use reqwest::cookie::Jar;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::banner::errors::BannerApiError;
use crate::banner::json::parse_json_with_context;
use crate::banner::middleware::RateLimitMiddleware;
use crate::banner::models::{BannerTerm, Course, Pair, SearchResult};
use crate::banner::query::{SearchQuery, ValidatedQuery};
use crate::banner::session::{SessionManager, join_path, timestamp_nonce, user_agent};
use crate::config::RateLimitingConfig;

/// Main Banner API client.
///
/// One instance is shared process-wide; all scrapes flow through its session
/// manager so cookies are shared and re-establishment is serialized.
pub struct BannerApi {
    session: SessionManager,
    client: ClientWithMiddleware,
    base_url: Url,
}

impl BannerApi {
    /// Creates a new client with the given rate limiting configuration.
    pub fn new_with_config(
        base_url: String,
        rate_limiting: &RateLimitingConfig,
    ) -> crate::error::Result<Self> {
        let base_url = Url::parse(&base_url).context("invalid Banner base URL")?;

        let jar = Arc::new(Jar::default());
        let inner = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(user_agent())
            .tcp_keepalive(Some(std::time::Duration::from_secs(5 * 60)))
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;

        let client = ClientBuilder::new(inner)
            .with(RateLimitMiddleware::new(rate_limiting))
            .build();

        let session = SessionManager::new(base_url.clone(), client.clone(), jar);

        Ok(Self {
            session,
            client,
            base_url,
        })
    }

    /// Warm the session once. Called at service startup; failure is reported
    /// to the caller, who logs and lets scraping stall until cookies arrive.
    pub async fn setup(&self) -> Result<(), BannerApiError> {
        self.session.ensure().await.map(|_| ())
    }

    /// GET a Banner endpoint and decode its JSON body.
    ///
    /// Classifies the failure: 429 is rate limiting, an HTML body in place of
    /// JSON means the session expired, anything else non-2xx is transport.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, BannerApiError> {
        let url = join_path(&self.base_url, path);
        let response = self
            .client
            .get(url.clone())
            .query(params)
            .send()
            .await
            .map_err(|e| BannerApiError::Transport(anyhow::Error::new(e)))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(BannerApiError::RateLimited {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(BannerApiError::Transport(anyhow::anyhow!(
                "request to {path} returned {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if !content_type.starts_with("application/json") {
            // Banner redirects expired sessions to an HTML login page with a
            // 200 status; the content type is the only reliable signal.
            return Err(BannerApiError::InvalidSession(format!(
                "expected JSON from {path}, got {content_type:?}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| BannerApiError::Transport(anyhow::Error::new(e)))?;

        parse_json_with_context(&body).map_err(|source| BannerApiError::ParseFailed {
            status: status.as_u16(),
            url: url.to_string(),
            source,
        })
    }

    /// Retrieves the term listing. Does not require an active session.
    pub async fn get_terms(
        &self,
        search: &str,
        page: i32,
        max_results: i32,
    ) -> Result<Vec<BannerTerm>, BannerApiError> {
        self.get_json(
            "/classSearch/getTerms",
            &[
                ("searchTerm", search.to_owned()),
                ("offset", page.max(1).to_string()),
                ("max", max_results.to_string()),
                ("_", timestamp_nonce()),
            ],
        )
        .await
    }

    /// Retrieves the subject list for a term.
    pub async fn get_subjects(
        &self,
        search: &str,
        term: &str,
        offset: i32,
        max_results: i32,
    ) -> Result<Vec<Pair>, BannerApiError> {
        let session_id = self.session.ensure().await?;
        self.get_json(
            "/classSearch/get_subject",
            &[
                ("searchTerm", search.to_owned()),
                ("term", term.to_owned()),
                ("offset", offset.max(1).to_string()),
                ("max", max_results.to_string()),
                ("uniqueSessionId", session_id),
                ("_", timestamp_nonce()),
            ],
        )
        .await
    }

    /// Retrieves the campus reference list.
    pub async fn get_campuses(&self, term: &str) -> Result<Vec<Pair>, BannerApiError> {
        self.get_lookup("/classSearch/get_campus", term).await
    }

    /// Retrieves the instructional-method reference list.
    pub async fn get_instructional_methods(&self, term: &str) -> Result<Vec<Pair>, BannerApiError> {
        self.get_lookup("/classSearch/get_instructionalMethod", term)
            .await
    }

    /// Retrieves the part-of-term reference list.
    pub async fn get_parts_of_term(&self, term: &str) -> Result<Vec<Pair>, BannerApiError> {
        self.get_lookup("/classSearch/get_partOfTerm", term).await
    }

    /// Retrieves the section-attribute reference list.
    pub async fn get_attributes(&self, term: &str) -> Result<Vec<Pair>, BannerApiError> {
        self.get_lookup("/classSearch/get_attribute", term).await
    }

    async fn get_lookup(&self, path: &str, term: &str) -> Result<Vec<Pair>, BannerApiError> {
        let session_id = self.session.ensure().await?;
        self.get_json(
            path,
            &[
                ("searchTerm", String::new()),
                ("term", term.to_owned()),
                ("offset", "1".to_owned()),
                ("max", "500".to_owned()),
                ("uniqueSessionId", session_id),
                ("_", timestamp_nonce()),
            ],
        )
        .await
    }

    /// Performs a course search.
    ///
    /// Ensures the session has the right term selected, resets the search
    /// form, and retries once after re-establishing the session if Banner
    /// answers with a login page.
    pub async fn search(
        &self,
        term: &str,
        query: &ValidatedQuery,
        sort: &str,
        sort_descending: bool,
    ) -> Result<SearchResult, BannerApiError> {
        match self.search_once(term, query, sort, sort_descending).await {
            Err(BannerApiError::InvalidSession(reason)) => {
                warn!(reason, "session expired mid-search, re-ensuring once");
                self.session.invalidate().await;
                self.session.ensure().await?;
                self.search_once(term, query, sort, sort_descending).await
            }
            other => other,
        }
    }

    async fn search_once(
        &self,
        term: &str,
        query: &ValidatedQuery,
        sort: &str,
        sort_descending: bool,
    ) -> Result<SearchResult, BannerApiError> {
        self.session.reset_data_form().await?;
        self.session.ensure_term(term).await?;
        let session_id = self.session.ensure().await?;

        let mut params: HashMap<String, String> = query.to_params();
        params.insert("txt_term".to_owned(), term.to_owned());
        params.insert("uniqueSessionId".to_owned(), session_id);
        params.insert("sortColumn".to_owned(), sort.to_owned());
        params.insert(
            "sortDirection".to_owned(),
            if sort_descending { "desc" } else { "asc" }.to_owned(),
        );
        params.insert("startDatepicker".to_owned(), String::new());
        params.insert("endDatepicker".to_owned(), String::new());

        let pairs: Vec<(&str, String)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();

        let result: SearchResult = self
            .get_json("/searchResults/searchResults", &pairs)
            .await?;

        if !result.success {
            return Err(BannerApiError::InvalidSession(
                "search marked unsuccessful by Banner".to_owned(),
            ));
        }

        // A null data array on the first page is Banner throttling us (an
        // empty subject comes back as an empty array, not null).
        if result.data.is_none() && result.page_offset == 0 {
            return Err(BannerApiError::RateLimited { status: 200 });
        }

        debug!(term, query = %query, count = result.data.as_ref().map(Vec::len), "search complete");
        Ok(result)
    }

    /// Retrieves a single course by CRN via a minimal search.
    pub async fn get_course_by_crn(
        &self,
        term: &str,
        crn: &str,
    ) -> Result<Option<Course>, BannerApiError> {
        let query = SearchQuery::new()
            .course_reference_number(crn)
            .max_results(1)
            .build()
            .expect("CRN-only query sets no ranges to invert");

        let result = self
            .search(term, &query, "subjectDescription", false)
            .await?;

        Ok(result.data.and_then(|courses| courses.into_iter().next()))
    }

    /// Selects a term for the current session.
    pub async fn select_term(&self, term: &str) -> Result<(), BannerApiError> {
        self.session.select_term(term).await
    }
}

impl std::fmt::Debug for BannerApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BannerApi")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
