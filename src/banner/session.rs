//! Session management for the Banner API.
//!
//! Banner authenticates scrapers the same way it authenticates browsers: a
//! pair of cookies (`JSESSIONID`, `SSB_COOKIE`) set during two warm-up page
//! loads, plus a per-session id echoed back on every search. All scrapes
//! share one `SessionManager`; mutation goes through a single async mutex so
//! only one task re-establishes a dropped session at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::distr::{Alphanumeric, SampleString};
use reqwest::cookie::{CookieStore, Jar};
use reqwest_middleware::ClientWithMiddleware;
use tracing::{debug, info, warn};
use url::Url;

use crate::banner::errors::BannerApiError;

/// How long a Banner session stays usable before we proactively rebuild it.
const SESSION_EXPIRY: Duration = Duration::from_secs(25 * 60);

/// Paths fetched during warm-up; each sets part of the cookie pair.
const WARM_UP_PATHS: [&str; 2] = ["/registration/registration", "/selfServiceMenu/data"];

/// Cookies that must exist for authenticated requests to succeed.
const REQUIRED_COOKIES: [&str; 2] = ["JSESSIONID", "SSB_COOKIE"];

#[derive(Debug, Clone)]
struct SessionData {
    session_id: String,
    created_at: Instant,
}

/// Shared session state for Banner API interactions.
pub struct SessionManager {
    state: tokio::sync::Mutex<Option<SessionData>>,
    /// Term currently selected on the upstream side, if any.
    selected_term: tokio::sync::Mutex<Option<String>>,
    base_url: Url,
    client: ClientWithMiddleware,
    jar: Arc<Jar>,
}

impl SessionManager {
    pub fn new(base_url: Url, client: ClientWithMiddleware, jar: Arc<Jar>) -> Self {
        Self {
            state: tokio::sync::Mutex::new(None),
            selected_term: tokio::sync::Mutex::new(None),
            base_url,
            client,
            jar,
        }
    }

    /// Ensure a live session exists, returning its unique session id.
    ///
    /// Performs the warm-up requests if no session is held or the current one
    /// has aged out. Cookie verification failures get one retry before
    /// surfacing as [`BannerApiError::SessionSetupFailed`].
    pub async fn ensure(&self) -> Result<String, BannerApiError> {
        let mut state = self.state.lock().await;

        if let Some(ref session) = *state
            && session.created_at.elapsed() < SESSION_EXPIRY
        {
            return Ok(session.session_id.clone());
        }

        info!("establishing Banner session");
        if let Err(first) = self.warm_up().await {
            warn!(error = %first, "session warm-up failed, retrying once");
            self.warm_up().await?;
        }

        let session_id = generate_session_id();
        debug!(session_id = %session_id, "Banner session established");
        *state = Some(SessionData {
            session_id: session_id.clone(),
            created_at: Instant::now(),
        });

        Ok(session_id)
    }

    /// Drop the held session so the next [`SessionManager::ensure`] rebuilds it.
    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
        *self.selected_term.lock().await = None;
    }

    /// Select `term` only if it isn't already the session's selected term.
    pub async fn ensure_term(&self, term: &str) -> Result<(), BannerApiError> {
        {
            let selected = self.selected_term.lock().await;
            if selected.as_deref() == Some(term) {
                return Ok(());
            }
        }
        self.select_term(term).await
    }

    /// Perform the warm-up GETs and verify the cookie pair materialized.
    async fn warm_up(&self) -> Result<(), BannerApiError> {
        for path in WARM_UP_PATHS {
            let url = join_path(&self.base_url, path);
            let response = self
                .client
                .get(url.clone())
                .query(&[("_", timestamp_nonce())])
                .send()
                .await
                .map_err(|e| BannerApiError::Transport(anyhow::Error::new(e)))?;

            if !response.status().is_success() {
                return Err(BannerApiError::SessionSetupFailed(format!(
                    "warm-up request to {path} returned {}",
                    response.status()
                )));
            }
        }

        self.verify_cookies()
    }

    /// Check that every required cookie exists for the base host.
    fn verify_cookies(&self) -> Result<(), BannerApiError> {
        let header = self.jar.cookies(&self.base_url);
        let cookie_str = header
            .as_ref()
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let missing: Vec<&str> = REQUIRED_COOKIES
            .iter()
            .filter(|name| {
                !cookie::Cookie::split_parse(cookie_str)
                    .filter_map(|c| c.ok())
                    .any(|c| c.name() == **name)
            })
            .copied()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BannerApiError::SessionSetupFailed(format!(
                "missing cookies after warm-up: {}",
                missing.join(", ")
            )))
        }
    }

    /// Select a term for the current session. Idempotent upstream; Banner
    /// replies with a redirect URL that must be followed to commit the
    /// selection server-side.
    pub async fn select_term(&self, term: &str) -> Result<(), BannerApiError> {
        let session_id = self.ensure().await?;

        let form_data = [
            ("term", term),
            ("studyPath", ""),
            ("studyPathText", ""),
            ("startDatepicker", ""),
            ("endDatepicker", ""),
            ("uniqueSessionId", &session_id),
        ];

        let url = join_path(&self.base_url, "/term/search");
        let response = self
            .client
            .post(url)
            .query(&[("mode", "search")])
            .form(&form_data)
            .send()
            .await
            .map_err(|e| BannerApiError::Transport(anyhow::Error::new(e)))?;

        if !response.status().is_success() {
            return Err(BannerApiError::InvalidSession(format!(
                "term selection for {term} returned {}",
                response.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct RedirectResponse {
            #[serde(rename = "fwdUrl")]
            fwd_url: String,
        }

        let redirect: RedirectResponse = response.json().await.map_err(|e| {
            BannerApiError::InvalidSession(format!("term selection returned non-JSON: {e}"))
        })?;

        let redirect_url = join_path(&self.base_url, &redirect.fwd_url);
        let redirect_response = self
            .client
            .get(redirect_url)
            .send()
            .await
            .map_err(|e| BannerApiError::Transport(anyhow::Error::new(e)))?;

        if !redirect_response.status().is_success() {
            return Err(BannerApiError::InvalidSession(format!(
                "term selection redirect returned {}",
                redirect_response.status()
            )));
        }

        *self.selected_term.lock().await = Some(term.to_owned());
        debug!(term, "term selected");
        Ok(())
    }

    /// Reset the upstream data form (required between searches).
    pub async fn reset_data_form(&self) -> Result<(), BannerApiError> {
        let url = join_path(&self.base_url, "/classSearch/resetDataForm");
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| BannerApiError::Transport(anyhow::Error::new(e)))?;

        if !response.status().is_success() {
            return Err(BannerApiError::InvalidSession(format!(
                "resetDataForm returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Append a path (possibly with query string) to the base URL.
pub(crate) fn join_path(base: &Url, path: &str) -> Url {
    // Url::join treats the base path as a directory boundary, which mangles
    // the ssb prefix; string concatenation matches what the browser does.
    let mut raw = base.as_str().trim_end_matches('/').to_string();
    raw.push_str(path);
    Url::parse(&raw).unwrap_or_else(|_| base.clone())
}

/// Generate a new session id mimicking Banner's own format: five random
/// alphanumerics followed by a millisecond timestamp.
fn generate_session_id() -> String {
    let random_part = Alphanumeric.sample_string(&mut rand::rng(), 5);
    format!("{random_part}{}", timestamp_nonce())
}

/// Millisecond-timestamp nonce appended to GETs to defeat upstream caching.
pub(crate) fn timestamp_nonce() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis()
        .to_string()
}

/// Browser-like User-Agent sent on every request.
pub(crate) fn user_agent() -> &'static str {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_preserves_ssb_prefix() {
        let base = Url::parse("https://ssbprod.example.edu/StudentRegistrationSsb/ssb").unwrap();
        let joined = join_path(&base, "/term/search");
        assert_eq!(
            joined.as_str(),
            "https://ssbprod.example.edu/StudentRegistrationSsb/ssb/term/search"
        );
    }

    #[test]
    fn session_ids_are_unique_and_formed() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(a.len() > 5);
        assert_ne!(a, b);
        assert!(a[5..].chars().all(|c| c.is_ascii_digit()));
    }
}
