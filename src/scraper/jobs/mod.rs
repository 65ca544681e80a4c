//! Scrape job targets.
//!
//! A job row stores a `target_type` discriminant plus a JSON payload; this
//! module turns that pair back into a typed job value and defines how each
//! target fetches its courses. Payload parse failures are fatal (the row can
//! never succeed), upstream failures are classified for the retry policy.

pub mod course_range;
pub mod crn;
pub mod subject;

use std::fmt;

use crate::banner::{BannerApi, BannerApiError, Course, SearchQuery};
use crate::data::models::TargetType;
use crate::scraper::retry::FailureKind;

pub use course_range::CourseRangeJob;
pub use crn::{CrnListJob, SingleCrnJob};
pub use subject::SubjectJob;

/// Errors that can occur while turning a job row into a typed job.
#[derive(Debug)]
pub enum JobParseError {
    InvalidJson(serde_json::Error),
}

impl fmt::Display for JobParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobParseError::InvalidJson(e) => write!(f, "invalid JSON in job payload: {e}"),
        }
    }
}

impl std::error::Error for JobParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JobParseError::InvalidJson(e) => Some(e),
        }
    }
}

/// Errors that can occur during job processing.
#[derive(Debug)]
pub enum JobError {
    /// Transient failure; the retry policy decides what happens next.
    Retriable {
        kind: FailureKind,
        source: anyhow::Error,
    },
    /// The job itself is broken; exhaust immediately.
    Fatal(anyhow::Error),
}

impl JobError {
    /// Classify an upstream client error into the retry taxonomy.
    pub fn from_api(err: BannerApiError) -> Self {
        let kind = match &err {
            BannerApiError::Transport(_) => FailureKind::Transport,
            BannerApiError::InvalidSession(_) | BannerApiError::SessionSetupFailed(_) => {
                FailureKind::AuthExpired
            }
            BannerApiError::RateLimited { .. } => FailureKind::RateLimited,
            BannerApiError::ParseFailed { .. } => FailureKind::Decode,
        };
        JobError::Retriable {
            kind,
            source: anyhow::Error::new(err),
        }
    }

    /// The failure kind the retry policy sees.
    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::Retriable { kind, .. } => *kind,
            JobError::Fatal(_) => FailureKind::Fatal,
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Retriable { kind, source } => {
                write!(f, "retriable failure ({kind:?}): {source:#}")
            }
            JobError::Fatal(e) => write!(f, "fatal failure: {e:#}"),
        }
    }
}

impl std::error::Error for JobError {}

/// Common interface for all job targets.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// The target type this job persists as.
    fn target_type(&self) -> TargetType;

    /// The term this job scrapes.
    fn term(&self) -> &str;

    /// Fetch the course observations for this target.
    async fn fetch(&self, api: &BannerApi) -> Result<Vec<Course>, JobError>;

    /// Human-readable description for logging.
    fn description(&self) -> String;
}

/// Typed job dispatching to the per-target implementations.
#[derive(Debug, Clone)]
pub enum JobType {
    Subject(SubjectJob),
    CourseRange(CourseRangeJob),
    CrnList(CrnListJob),
    SingleCrn(SingleCrnJob),
}

impl JobType {
    /// Reconstruct a typed job from a row's discriminant and payload.
    pub fn from_target_type_and_payload(
        target_type: TargetType,
        payload: serde_json::Value,
    ) -> Result<Self, JobParseError> {
        let job = match target_type {
            TargetType::Subject => JobType::Subject(
                serde_json::from_value(payload).map_err(JobParseError::InvalidJson)?,
            ),
            TargetType::CourseRange => JobType::CourseRange(
                serde_json::from_value(payload).map_err(JobParseError::InvalidJson)?,
            ),
            TargetType::CrnList => JobType::CrnList(
                serde_json::from_value(payload).map_err(JobParseError::InvalidJson)?,
            ),
            TargetType::SingleCrn => JobType::SingleCrn(
                serde_json::from_value(payload).map_err(JobParseError::InvalidJson)?,
            ),
        };
        Ok(job)
    }

    /// Convert to a `Job` trait object.
    pub fn boxed(self) -> Box<dyn Job> {
        match self {
            JobType::Subject(job) => Box::new(job),
            JobType::CourseRange(job) => Box::new(job),
            JobType::CrnList(job) => Box::new(job),
            JobType::SingleCrn(job) => Box::new(job),
        }
    }
}

/// Page size for paginated search fetches.
pub(crate) const PAGE_SIZE: i32 = 500;

/// Fetch every page of a search, following the offset until a short page.
///
/// A base query that fails validation can never succeed on retry, so it is
/// fatal for the job.
pub(crate) async fn fetch_all_pages(
    api: &BannerApi,
    term: &str,
    base_query: &SearchQuery,
) -> Result<Vec<Course>, JobError> {
    let mut courses = Vec::new();
    let mut offset = 0;

    loop {
        let query = base_query
            .clone()
            .offset(offset)
            .max_results(PAGE_SIZE)
            .build()
            .map_err(|e| JobError::Fatal(anyhow::Error::new(e)))?;

        let result = api
            .search(term, &query, "subjectDescription", false)
            .await
            .map_err(JobError::from_api)?;

        let page = result.data.unwrap_or_default();
        let page_len = page.len() as i32;
        courses.extend(page);

        if page_len < PAGE_SIZE {
            break;
        }
        offset += PAGE_SIZE;
    }

    Ok(courses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subject_payload_roundtrip() {
        let job = JobType::from_target_type_and_payload(
            TargetType::Subject,
            json!({"subject": "CS", "term": "202610"}),
        )
        .unwrap();
        let JobType::Subject(subject) = job else {
            panic!("expected subject job");
        };
        assert_eq!(subject.subject, "CS");
        assert_eq!(subject.term, "202610");
    }

    #[test]
    fn crn_list_payload_roundtrip() {
        let job = JobType::from_target_type_and_payload(
            TargetType::CrnList,
            json!({"term": "202610", "crns": ["12345", "23456"]}),
        )
        .unwrap();
        let JobType::CrnList(list) = job else {
            panic!("expected crn list job");
        };
        assert_eq!(list.crns.len(), 2);
    }

    #[test]
    fn malformed_payload_is_parse_error() {
        let result = JobType::from_target_type_and_payload(
            TargetType::Subject,
            json!({"not_subject": true}),
        );
        assert!(matches!(result, Err(JobParseError::InvalidJson(_))));
    }

    #[test]
    fn api_error_classification() {
        use crate::banner::BannerApiError;

        let err = JobError::from_api(BannerApiError::RateLimited { status: 429 });
        assert_eq!(err.kind(), FailureKind::RateLimited);

        let err = JobError::from_api(BannerApiError::InvalidSession("login page".into()));
        assert_eq!(err.kind(), FailureKind::AuthExpired);

        let err = JobError::Fatal(anyhow::anyhow!("bad payload"));
        assert_eq!(err.kind(), FailureKind::Fatal);
    }
}
