//! Course-range scrape jobs: a subject restricted to a course-number range.

use serde::{Deserialize, Serialize};

use super::{fetch_all_pages, Job, JobError};
use crate::banner::{BannerApi, Course, SearchQuery};
use crate::data::models::TargetType;

/// Scrape the sections of a subject whose course numbers fall in
/// `[low, high]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseRangeJob {
    pub subject: String,
    pub term: String,
    pub low: i32,
    pub high: i32,
}

#[async_trait::async_trait]
impl Job for CourseRangeJob {
    fn target_type(&self) -> TargetType {
        TargetType::CourseRange
    }

    fn term(&self) -> &str {
        &self.term
    }

    async fn fetch(&self, api: &BannerApi) -> Result<Vec<Course>, JobError> {
        // An inverted range fails query validation, which fetch_all_pages
        // reports as a fatal job error.
        let query = SearchQuery::new()
            .subject(&self.subject)
            .course_numbers(self.low, self.high);
        fetch_all_pages(api, &self.term, &query).await
    }

    fn description(&self) -> String {
        format!(
            "subject {} numbers {}-{} in {}",
            self.subject, self.low, self.high, self.term
        )
    }
}
