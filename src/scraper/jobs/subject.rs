//! Subject scrape jobs: every section of one subject within a term.

use serde::{Deserialize, Serialize};

use super::{fetch_all_pages, Job, JobError};
use crate::banner::{BannerApi, Course, SearchQuery};
use crate::data::models::TargetType;

/// Scrape every section of a subject within a term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectJob {
    pub subject: String,
    pub term: String,
}

impl SubjectJob {
    pub fn new(subject: String, term: String) -> Self {
        Self { subject, term }
    }
}

#[async_trait::async_trait]
impl Job for SubjectJob {
    fn target_type(&self) -> TargetType {
        TargetType::Subject
    }

    fn term(&self) -> &str {
        &self.term
    }

    async fn fetch(&self, api: &BannerApi) -> Result<Vec<Course>, JobError> {
        let query = SearchQuery::new().subject(&self.subject);
        fetch_all_pages(api, &self.term, &query).await
    }

    fn description(&self) -> String {
        format!("subject {} in {}", self.subject, self.term)
    }
}
