//! CRN-targeted scrape jobs: a single section or an explicit list.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Job, JobError};
use crate::banner::{BannerApi, Course};
use crate::data::models::TargetType;

/// Scrape one section by CRN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleCrnJob {
    pub term: String,
    pub crn: String,
}

#[async_trait::async_trait]
impl Job for SingleCrnJob {
    fn target_type(&self) -> TargetType {
        TargetType::SingleCrn
    }

    fn term(&self) -> &str {
        &self.term
    }

    async fn fetch(&self, api: &BannerApi) -> Result<Vec<Course>, JobError> {
        let course = api
            .get_course_by_crn(&self.term, &self.crn)
            .await
            .map_err(JobError::from_api)?;

        // A vanished CRN is a valid observation, not a failure.
        if course.is_none() {
            debug!(crn = %self.crn, term = %self.term, "CRN not found upstream");
        }

        Ok(course.into_iter().collect())
    }

    fn description(&self) -> String {
        format!("CRN {} in {}", self.crn, self.term)
    }
}

/// Scrape an explicit list of CRNs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrnListJob {
    pub term: String,
    pub crns: Vec<String>,
}

#[async_trait::async_trait]
impl Job for CrnListJob {
    fn target_type(&self) -> TargetType {
        TargetType::CrnList
    }

    fn term(&self) -> &str {
        &self.term
    }

    async fn fetch(&self, api: &BannerApi) -> Result<Vec<Course>, JobError> {
        if self.crns.is_empty() {
            return Err(JobError::Fatal(anyhow::anyhow!("empty CRN list")));
        }

        let mut courses = Vec::with_capacity(self.crns.len());
        for crn in &self.crns {
            let course = api
                .get_course_by_crn(&self.term, crn)
                .await
                .map_err(JobError::from_api)?;
            match course {
                Some(course) => courses.push(course),
                None => debug!(crn = %crn, term = %self.term, "CRN not found upstream"),
            }
        }

        Ok(courses)
    }

    fn description(&self) -> String {
        format!("{} CRNs in {}", self.crns.len(), self.term)
    }
}
