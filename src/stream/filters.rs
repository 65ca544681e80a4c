//! Stream filter types and parsing helpers.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::data::models::{ScrapeJobStatus, ScrapePriority, TargetType};
use crate::data::scraper_stats::{validate_bucket, validate_period};
use crate::stream::protocol::{StreamError, StreamFilter};

/// Filter for the `scrapeJobs` stream: any combination of status set,
/// target type set, and priority set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ScrapeJobsFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<ScrapeJobStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Vec<ScrapePriority>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<Vec<TargetType>>,
}

/// Filter for the `auditLog` stream: course, time window, field names.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AuditLogFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_changed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
    #[serde(skip)]
    #[ts(skip)]
    pub since_dt: Option<chrono::DateTime<chrono::Utc>>,
}

/// Filter for the `scraperTimeseries` stream: window and bucket width.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ScraperTimeseriesFilter {
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

/// Filter for the `scraperSubjects` stream: an optional subject set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ScraperSubjectsFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<String>>,
}

fn default_period() -> String {
    "24h".to_string()
}

pub fn parse_scrape_jobs_filter(
    filter: Option<StreamFilter>,
) -> Result<ScrapeJobsFilter, StreamError> {
    match filter {
        Some(StreamFilter::ScrapeJobs(filter)) => Ok(filter),
        Some(_) => Err(StreamError::invalid_filter("Invalid scrape jobs filter")),
        None => Ok(ScrapeJobsFilter::default()),
    }
}

pub fn parse_audit_log_filter(filter: Option<StreamFilter>) -> Result<AuditLogFilter, StreamError> {
    let mut filter = match filter {
        Some(StreamFilter::AuditLog(filter)) => filter,
        Some(_) => return Err(StreamError::invalid_filter("Invalid audit log filter")),
        None => AuditLogFilter::default(),
    };

    filter.since_dt = match filter.since.as_deref() {
        Some(val) => Some(
            chrono::DateTime::parse_from_rfc3339(val)
                .map_err(|_| StreamError::invalid_filter("Invalid audit log 'since'"))?
                .with_timezone(&chrono::Utc),
        ),
        None => None,
    };

    Ok(filter)
}

/// The stats stream is a singleton; any supplied filter is invalid.
pub fn parse_scraper_stats_filter(filter: Option<StreamFilter>) -> Result<(), StreamError> {
    match filter {
        None => Ok(()),
        Some(_) => Err(StreamError::invalid_filter(
            "scraperStats takes no filter",
        )),
    }
}

pub fn parse_scraper_timeseries_filter(
    filter: Option<StreamFilter>,
) -> Result<ScraperTimeseriesFilter, StreamError> {
    let f = match filter {
        Some(StreamFilter::ScraperTimeseries(f)) => f,
        Some(_) => {
            return Err(StreamError::invalid_filter(
                "Invalid scraper timeseries filter",
            ));
        }
        None => ScraperTimeseriesFilter {
            period: default_period(),
            bucket: None,
        },
    };
    if validate_period(&f.period).is_none() {
        return Err(StreamError::invalid_filter(format!(
            "Invalid period '{}'. Valid: 1h, 6h, 24h, 7d, 30d",
            f.period
        )));
    }
    if let Some(ref b) = f.bucket
        && validate_bucket(b).is_none()
    {
        return Err(StreamError::invalid_filter(format!(
            "Invalid bucket '{b}'. Valid: 1m, 5m, 15m, 1h, 6h"
        )));
    }
    Ok(f)
}

pub fn parse_scraper_subjects_filter(
    filter: Option<StreamFilter>,
) -> Result<ScraperSubjectsFilter, StreamError> {
    match filter {
        Some(StreamFilter::ScraperSubjects(f)) => Ok(f),
        Some(_) => Err(StreamError::invalid_filter(
            "Invalid scraper subjects filter",
        )),
        None => Ok(ScraperSubjectsFilter::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::protocol::StreamErrorCode;

    #[test]
    fn scrape_jobs_filter_defaults_when_absent() {
        let filter = parse_scrape_jobs_filter(None).unwrap();
        assert!(filter.status.is_none());
        assert!(filter.priority.is_none());
    }

    #[test]
    fn mismatched_filter_kind_rejected() {
        let result = parse_scrape_jobs_filter(Some(StreamFilter::AuditLog(
            AuditLogFilter::default(),
        )));
        assert!(matches!(
            result,
            Err(StreamError {
                code: StreamErrorCode::InvalidFilter,
                ..
            })
        ));
    }

    #[test]
    fn audit_log_since_parsed() {
        let filter = parse_audit_log_filter(Some(StreamFilter::AuditLog(AuditLogFilter {
            since: Some("2025-08-01T00:00:00Z".into()),
            ..Default::default()
        })))
        .unwrap();
        assert!(filter.since_dt.is_some());
    }

    #[test]
    fn audit_log_bad_since_rejected() {
        let result = parse_audit_log_filter(Some(StreamFilter::AuditLog(AuditLogFilter {
            since: Some("yesterday".into()),
            ..Default::default()
        })));
        assert!(result.is_err());
    }

    #[test]
    fn stats_rejects_any_filter() {
        assert!(parse_scraper_stats_filter(None).is_ok());
        let result = parse_scraper_stats_filter(Some(StreamFilter::ScraperSubjects(
            ScraperSubjectsFilter::default(),
        )));
        assert!(result.is_err());
    }

    #[test]
    fn timeseries_validates_period_and_bucket() {
        let ok = parse_scraper_timeseries_filter(Some(StreamFilter::ScraperTimeseries(
            ScraperTimeseriesFilter {
                period: "6h".into(),
                bucket: Some("5m".into()),
            },
        )));
        assert!(ok.is_ok());

        let bad = parse_scraper_timeseries_filter(Some(StreamFilter::ScraperTimeseries(
            ScraperTimeseriesFilter {
                period: "2h".into(),
                bucket: None,
            },
        )));
        assert!(bad.is_err());
    }
}
