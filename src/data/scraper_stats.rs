//! Aggregate computations over scrape results, backing the stats, timeseries
//! and per-subject summary streams (and the matching read-API contracts).

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use ts_rs::TS;

use crate::error::Result;

/// Validate a stats period, returning its SQL interval string.
pub fn validate_period(period: &str) -> Option<&'static str> {
    match period {
        "1h" => Some("1 hour"),
        "6h" => Some("6 hours"),
        "24h" => Some("24 hours"),
        "7d" => Some("7 days"),
        "30d" => Some("30 days"),
        _ => None,
    }
}

/// Validate a timeseries bucket width, returning its SQL interval string.
pub fn validate_bucket(bucket: &str) -> Option<&'static str> {
    match bucket {
        "1m" => Some("1 minute"),
        "5m" => Some("5 minutes"),
        "15m" => Some("15 minutes"),
        "1h" => Some("1 hour"),
        "6h" => Some("6 hours"),
        _ => None,
    }
}

/// The bucket width used when a subscription doesn't pick one.
pub fn default_bucket_for_period(period: &str) -> &'static str {
    match period {
        "1h" => "1m",
        "6h" => "5m",
        "24h" => "15m",
        "7d" => "1h",
        "30d" => "6h",
        _ => "15m",
    }
}

/// Aggregate scraper counters over a period.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ScraperStats {
    pub period: String,
    pub total_scrapes: i64,
    pub successful_scrapes: i64,
    pub failed_scrapes: i64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub total_courses_changed: i64,
    pub total_courses_fetched: i64,
    pub total_audits_generated: i64,
    pub pending_jobs: i64,
    pub locked_jobs: i64,
    pub exhausted_jobs: i64,
}

/// Compute aggregate stats over the given period.
pub async fn compute_stats(pool: &PgPool, period: &str) -> Result<ScraperStats> {
    let interval = validate_period(period)
        .ok_or_else(|| anyhow::anyhow!("invalid period {period:?}"))?;

    let row = sqlx::query(
        "SELECT \
            COUNT(*) AS total_scrapes, \
            COUNT(*) FILTER (WHERE success) AS successful_scrapes, \
            COUNT(*) FILTER (WHERE NOT success) AS failed_scrapes, \
            COALESCE(AVG(duration_ms) FILTER (WHERE success), 0)::FLOAT8 AS avg_duration_ms, \
            COALESCE(SUM(courses_changed) FILTER (WHERE success), 0)::BIGINT AS total_courses_changed, \
            COALESCE(SUM(courses_fetched) FILTER (WHERE success), 0)::BIGINT AS total_courses_fetched, \
            COALESCE(SUM(audits_generated) FILTER (WHERE success), 0)::BIGINT AS total_audits_generated \
         FROM scrape_job_results \
         WHERE completed_at > NOW() - $1::interval",
    )
    .bind(interval)
    .fetch_one(pool)
    .await?;

    let queue_row = sqlx::query(
        "SELECT \
            COUNT(*) FILTER (WHERE locked_at IS NULL AND exhausted_at IS NULL) AS pending_jobs, \
            COUNT(*) FILTER (WHERE locked_at IS NOT NULL AND exhausted_at IS NULL) AS locked_jobs, \
            COUNT(*) FILTER (WHERE exhausted_at IS NOT NULL) AS exhausted_jobs \
         FROM scrape_jobs",
    )
    .fetch_one(pool)
    .await?;

    let total_scrapes: i64 = row.get("total_scrapes");
    let successful_scrapes: i64 = row.get("successful_scrapes");

    Ok(ScraperStats {
        period: period.to_owned(),
        total_scrapes,
        successful_scrapes,
        failed_scrapes: row.get("failed_scrapes"),
        success_rate: if total_scrapes > 0 {
            successful_scrapes as f64 / total_scrapes as f64
        } else {
            0.0
        },
        avg_duration_ms: row.get("avg_duration_ms"),
        total_courses_changed: row.get("total_courses_changed"),
        total_courses_fetched: row.get("total_courses_fetched"),
        total_audits_generated: row.get("total_audits_generated"),
        pending_jobs: queue_row.get("pending_jobs"),
        locked_jobs: queue_row.get("locked_jobs"),
        exhausted_jobs: queue_row.get("exhausted_jobs"),
    })
}

/// One bucket of scrape-result counters.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TimeseriesPoint {
    #[ts(type = "string")]
    pub timestamp: DateTime<Utc>,
    pub scrape_count: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub courses_changed: i64,
    pub avg_duration_ms: f64,
}

/// Compute the scrape-result timeseries for a period at a bucket width.
pub async fn compute_timeseries(
    pool: &PgPool,
    period: &str,
    bucket: &str,
) -> Result<Vec<TimeseriesPoint>> {
    let period_interval = validate_period(period)
        .ok_or_else(|| anyhow::anyhow!("invalid period {period:?}"))?;
    let bucket_interval = validate_bucket(bucket)
        .ok_or_else(|| anyhow::anyhow!("invalid bucket {bucket:?}"))?;

    let rows = sqlx::query(
        "SELECT \
            date_bin($1::interval, completed_at, '2020-01-01'::timestamptz) AS bucket_start, \
            COUNT(*)::BIGINT AS scrape_count, \
            COUNT(*) FILTER (WHERE success)::BIGINT AS success_count, \
            COUNT(*) FILTER (WHERE NOT success)::BIGINT AS error_count, \
            COALESCE(SUM(courses_changed) FILTER (WHERE success), 0)::BIGINT AS courses_changed, \
            COALESCE(AVG(duration_ms) FILTER (WHERE success), 0)::FLOAT8 AS avg_duration_ms \
         FROM scrape_job_results \
         WHERE completed_at > NOW() - $2::interval \
         GROUP BY bucket_start \
         ORDER BY bucket_start",
    )
    .bind(bucket_interval)
    .bind(period_interval)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| TimeseriesPoint {
            timestamp: row.get("bucket_start"),
            scrape_count: row.get("scrape_count"),
            success_count: row.get("success_count"),
            error_count: row.get("error_count"),
            courses_changed: row.get("courses_changed"),
            avg_duration_ms: row.get("avg_duration_ms"),
        })
        .collect())
}

/// Per-subject scrape summary within a term.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SubjectSummary {
    pub subject: String,
    pub term: String,
    pub course_count: i64,
    #[ts(type = "string | null")]
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub recent_scrapes: i64,
    pub recent_failures: i64,
    pub recent_courses_changed: i64,
}

/// Compute the per-subject summaries across all stored terms.
pub async fn compute_subjects(pool: &PgPool) -> Result<Vec<SubjectSummary>> {
    let rows = sqlx::query(
        r#"
        WITH results AS (
            SELECT payload->>'subject' AS subject,
                   COALESCE(payload->>'term', '') AS term,
                   COUNT(*)::BIGINT AS recent_scrapes,
                   COUNT(*) FILTER (WHERE NOT success)::BIGINT AS recent_failures,
                   COALESCE(SUM(courses_changed) FILTER (WHERE success), 0)::BIGINT AS recent_courses_changed,
                   MAX(completed_at) AS last_scraped_at
            FROM scrape_job_results
            WHERE target_type = 'Subject' AND completed_at > NOW() - INTERVAL '24 hours'
            GROUP BY 1, 2
        ),
        counts AS (
            SELECT subject, term_code AS term, COUNT(*)::BIGINT AS course_count
            FROM courses
            GROUP BY 1, 2
        )
        SELECT COALESCE(c.subject, r.subject) AS subject,
               COALESCE(c.term, r.term) AS term,
               COALESCE(c.course_count, 0) AS course_count,
               r.last_scraped_at,
               COALESCE(r.recent_scrapes, 0) AS recent_scrapes,
               COALESCE(r.recent_failures, 0) AS recent_failures,
               COALESCE(r.recent_courses_changed, 0) AS recent_courses_changed
        FROM counts c
        FULL OUTER JOIN results r ON r.subject = c.subject AND r.term = c.term
        ORDER BY 1, 2
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| SubjectSummary {
            subject: row.get("subject"),
            term: row.get("term"),
            course_count: row.get("course_count"),
            last_scraped_at: row.get("last_scraped_at"),
            recent_scrapes: row.get("recent_scrapes"),
            recent_failures: row.get("recent_failures"),
            recent_courses_changed: row.get("recent_courses_changed"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_periods() {
        for period in ["1h", "6h", "24h", "7d", "30d"] {
            assert!(validate_period(period).is_some());
        }
        assert!(validate_period("2h").is_none());
        assert!(validate_period("").is_none());
    }

    #[test]
    fn valid_buckets() {
        for bucket in ["1m", "5m", "15m", "1h", "6h"] {
            assert!(validate_bucket(bucket).is_some());
        }
        assert!(validate_bucket("30s").is_none());
    }

    #[test]
    fn default_buckets_are_valid() {
        for period in ["1h", "6h", "24h", "7d", "30d"] {
            assert!(validate_bucket(default_bucket_for_period(period)).is_some());
        }
    }
}
