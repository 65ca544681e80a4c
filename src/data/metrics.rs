//! Query functions for course enrollment metrics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use ts_rs::TS;

use crate::data::models::MetricRow;
use crate::error::Result;

const METRIC_SELECT: &str =
    "SELECT id, course_id, timestamp, enrollment, wait_count, seats_available \
     FROM course_metrics";

/// Fetch metrics for a specific course since a given timestamp.
pub async fn list_for_course(
    pool: &PgPool,
    course_id: i32,
    since: DateTime<Utc>,
    limit: i32,
) -> Result<Vec<MetricRow>> {
    let rows = sqlx::query_as::<_, MetricRow>(&format!(
        "{METRIC_SELECT} WHERE course_id = $1 AND timestamp >= $2 ORDER BY timestamp DESC LIMIT $3"
    ))
    .bind(course_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// One 15-minute bucket of per-subject enrollment totals.
#[derive(sqlx::FromRow, Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct EnrollmentBucket {
    #[ts(type = "string")]
    pub bucket_start: DateTime<Utc>,
    pub subject: String,
    pub enrollment: i64,
    pub wait_count: i64,
    pub seats_available: i64,
}

/// Aggregate enrollment metrics into 15-minute buckets joined to subject.
///
/// Within each bucket the latest sample per course wins; totals are then
/// summed per subject.
pub async fn enrollment_timeline(
    pool: &PgPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<EnrollmentBucket>> {
    let rows = sqlx::query_as::<_, EnrollmentBucket>(
        r#"
        WITH bucketed AS (
            SELECT date_bin('15 minutes', m.timestamp, '2020-01-01'::timestamptz) AS bucket_start,
                   m.course_id,
                   c.subject,
                   m.enrollment,
                   m.wait_count,
                   m.seats_available,
                   ROW_NUMBER() OVER (
                       PARTITION BY date_bin('15 minutes', m.timestamp, '2020-01-01'::timestamptz),
                                    m.course_id
                       ORDER BY m.timestamp DESC
                   ) AS rn
            FROM course_metrics m
            JOIN courses c ON c.id = m.course_id
            WHERE m.timestamp >= $1 AND m.timestamp < $2
        )
        SELECT bucket_start,
               subject,
               SUM(enrollment)::BIGINT AS enrollment,
               SUM(wait_count)::BIGINT AS wait_count,
               SUM(seats_available)::BIGINT AS seats_available
        FROM bucketed
        WHERE rn = 1
        GROUP BY bucket_start, subject
        ORDER BY bucket_start, subject
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
