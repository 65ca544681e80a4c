//! Query functions for the course audit log.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::models::AuditRow;
use crate::error::Result;
use crate::events::AuditLogEntry;

const AUDIT_SELECT: &str = "SELECT a.id, a.course_id, a.timestamp, a.field_changed, a.old_value, a.new_value, \
            c.subject, c.course_number, c.crn, c.title, c.term_code \
     FROM course_audits a \
     LEFT JOIN courses c ON c.id = a.course_id";

/// Fetch the most recent audit log entries, newest first.
pub async fn list_recent(pool: &PgPool, limit: i32) -> Result<Vec<AuditRow>> {
    let rows = sqlx::query_as::<_, AuditRow>(&format!(
        "{AUDIT_SELECT} ORDER BY a.timestamp DESC LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch audit log entries with optional filters applied in SQL.
///
/// Every filter parameter is nullable; passing `None` disables that filter.
pub async fn list_filtered(
    pool: &PgPool,
    course_id: Option<i32>,
    since: Option<DateTime<Utc>>,
    field_changed: Option<&[String]>,
    limit: i32,
) -> Result<Vec<AuditRow>> {
    let rows: Vec<AuditRow> = sqlx::query_as(&format!(
        "{AUDIT_SELECT} \
         WHERE ($1::int4 IS NULL OR a.course_id = $1) \
           AND ($2::timestamptz IS NULL OR a.timestamp > $2) \
           AND ($3::text[] IS NULL OR a.field_changed = ANY($3)) \
         ORDER BY a.timestamp DESC LIMIT $4"
    ))
    .bind(course_id)
    .bind(since)
    .bind(field_changed)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

impl From<AuditRow> for AuditLogEntry {
    fn from(row: AuditRow) -> Self {
        AuditLogEntry {
            id: row.id,
            course_id: row.course_id,
            timestamp: row.timestamp.to_rfc3339(),
            field_changed: row.field_changed,
            old_value: row.old_value,
            new_value: row.new_value,
            subject: row.subject,
            course_number: row.course_number,
            crn: row.crn,
            course_title: row.title,
            term_code: row.term_code,
        }
    }
}
