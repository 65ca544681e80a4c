//! Audit log stream: snapshot building and delta filtering.

use sqlx::PgPool;

use crate::data::audit;
use crate::events::AuditLogEntry;
use crate::stream::filters::AuditLogFilter;

const DEFAULT_AUDIT_LIMIT: i32 = 200;
const MAX_AUDIT_LIMIT: i32 = 500;

/// Load the most recent audit entries matching the filter.
pub async fn build_snapshot(
    db_pool: &PgPool,
    filter: &AuditLogFilter,
) -> crate::error::Result<Vec<AuditLogEntry>> {
    let limit = filter
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);

    let rows = audit::list_filtered(
        db_pool,
        filter.course_id,
        filter.since_dt,
        filter.field_changed.as_deref(),
        limit,
    )
    .await?;

    Ok(rows.into_iter().map(AuditLogEntry::from).collect())
}

/// Apply the filter to a batch of freshly generated entries.
pub fn filter_entries(filter: &AuditLogFilter, entries: &[AuditLogEntry]) -> Vec<AuditLogEntry> {
    entries
        .iter()
        .filter(|entry| entry_matches(filter, entry))
        .cloned()
        .collect()
}

/// Whether one entry matches the filter.
pub fn entry_matches(filter: &AuditLogFilter, entry: &AuditLogEntry) -> bool {
    if let Some(course_id) = filter.course_id
        && entry.course_id != course_id
    {
        return false;
    }

    if let Some(ref since) = filter.since_dt
        && let Ok(timestamp) = chrono::DateTime::parse_from_rfc3339(&entry.timestamp)
        && timestamp.with_timezone(&chrono::Utc) <= *since
    {
        return false;
    }

    if let Some(ref fields) = filter.field_changed
        && !fields.is_empty()
        && !fields.iter().any(|f| f == &entry.field_changed)
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(course_id: i32, field: &str) -> AuditLogEntry {
        AuditLogEntry {
            id: 1,
            course_id,
            timestamp: Utc::now().to_rfc3339(),
            field_changed: field.to_owned(),
            old_value: "20".to_owned(),
            new_value: "21".to_owned(),
            subject: Some("CS".to_owned()),
            course_number: Some("1083".to_owned()),
            crn: Some("12345".to_owned()),
            course_title: Some("Intro".to_owned()),
            term_code: Some("202610".to_owned()),
        }
    }

    #[test]
    fn empty_filter_matches() {
        assert!(entry_matches(
            &AuditLogFilter::default(),
            &entry(7, "enrollment")
        ));
    }

    #[test]
    fn course_id_filter() {
        let filter = AuditLogFilter {
            course_id: Some(7),
            ..Default::default()
        };
        assert!(entry_matches(&filter, &entry(7, "enrollment")));
        assert!(!entry_matches(&filter, &entry(8, "enrollment")));
    }

    #[test]
    fn field_filter() {
        let filter = AuditLogFilter {
            field_changed: Some(vec!["wait_count".to_owned()]),
            ..Default::default()
        };
        assert!(!entry_matches(&filter, &entry(7, "enrollment")));
        assert!(entry_matches(&filter, &entry(7, "wait_count")));
    }

    #[test]
    fn since_filter_excludes_older() {
        let filter = AuditLogFilter {
            since_dt: Some(Utc::now() + chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(!entry_matches(&filter, &entry(7, "enrollment")));
    }
}
