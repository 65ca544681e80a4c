//! Row types and enums shared across the store.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// The priority level of a scrape job. Postgres enum `scrape_priority`;
/// declaration order defines dispatch order (`priority DESC` pops Critical
/// first).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, TS,
)]
#[sqlx(type_name = "scrape_priority")]
#[ts(export)]
pub enum ScrapePriority {
    Low,
    Medium,
    High,
    Critical,
}

/// The type of target for a scrape job, determining how the payload is
/// interpreted. Postgres enum `target_type`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, TS,
)]
#[sqlx(type_name = "target_type")]
#[ts(export)]
pub enum TargetType {
    Subject,
    CourseRange,
    CrnList,
    SingleCrn,
}

/// Computed job state. Not stored; derived from the row's timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ScrapeJobStatus {
    Scheduled,
    Pending,
    Processing,
    Exhausted,
}

/// A queued scrape job row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScrapeJob {
    pub id: i32,
    pub target_type: TargetType,
    pub target_payload: Value,
    pub priority: ScrapePriority,
    pub queued_at: DateTime<Utc>,
    pub execute_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub exhausted_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
}

impl ScrapeJob {
    /// Derive the job's state: exhausted is terminal, a held lock means
    /// processing, a due `execute_at` means pending, otherwise scheduled.
    pub fn status(&self) -> ScrapeJobStatus {
        if self.exhausted_at.is_some() {
            ScrapeJobStatus::Exhausted
        } else if self.locked_at.is_some() {
            ScrapeJobStatus::Processing
        } else if self.execute_at <= Utc::now() {
            ScrapeJobStatus::Pending
        } else {
            ScrapeJobStatus::Scheduled
        }
    }
}

/// Effectiveness counters produced by one ingest pass, recorded in
/// `scrape_job_results`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct IngestReport {
    pub fetched: i32,
    pub changed: i32,
    pub unchanged: i32,
    pub audits: i32,
    pub metrics: i32,
}

/// A stored course section row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DbCourse {
    pub id: i32,
    pub crn: String,
    pub subject: String,
    pub course_number: String,
    pub title: String,
    pub term_code: String,
    pub sequence_number: Option<String>,
    pub campus: Option<String>,
    pub instructional_method: Option<String>,
    pub part_of_term: Option<String>,
    pub credit_hours: Option<i32>,
    pub credit_hour_low: Option<i32>,
    pub credit_hour_high: Option<i32>,
    pub enrollment: i32,
    pub max_enrollment: i32,
    pub wait_count: i32,
    pub wait_capacity: i32,
    pub cross_list: Option<String>,
    pub cross_list_capacity: Option<i32>,
    pub cross_list_count: Option<i32>,
    pub link_identifier: Option<String>,
    pub is_section_linked: bool,
    pub meeting_times: Value,
    pub attributes: Value,
    pub last_scraped_at: DateTime<Utc>,
}

/// Day of the week within a meeting pattern, ordered Monday..Sunday.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

/// Physical location of a meeting, absent for online sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DbLocation {
    pub building: Option<String>,
    pub description: Option<String>,
    pub room: Option<String>,
    pub campus: Option<String>,
}

/// One scheduled meeting block, as persisted in the `meeting_times` JSONB
/// column. Ordered within a course by start time, then day set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DbMeetingTime {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
    pub days: Vec<DayOfWeek>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<DbLocation>,
    pub meeting_type: String,
    pub schedule_type: String,
}

impl DbMeetingTime {
    /// Asynchronous meeting types carry no physical time slot.
    pub fn is_async(&self) -> bool {
        matches!(self.meeting_type.as_str(), "ID" | "OA")
    }
}

/// An audit log row joined with its course's identifying fields.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRow {
    pub id: i32,
    pub course_id: i32,
    pub timestamp: DateTime<Utc>,
    pub field_changed: String,
    pub old_value: String,
    pub new_value: String,
    pub subject: Option<String>,
    pub course_number: Option<String>,
    pub crn: Option<String>,
    pub title: Option<String>,
    pub term_code: Option<String>,
}

/// A single course metrics snapshot row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MetricRow {
    pub id: i32,
    pub course_id: i32,
    pub timestamp: DateTime<Utc>,
    pub enrollment: i32,
    pub wait_count: i32,
    pub seats_available: i32,
}

/// Per-(subject, term) aggregated stats from recent scrape results, consumed
/// by the adaptive scheduler.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubjectResultStats {
    pub subject: String,
    pub term: String,
    pub recent_runs: i64,
    pub avg_change_ratio: f64,
    pub consecutive_zero_changes: i64,
    pub consecutive_empty_fetches: i64,
    pub recent_failure_count: i64,
    pub recent_success_count: i64,
    pub last_completed: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(
        locked_at: Option<DateTime<Utc>>,
        exhausted_at: Option<DateTime<Utc>>,
        execute_at: DateTime<Utc>,
    ) -> ScrapeJob {
        ScrapeJob {
            id: 1,
            target_type: TargetType::Subject,
            target_payload: serde_json::json!({"subject": "CS", "term": "202610"}),
            priority: ScrapePriority::Medium,
            queued_at: Utc::now(),
            execute_at,
            locked_at,
            exhausted_at,
            retry_count: 0,
            max_retries: 5,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_pending_when_due() {
        let j = job(None, None, Utc::now() - Duration::seconds(1));
        assert_eq!(j.status(), ScrapeJobStatus::Pending);
    }

    #[test]
    fn status_scheduled_when_future() {
        let j = job(None, None, Utc::now() + Duration::hours(1));
        assert_eq!(j.status(), ScrapeJobStatus::Scheduled);
    }

    #[test]
    fn status_processing_when_locked() {
        let j = job(Some(Utc::now()), None, Utc::now() - Duration::seconds(1));
        assert_eq!(j.status(), ScrapeJobStatus::Processing);
    }

    #[test]
    fn status_exhausted_is_terminal() {
        // Exhausted wins even over a (stale) lock.
        let j = job(Some(Utc::now()), Some(Utc::now()), Utc::now());
        assert_eq!(j.status(), ScrapeJobStatus::Exhausted);
    }

    #[test]
    fn meeting_time_async_types() {
        let mut mt = DbMeetingTime {
            start_date: NaiveDate::from_ymd_opt(2025, 8, 18).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 12, 10).unwrap(),
            begin_time: None,
            end_time: None,
            days: vec![],
            location: None,
            meeting_type: "OA".to_owned(),
            schedule_type: "AFF".to_owned(),
        };
        assert!(mt.is_async());
        mt.meeting_type = "ID".to_owned();
        assert!(mt.is_async());
        mt.meeting_type = "FF".to_owned();
        assert!(!mt.is_async());
    }
}
