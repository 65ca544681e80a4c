//! Diff-and-ingest pipeline: merge fetched course observations into the store.
//!
//! For every observed section the stored row is loaded under a row lock and
//! compared field by field. Scalar changes append audit rows, counter changes
//! append exactly one metric sample, and instructor set changes append
//! add/remove audit entries. Audit and metric rows for one course commit in
//! the same transaction as the course update, so readers observe them
//! together. Re-running ingest on identical observations writes nothing.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use tracing::{debug, trace};

use crate::banner::models::{Course, MeetingDays, MeetingTimeResponse};
use crate::banner::models::meetings::{parse_hhmm, DateRange};
use crate::data::context::DbContext;
use crate::data::models::{DayOfWeek, DbCourse, DbLocation, DbMeetingTime, IngestReport};
use crate::error::Result;
use crate::events::{AuditLogEntry, AuditLogEvent, DomainEvent};

/// Course ingest operations.
pub struct CourseOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> CourseOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Merge a batch of observed courses into the store.
    ///
    /// Returns the effectiveness counters for the batch and publishes one
    /// audit-log event covering every generated audit row.
    pub async fn ingest(
        &self,
        observed: &[Course],
        fetched_at: DateTime<Utc>,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut audit_entries: Vec<AuditLogEntry> = Vec::new();

        for course in observed {
            report.fetched += 1;

            if !course.has_scheduled_meetings() {
                trace!(
                    crn = %course.course_reference_number,
                    term = %course.term,
                    "section has no scheduled meetings"
                );
            }

            let mut tx = self.ctx.pool().begin().await?;
            let outcome = ingest_one(&mut tx, course, fetched_at).await?;
            tx.commit().await?;

            report.audits += outcome.audits.len() as i32;
            report.metrics += outcome.metrics_written;
            if outcome.audits.is_empty() && outcome.metrics_written == 0 {
                report.unchanged += 1;
            } else {
                report.changed += 1;
            }
            audit_entries.extend(outcome.audits);
        }

        if !audit_entries.is_empty() {
            debug!(count = audit_entries.len(), "publishing audit entries");
            self.ctx
                .events()
                .publish(DomainEvent::AuditLog(AuditLogEvent {
                    entries: audit_entries,
                }));
        }

        Ok(report)
    }
}

struct CourseOutcome {
    audits: Vec<AuditLogEntry>,
    metrics_written: i32,
}

/// Ingest a single observed course inside one transaction.
async fn ingest_one(
    tx: &mut Transaction<'_, Postgres>,
    course: &Course,
    fetched_at: DateTime<Utc>,
) -> Result<CourseOutcome> {
    let meeting_times = serde_json::to_value(to_db_meeting_times(&course.meetings_faculty))?;
    let attributes = serde_json::to_value(to_attribute_codes(course))?;
    let campus = extract_campus_code(course);

    let stored = sqlx::query_as::<_, DbCourse>(
        "SELECT id, crn, subject, course_number, title, term_code, sequence_number, \
                campus, instructional_method, part_of_term, credit_hours, credit_hour_low, \
                credit_hour_high, enrollment, max_enrollment, wait_count, wait_capacity, \
                cross_list, cross_list_capacity, cross_list_count, link_identifier, \
                is_section_linked, meeting_times, attributes, last_scraped_at \
         FROM courses WHERE crn = $1 AND term_code = $2 FOR UPDATE",
    )
    .bind(&course.course_reference_number)
    .bind(&course.term)
    .fetch_optional(&mut **tx)
    .await?;

    match stored {
        None => {
            let course_id = insert_course(tx, course, &meeting_times, &attributes, campus.as_deref(), fetched_at).await?;
            let metrics_written =
                write_metric_if_changed(tx, course_id, course, fetched_at).await?;
            sync_instructors(tx, course_id, course).await?;

            Ok(CourseOutcome {
                audits: Vec::new(),
                metrics_written,
            })
        }
        Some(stored) => {
            let changes = diff_scalars(&stored, course, campus.as_deref(), &meeting_times, &attributes);
            let instructor_changes = diff_instructors(tx, stored.id, course).await?;

            let mut audits = Vec::with_capacity(changes.len() + instructor_changes.len());
            for (field, old_value, new_value) in
                changes.iter().chain(instructor_changes.iter())
            {
                let entry = insert_audit(
                    tx,
                    &stored,
                    fetched_at,
                    field,
                    old_value,
                    new_value,
                )
                .await?;
                audits.push(entry);
            }

            let metrics_written =
                write_metric_if_changed(tx, stored.id, course, fetched_at).await?;

            update_course(tx, stored.id, course, &meeting_times, &attributes, campus.as_deref(), fetched_at)
                .await?;
            sync_instructors(tx, stored.id, course).await?;

            Ok(CourseOutcome {
                audits,
                metrics_written,
            })
        }
    }
}

/// Append one metric sample when any of the three counters moved since the
/// last sample. A duplicate instant (two workers observing the same second)
/// hits the unique index and is swallowed.
async fn write_metric_if_changed(
    tx: &mut Transaction<'_, Postgres>,
    course_id: i32,
    course: &Course,
    fetched_at: DateTime<Utc>,
) -> Result<i32> {
    let last: Option<(i32, i32, i32)> = sqlx::query_as(
        "SELECT enrollment, wait_count, seats_available FROM course_metrics \
         WHERE course_id = $1 ORDER BY timestamp DESC LIMIT 1",
    )
    .bind(course_id)
    .fetch_optional(&mut **tx)
    .await?;

    let current = (course.enrollment, course.wait_count, course.seats_available);
    if last == Some(current) {
        return Ok(0);
    }

    let result = sqlx::query(
        "INSERT INTO course_metrics (course_id, timestamp, enrollment, wait_count, seats_available) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (course_id, timestamp) DO NOTHING",
    )
    .bind(course_id)
    .bind(fetched_at)
    .bind(course.enrollment)
    .bind(course.wait_count)
    .bind(course.seats_available)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() as i32)
}

async fn insert_audit(
    tx: &mut Transaction<'_, Postgres>,
    stored: &DbCourse,
    fetched_at: DateTime<Utc>,
    field: &str,
    old_value: &str,
    new_value: &str,
) -> Result<AuditLogEntry> {
    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO course_audits (course_id, timestamp, field_changed, old_value, new_value) \
         VALUES ($1, $2, $3, $4, $5) RETURNING id",
    )
    .bind(stored.id)
    .bind(fetched_at)
    .bind(field)
    .bind(old_value)
    .bind(new_value)
    .fetch_one(&mut **tx)
    .await?;

    Ok(AuditLogEntry {
        id,
        course_id: stored.id,
        timestamp: fetched_at.to_rfc3339(),
        field_changed: field.to_owned(),
        old_value: old_value.to_owned(),
        new_value: new_value.to_owned(),
        subject: Some(stored.subject.clone()),
        course_number: Some(stored.course_number.clone()),
        crn: Some(stored.crn.clone()),
        course_title: Some(stored.title.clone()),
        term_code: Some(stored.term_code.clone()),
    })
}

type FieldChange = (&'static str, String, String);

/// Compare every stored scalar (and the JSONB collections) against the
/// observation, producing one `(field, old, new)` tuple per difference.
fn diff_scalars(
    stored: &DbCourse,
    course: &Course,
    campus: Option<&str>,
    meeting_times: &serde_json::Value,
    attributes: &serde_json::Value,
) -> Vec<FieldChange> {
    let mut changes: Vec<FieldChange> = Vec::new();

    fn push<T: PartialEq + std::fmt::Display>(
        changes: &mut Vec<FieldChange>,
        field: &'static str,
        old: &T,
        new: &T,
    ) {
        if old != new {
            changes.push((field, old.to_string(), new.to_string()));
        }
    }

    fn opt_string(value: Option<&str>) -> String {
        value.unwrap_or_default().to_owned()
    }

    fn push_opt(
        changes: &mut Vec<FieldChange>,
        field: &'static str,
        old: Option<&str>,
        new: Option<&str>,
    ) {
        if old != new {
            changes.push((field, opt_string(old), opt_string(new)));
        }
    }

    fn push_opt_i32(
        changes: &mut Vec<FieldChange>,
        field: &'static str,
        old: Option<i32>,
        new: Option<i32>,
    ) {
        if old != new {
            changes.push((
                field,
                old.map(|v| v.to_string()).unwrap_or_default(),
                new.map(|v| v.to_string()).unwrap_or_default(),
            ));
        }
    }

    push(&mut changes, "subject", &stored.subject, &course.subject);
    push(
        &mut changes,
        "course_number",
        &stored.course_number,
        &course.course_number,
    );
    push(&mut changes, "title", &stored.title, &course.course_title);
    push_opt(
        &mut changes,
        "sequence_number",
        stored.sequence_number.as_deref(),
        Some(course.sequence_number.as_str()),
    );
    push_opt(&mut changes, "campus", stored.campus.as_deref(), campus);
    push_opt(
        &mut changes,
        "instructional_method",
        stored.instructional_method.as_deref(),
        Some(course.instructional_method.as_str()),
    );
    push_opt(
        &mut changes,
        "part_of_term",
        stored.part_of_term.as_deref(),
        Some(course.part_of_term.as_str()),
    );
    push_opt_i32(
        &mut changes,
        "credit_hours",
        stored.credit_hours,
        course.credit_hours,
    );
    push_opt_i32(
        &mut changes,
        "credit_hour_low",
        stored.credit_hour_low,
        course.credit_hour_low,
    );
    push_opt_i32(
        &mut changes,
        "credit_hour_high",
        stored.credit_hour_high,
        course.credit_hour_high,
    );
    push(
        &mut changes,
        "enrollment",
        &stored.enrollment,
        &course.enrollment,
    );
    push(
        &mut changes,
        "max_enrollment",
        &stored.max_enrollment,
        &course.maximum_enrollment,
    );
    push(
        &mut changes,
        "wait_count",
        &stored.wait_count,
        &course.wait_count,
    );
    push(
        &mut changes,
        "wait_capacity",
        &stored.wait_capacity,
        &course.wait_capacity,
    );
    push_opt(
        &mut changes,
        "cross_list",
        stored.cross_list.as_deref(),
        course.cross_list.as_deref(),
    );
    push_opt_i32(
        &mut changes,
        "cross_list_capacity",
        stored.cross_list_capacity,
        course.cross_list_capacity,
    );
    push_opt_i32(
        &mut changes,
        "cross_list_count",
        stored.cross_list_count,
        course.cross_list_count,
    );
    push_opt(
        &mut changes,
        "link_identifier",
        stored.link_identifier.as_deref(),
        course.link_identifier.as_deref(),
    );
    push(
        &mut changes,
        "is_section_linked",
        &stored.is_section_linked,
        &course.is_section_linked,
    );

    if &stored.meeting_times != meeting_times {
        changes.push((
            "meeting_times",
            stored.meeting_times.to_string(),
            meeting_times.to_string(),
        ));
    }
    if &stored.attributes != attributes {
        changes.push((
            "attributes",
            stored.attributes.to_string(),
            attributes.to_string(),
        ));
    }

    changes
}

/// Diff the stored instructor associations against the observation.
///
/// Additions and removals become audit entries with stable ordering by
/// `(banner_id, is_primary desc)`.
async fn diff_instructors(
    tx: &mut Transaction<'_, Postgres>,
    course_id: i32,
    course: &Course,
) -> Result<Vec<FieldChange>> {
    let stored: Vec<(String, bool)> = sqlx::query_as(
        "SELECT banner_id, is_primary FROM course_instructors WHERE course_id = $1",
    )
    .bind(course_id)
    .fetch_all(&mut **tx)
    .await?;

    let stored_ids: HashSet<&str> = stored.iter().map(|(id, _)| id.as_str()).collect();
    let observed_ids: HashSet<&str> = course
        .faculty
        .iter()
        .map(|f| f.banner_id.as_str())
        .collect();

    // BTreeMap keyed by (banner_id, !is_primary) gives the stable
    // (banner_id, is_primary desc) ordering.
    let mut added: BTreeMap<(String, bool), ()> = BTreeMap::new();
    for faculty in &course.faculty {
        if !stored_ids.contains(faculty.banner_id.as_str()) {
            added.insert((faculty.banner_id.clone(), !faculty.primary_indicator), ());
        }
    }
    let mut removed: BTreeMap<(String, bool), ()> = BTreeMap::new();
    for (banner_id, is_primary) in &stored {
        if !observed_ids.contains(banner_id.as_str()) {
            removed.insert((banner_id.clone(), !*is_primary), ());
        }
    }

    let mut changes = Vec::with_capacity(added.len() + removed.len());
    for (banner_id, _) in added.keys() {
        changes.push(("instructor_added", String::new(), banner_id.clone()));
    }
    for (banner_id, _) in removed.keys() {
        changes.push(("instructor_removed", banner_id.clone(), String::new()));
    }

    Ok(changes)
}

/// Upsert instructor rows (keyed by lower-cased email) and rewrite the
/// course's junction rows. Faculty without an email address cannot be keyed
/// and are skipped.
async fn sync_instructors(
    tx: &mut Transaction<'_, Postgres>,
    course_id: i32,
    course: &Course,
) -> Result<()> {
    sqlx::query("DELETE FROM course_instructors WHERE course_id = $1")
        .bind(course_id)
        .execute(&mut **tx)
        .await?;

    for faculty in &course.faculty {
        let Some(email) = faculty.email_address.as_deref() else {
            continue;
        };
        let email = email.to_lowercase();

        let (instructor_id,): (i32,) = sqlx::query_as(
            "INSERT INTO instructors (email, display_name) VALUES ($1, $2) \
             ON CONFLICT (email) DO UPDATE SET display_name = EXCLUDED.display_name \
             RETURNING id",
        )
        .bind(&email)
        .bind(&faculty.display_name)
        .fetch_one(&mut **tx)
        .await?;

        sqlx::query(
            "INSERT INTO course_instructors (course_id, instructor_id, banner_id, is_primary) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (course_id, instructor_id) DO UPDATE \
                SET banner_id = EXCLUDED.banner_id, is_primary = EXCLUDED.is_primary",
        )
        .bind(course_id)
        .bind(instructor_id)
        .bind(&faculty.banner_id)
        .bind(faculty.primary_indicator)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

async fn insert_course(
    tx: &mut Transaction<'_, Postgres>,
    course: &Course,
    meeting_times: &serde_json::Value,
    attributes: &serde_json::Value,
    campus: Option<&str>,
    fetched_at: DateTime<Utc>,
) -> Result<i32> {
    let (id,): (i32,) = sqlx::query_as(
        r#"
        INSERT INTO courses (
            crn, subject, course_number, title, term_code,
            sequence_number, campus, instructional_method, part_of_term,
            credit_hours, credit_hour_low, credit_hour_high,
            enrollment, max_enrollment, wait_count, wait_capacity,
            cross_list, cross_list_capacity, cross_list_count,
            link_identifier, is_section_linked,
            meeting_times, attributes, last_scraped_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
            $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24
        )
        RETURNING id
        "#,
    )
    .bind(&course.course_reference_number)
    .bind(&course.subject)
    .bind(&course.course_number)
    .bind(&course.course_title)
    .bind(&course.term)
    .bind(&course.sequence_number)
    .bind(campus)
    .bind(&course.instructional_method)
    .bind(&course.part_of_term)
    .bind(course.credit_hours)
    .bind(course.credit_hour_low)
    .bind(course.credit_hour_high)
    .bind(course.enrollment)
    .bind(course.maximum_enrollment)
    .bind(course.wait_count)
    .bind(course.wait_capacity)
    .bind(course.cross_list.as_deref())
    .bind(course.cross_list_capacity)
    .bind(course.cross_list_count)
    .bind(course.link_identifier.as_deref())
    .bind(course.is_section_linked)
    .bind(meeting_times)
    .bind(attributes)
    .bind(fetched_at)
    .fetch_one(&mut **tx)
    .await?;

    Ok(id)
}

async fn update_course(
    tx: &mut Transaction<'_, Postgres>,
    course_id: i32,
    course: &Course,
    meeting_times: &serde_json::Value,
    attributes: &serde_json::Value,
    campus: Option<&str>,
    fetched_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE courses SET
            subject = $2, course_number = $3, title = $4,
            sequence_number = $5, campus = $6, instructional_method = $7,
            part_of_term = $8, credit_hours = $9, credit_hour_low = $10,
            credit_hour_high = $11, enrollment = $12, max_enrollment = $13,
            wait_count = $14, wait_capacity = $15, cross_list = $16,
            cross_list_capacity = $17, cross_list_count = $18,
            link_identifier = $19, is_section_linked = $20,
            meeting_times = $21, attributes = $22, last_scraped_at = $23
        WHERE id = $1
        "#,
    )
    .bind(course_id)
    .bind(&course.subject)
    .bind(&course.course_number)
    .bind(&course.course_title)
    .bind(&course.sequence_number)
    .bind(campus)
    .bind(&course.instructional_method)
    .bind(&course.part_of_term)
    .bind(course.credit_hours)
    .bind(course.credit_hour_low)
    .bind(course.credit_hour_high)
    .bind(course.enrollment)
    .bind(course.maximum_enrollment)
    .bind(course.wait_count)
    .bind(course.wait_capacity)
    .bind(course.cross_list.as_deref())
    .bind(course.cross_list_capacity)
    .bind(course.cross_list_count)
    .bind(course.link_identifier.as_deref())
    .bind(course.is_section_linked)
    .bind(meeting_times)
    .bind(attributes)
    .bind(fetched_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Convert the raw meeting times into the canonical JSONB shape, ordered by
/// start time then day set so equality is stable across scrapes.
pub fn to_db_meeting_times(meetings: &[MeetingTimeResponse]) -> Vec<DbMeetingTime> {
    let mut out: Vec<DbMeetingTime> = meetings
        .iter()
        .filter_map(|response| {
            let mt = &response.meeting_time;
            let dates = DateRange::from_mm_dd_yyyy(&mt.start_date, &mt.end_date)?;

            let location = match (&mt.building, &mt.room) {
                (None, None) => None,
                _ => Some(DbLocation {
                    building: mt.building.clone(),
                    description: mt.building_description.clone(),
                    room: mt.room.clone(),
                    campus: mt.campus.clone(),
                }),
            };

            Some(DbMeetingTime {
                start_date: dates.start,
                end_date: dates.end,
                begin_time: mt.begin_time.as_deref().and_then(parse_hhmm),
                end_time: mt.end_time.as_deref().and_then(parse_hhmm),
                days: to_day_list(MeetingDays::from_meeting_time(mt)),
                location,
                meeting_type: mt.meeting_type.clone(),
                schedule_type: mt.meeting_schedule_type.clone(),
            })
        })
        .collect();

    out.sort_by(|a, b| {
        a.begin_time
            .cmp(&b.begin_time)
            .then_with(|| a.days.cmp(&b.days))
            .then_with(|| a.start_date.cmp(&b.start_date))
    });
    out
}

fn to_day_list(days: MeetingDays) -> Vec<DayOfWeek> {
    const ORDER: [(MeetingDays, DayOfWeek); 7] = [
        (MeetingDays::Monday, DayOfWeek::Monday),
        (MeetingDays::Tuesday, DayOfWeek::Tuesday),
        (MeetingDays::Wednesday, DayOfWeek::Wednesday),
        (MeetingDays::Thursday, DayOfWeek::Thursday),
        (MeetingDays::Friday, DayOfWeek::Friday),
        (MeetingDays::Saturday, DayOfWeek::Saturday),
        (MeetingDays::Sunday, DayOfWeek::Sunday),
    ];
    ORDER
        .into_iter()
        .filter_map(|(flag, day)| days.contains(flag).then_some(day))
        .collect()
}

/// Section attribute codes, sorted for stable comparison.
fn to_attribute_codes(course: &Course) -> Vec<String> {
    let mut codes: Vec<String> = course
        .section_attributes
        .iter()
        .map(|a| a.code.clone())
        .collect();
    codes.sort();
    codes.dedup();
    codes
}

/// Banner doesn't put the campus code on the course row; take it from the
/// first meeting time.
fn extract_campus_code(course: &Course) -> Option<String> {
    course
        .meetings_faculty
        .first()
        .and_then(|mf| mf.meeting_time.campus.clone())
}
