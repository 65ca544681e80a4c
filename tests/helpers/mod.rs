use std::sync::Arc;

use bannerwatch::banner::models::{Course, FacultyItem};
use bannerwatch::data::models::{ScrapePriority, TargetType};
use bannerwatch::data::DbContext;
use bannerwatch::events::EventBuffer;
use chrono::Utc;
use sqlx::PgPool;

/// Build a `DbContext` over a test pool with a fresh event buffer.
pub fn make_ctx(pool: PgPool) -> (DbContext, Arc<EventBuffer>) {
    let events = Arc::new(EventBuffer::new(256));
    (DbContext::new(pool, events.clone()), events)
}

/// Build a test `Course` (Banner API model) with sensible defaults.
///
/// Only the fields the ingest pipeline reads need meaningful values; the
/// rest are harmless placeholders.
pub fn make_course(
    crn: &str,
    term: &str,
    subject: &str,
    course_number: &str,
    title: &str,
    enrollment: i32,
    max_enrollment: i32,
    wait_count: i32,
    wait_capacity: i32,
) -> Course {
    Course {
        id: 0,
        term: term.to_owned(),
        term_desc: String::new(),
        course_reference_number: crn.to_owned(),
        part_of_term: "1".to_owned(),
        course_number: course_number.to_owned(),
        subject: subject.to_owned(),
        subject_description: subject.to_owned(),
        sequence_number: "001".to_owned(),
        campus_description: "Main Campus".to_owned(),
        schedule_type_description: "Lecture".to_owned(),
        course_title: title.to_owned(),
        credit_hours: Some(3),
        maximum_enrollment: max_enrollment,
        enrollment,
        seats_available: max_enrollment - enrollment,
        wait_capacity,
        wait_count,
        cross_list: None,
        cross_list_capacity: None,
        cross_list_count: None,
        cross_list_available: None,
        credit_hour_high: None,
        credit_hour_low: None,
        credit_hour_indicator: None,
        open_section: enrollment < max_enrollment,
        link_identifier: None,
        is_section_linked: false,
        subject_course: format!("{subject}{course_number}"),
        reserved_seat_summary: None,
        instructional_method: "FF".to_owned(),
        instructional_method_description: "Face to Face".to_owned(),
        section_attributes: vec![],
        faculty: vec![],
        meetings_faculty: vec![],
    }
}

/// Build a faculty member attached to a course.
pub fn make_faculty(banner_id: &str, name: &str, email: &str, primary: bool) -> FacultyItem {
    FacultyItem {
        banner_id: banner_id.to_owned(),
        category: None,
        class: "net.hedtech.banner.FacultyDecorator".to_owned(),
        course_reference_number: 12345,
        display_name: name.to_owned(),
        email_address: Some(email.to_owned()),
        primary_indicator: primary,
        term: "202610".to_owned(),
    }
}

/// Insert a scrape job row directly via SQL, returning the generated ID.
#[allow(clippy::too_many_arguments)]
pub async fn insert_scrape_job(
    pool: &PgPool,
    target_type: TargetType,
    payload: serde_json::Value,
    priority: ScrapePriority,
    locked: bool,
    retry_count: i32,
    max_retries: i32,
) -> i32 {
    let locked_at = if locked { Some(Utc::now()) } else { None };

    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO scrape_jobs (target_type, target_payload, priority, execute_at, locked_at, retry_count, max_retries)
         VALUES ($1, $2, $3, NOW(), $4, $5, $6)
         RETURNING id",
    )
    .bind(target_type)
    .bind(payload)
    .bind(priority)
    .bind(locked_at)
    .bind(retry_count)
    .bind(max_retries)
    .fetch_one(pool)
    .await
    .expect("insert_scrape_job failed");

    id
}
