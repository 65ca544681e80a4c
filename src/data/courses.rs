//! Course query functions backing the read API contracts.

use sqlx::PgPool;

use crate::data::models::DbCourse;
use crate::error::Result;

const COURSE_COLUMNS: &str = "id, crn, subject, course_number, title, term_code, sequence_number, \
     campus, instructional_method, part_of_term, credit_hours, credit_hour_low, \
     credit_hour_high, enrollment, max_enrollment, wait_count, wait_capacity, \
     cross_list, cross_list_capacity, cross_list_count, link_identifier, \
     is_section_linked, meeting_times, attributes, last_scraped_at";

/// Optional filters for a course search.
#[derive(Debug, Clone, Default)]
pub struct CourseSearch {
    pub term_code: Option<String>,
    pub subject: Option<String>,
    /// Matched against the title via tsvector word search, falling back to a
    /// trigram substring match.
    pub title: Option<String>,
    pub open_only: bool,
    pub limit: i64,
    pub offset: i64,
}

/// Look up a single course by CRN within a term.
pub async fn get_by_crn_term(
    pool: &PgPool,
    crn: &str,
    term_code: &str,
) -> Result<Option<DbCourse>> {
    let course = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses WHERE crn = $1 AND term_code = $2"
    ))
    .bind(crn)
    .bind(term_code)
    .fetch_optional(pool)
    .await?;
    Ok(course)
}

/// Search courses with optional filters, ordered by subject then number.
pub async fn search(pool: &PgPool, params: &CourseSearch) -> Result<Vec<DbCourse>> {
    let limit = if params.limit > 0 { params.limit.min(500) } else { 50 };

    let rows = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses \
         WHERE ($1::text IS NULL OR term_code = $1) \
           AND ($2::text IS NULL OR subject = $2) \
           AND ($3::text IS NULL \
                OR title_search @@ websearch_to_tsquery('english', $3) \
                OR title ILIKE '%' || $3 || '%') \
           AND (NOT $4 OR enrollment < max_enrollment) \
         ORDER BY subject, course_number, sequence_number \
         LIMIT $5 OFFSET $6"
    ))
    .bind(params.term_code.as_deref())
    .bind(params.subject.as_deref())
    .bind(params.title.as_deref())
    .bind(params.open_only)
    .bind(limit)
    .bind(params.offset.max(0))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All sections of a course within a term (e.g. every CS 1083 section).
pub async fn related_sections(
    pool: &PgPool,
    subject: &str,
    course_number: &str,
    term_code: &str,
) -> Result<Vec<DbCourse>> {
    let rows = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses \
         WHERE subject = $1 AND course_number = $2 AND term_code = $3 \
         ORDER BY sequence_number"
    ))
    .bind(subject)
    .bind(course_number)
    .bind(term_code)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Total number of stored course rows.
pub async fn count_all(pool: &PgPool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM courses")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
