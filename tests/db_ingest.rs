#[allow(dead_code)]
mod helpers;

use chrono::{Duration, Utc};
use sqlx::PgPool;

async fn audit_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM course_audits")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn metric_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM course_metrics")
        .fetch_one(pool)
        .await
        .unwrap()
}

// ── first observation ───────────────────────────────────────────────

#[sqlx::test]
async fn new_course_inserts_row_and_metric_without_audit(pool: PgPool) {
    let (ctx, _) = helpers::make_ctx(pool.clone());
    let course = helpers::make_course("12345", "202610", "CS", "1083", "Intro", 20, 30, 0, 10);

    let report = ctx.courses().ingest(&[course], Utc::now()).await.unwrap();

    assert_eq!(report.fetched, 1);
    assert_eq!(report.changed, 1);
    assert_eq!(report.unchanged, 0);
    assert_eq!(report.audits, 0, "first observation produces no audit");
    assert_eq!(report.metrics, 1);

    let (enrollment, wait, seats): (i32, i32, i32) = sqlx::query_as(
        "SELECT enrollment, wait_count, seats_available FROM course_metrics LIMIT 1",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!((enrollment, wait, seats), (20, 0, 10));
}

// ── no changes ──────────────────────────────────────────────────────

#[sqlx::test]
async fn reingest_identical_observation_writes_nothing(pool: PgPool) {
    let (ctx, _) = helpers::make_ctx(pool.clone());
    let course = helpers::make_course("12345", "202610", "CS", "1083", "Intro", 20, 30, 0, 10);

    ctx.courses()
        .ingest(std::slice::from_ref(&course), Utc::now())
        .await
        .unwrap();
    let audits_before = audit_count(&pool).await;
    let metrics_before = metric_count(&pool).await;

    let report = ctx
        .courses()
        .ingest(&[course], Utc::now() + Duration::minutes(5))
        .await
        .unwrap();

    assert_eq!(report.changed, 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.audits, 0);
    assert_eq!(report.metrics, 0);
    assert_eq!(audit_count(&pool).await, audits_before);
    assert_eq!(metric_count(&pool).await, metrics_before);
}

#[sqlx::test]
async fn unchanged_ingest_still_bumps_last_scraped_at(pool: PgPool) {
    let (ctx, _) = helpers::make_ctx(pool.clone());
    let course = helpers::make_course("12345", "202610", "CS", "1083", "Intro", 20, 30, 0, 10);

    let first_fetch = Utc::now() - Duration::hours(1);
    ctx.courses()
        .ingest(std::slice::from_ref(&course), first_fetch)
        .await
        .unwrap();

    let second_fetch = Utc::now();
    ctx.courses().ingest(&[course], second_fetch).await.unwrap();

    let (last_scraped_at,): (chrono::DateTime<Utc>,) =
        sqlx::query_as("SELECT last_scraped_at FROM courses LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    // Postgres stores microseconds; compare at that precision
    assert!((last_scraped_at - second_fetch).num_milliseconds().abs() < 1);
}

// ── counter changes ─────────────────────────────────────────────────

#[sqlx::test]
async fn enrollment_tick_produces_one_audit_and_one_metric(pool: PgPool) {
    let (ctx, _) = helpers::make_ctx(pool.clone());
    let stored = helpers::make_course("12345", "202610", "CS", "1083", "Intro", 20, 30, 0, 10);
    ctx.courses().ingest(&[stored], Utc::now()).await.unwrap();

    let fetch_time = Utc::now() + Duration::minutes(3);
    let observed = helpers::make_course("12345", "202610", "CS", "1083", "Intro", 21, 30, 0, 10);
    let report = ctx.courses().ingest(&[observed], fetch_time).await.unwrap();

    assert_eq!(report.changed, 1);
    assert_eq!(report.audits, 1);
    assert_eq!(report.metrics, 1);

    let (field, old_value, new_value): (String, String, String) = sqlx::query_as(
        "SELECT field_changed, old_value, new_value FROM course_audits ORDER BY id DESC LIMIT 1",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!((field.as_str(), old_value.as_str(), new_value.as_str()), ("enrollment", "20", "21"));

    // The metric sample carries the new counters at the fetch instant
    let (ts, enrollment, seats): (chrono::DateTime<Utc>, i32, i32) = sqlx::query_as(
        "SELECT timestamp, enrollment, seats_available FROM course_metrics ORDER BY id DESC LIMIT 1",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    // Postgres stores microseconds; compare at that precision
    assert!((ts - fetch_time).num_milliseconds().abs() < 1);
    assert_eq!((enrollment, seats), (21, 9));
}

#[sqlx::test]
async fn k_scalar_changes_produce_k_audits(pool: PgPool) {
    let (ctx, _) = helpers::make_ctx(pool.clone());
    let stored = helpers::make_course("12345", "202610", "CS", "1083", "Intro", 20, 30, 0, 10);
    ctx.courses().ingest(&[stored], Utc::now()).await.unwrap();
    let audits_before = audit_count(&pool).await;

    // title + wait_capacity changed, everything else identical
    let observed =
        helpers::make_course("12345", "202610", "CS", "1083", "Intro to CS", 20, 30, 0, 25);
    let report = ctx
        .courses()
        .ingest(&[observed], Utc::now() + Duration::minutes(5))
        .await
        .unwrap();

    assert_eq!(report.audits, 2);
    assert_eq!(audit_count(&pool).await, audits_before + 2);
    assert_eq!(
        report.metrics, 0,
        "wait_capacity is not one of the three metric counters"
    );
}

// ── instructors ─────────────────────────────────────────────────────

#[sqlx::test]
async fn instructor_set_diff_audited_and_synced(pool: PgPool) {
    let (ctx, _) = helpers::make_ctx(pool.clone());

    let mut stored = helpers::make_course("12345", "202610", "CS", "1083", "Intro", 20, 30, 0, 10);
    stored.faculty = vec![helpers::make_faculty(
        "@01111111",
        "Doe, Jane",
        "Jane.Doe@example.edu",
        true,
    )];
    ctx.courses().ingest(&[stored], Utc::now()).await.unwrap();

    // Email keys are lower-cased
    let (email,): (String,) = sqlx::query_as("SELECT email FROM instructors LIMIT 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(email, "jane.doe@example.edu");

    let mut observed =
        helpers::make_course("12345", "202610", "CS", "1083", "Intro", 20, 30, 0, 10);
    observed.faculty = vec![helpers::make_faculty(
        "@02222222",
        "Roe, Richard",
        "richard.roe@example.edu",
        true,
    )];
    let report = ctx
        .courses()
        .ingest(&[observed], Utc::now() + Duration::minutes(5))
        .await
        .unwrap();

    assert_eq!(report.audits, 2, "one added, one removed");

    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT field_changed, old_value, new_value FROM course_audits ORDER BY id",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert!(rows
        .iter()
        .any(|(f, o, n)| f == "instructor_added" && o.is_empty() && n == "@02222222"));
    assert!(rows
        .iter()
        .any(|(f, o, n)| f == "instructor_removed" && o == "@01111111" && n.is_empty()));

    // Junction reflects the new set only
    let links: Vec<(String,)> =
        sqlx::query_as("SELECT banner_id FROM course_instructors")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].0, "@02222222");
}

// ── events ──────────────────────────────────────────────────────────

#[sqlx::test]
async fn audit_entries_are_published_as_one_event(pool: PgPool) {
    use bannerwatch::events::DomainEvent;

    let (ctx, events) = helpers::make_ctx(pool.clone());
    let stored = helpers::make_course("12345", "202610", "CS", "1083", "Intro", 20, 30, 0, 10);
    ctx.courses().ingest(&[stored], Utc::now()).await.unwrap();

    let (cursor, _) = events.subscribe();

    let observed = helpers::make_course("12345", "202610", "CS", "1083", "Intro", 22, 30, 1, 10);
    ctx.courses()
        .ingest(&[observed], Utc::now() + Duration::minutes(5))
        .await
        .unwrap();

    let event = events.read(cursor).expect("an event should be published");
    let DomainEvent::AuditLog(audit_event) = event else {
        panic!("expected an audit log event");
    };
    assert_eq!(audit_event.entries.len(), 2, "enrollment and wait_count");
    assert!(audit_event
        .entries
        .iter()
        .all(|entry| entry.subject.as_deref() == Some("CS")));
}
