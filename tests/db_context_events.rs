//! Queue operations must emit their matching lifecycle events.

#[allow(dead_code)]
mod helpers;

use std::time::Duration;

use bannerwatch::data::models::{ScrapeJobStatus, ScrapePriority, TargetType};
use bannerwatch::events::{DomainEvent, EventBuffer, ScrapeJobEvent};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;

/// Drain every event currently in the buffer from `cursor`.
fn drain(events: &EventBuffer, mut cursor: u64) -> Vec<ScrapeJobEvent> {
    let mut out = Vec::new();
    while let Some(event) = events.read(cursor) {
        if let DomainEvent::ScrapeJob(event) = event {
            out.push(event);
        }
        cursor += 1;
    }
    out
}

#[sqlx::test]
async fn batch_insert_emits_created(pool: PgPool) {
    let (ctx, events) = helpers::make_ctx(pool);
    let (cursor, _) = events.subscribe();

    ctx.scrape_jobs()
        .batch_insert(&[(
            json!({"subject": "CS", "term": "202610"}),
            TargetType::Subject,
            ScrapePriority::Medium,
        )])
        .await
        .unwrap();

    let emitted = drain(&events, cursor);
    assert_eq!(emitted.len(), 1);
    let ScrapeJobEvent::Created { job } = &emitted[0] else {
        panic!("expected Created event");
    };
    assert_eq!(job.status, ScrapeJobStatus::Pending);
}

#[sqlx::test]
async fn claim_emits_locked(pool: PgPool) {
    let (ctx, events) = helpers::make_ctx(pool.clone());
    let id = helpers::insert_scrape_job(
        &pool,
        TargetType::Subject,
        json!({"subject": "CS", "term": "202610"}),
        ScrapePriority::Medium,
        false,
        0,
        5,
    )
    .await;

    let (cursor, _) = events.subscribe();
    ctx.scrape_jobs().claim_next().await.unwrap().unwrap();

    let emitted = drain(&events, cursor);
    assert!(matches!(
        emitted.as_slice(),
        [ScrapeJobEvent::Locked { id: locked_id, status: ScrapeJobStatus::Processing, .. }]
            if *locked_id == id
    ));
}

#[sqlx::test]
async fn complete_emits_completed_with_subject(pool: PgPool) {
    let (ctx, events) = helpers::make_ctx(pool.clone());
    let id = helpers::insert_scrape_job(
        &pool,
        TargetType::Subject,
        json!({"subject": "CS", "term": "202610"}),
        ScrapePriority::Medium,
        true,
        0,
        5,
    )
    .await;

    let (cursor, _) = events.subscribe();
    ctx.scrape_jobs().complete(id).await.unwrap();

    let emitted = drain(&events, cursor);
    assert!(matches!(
        emitted.as_slice(),
        [ScrapeJobEvent::Completed { id: done_id, subject: Some(subject) }]
            if *done_id == id && subject == "CS"
    ));
}

#[sqlx::test]
async fn retry_emits_retried_with_count(pool: PgPool) {
    let (ctx, events) = helpers::make_ctx(pool.clone());
    let id = helpers::insert_scrape_job(
        &pool,
        TargetType::Subject,
        json!({"subject": "CS", "term": "202610"}),
        ScrapePriority::Medium,
        true,
        2,
        5,
    )
    .await;

    let (cursor, _) = events.subscribe();
    ctx.scrape_jobs()
        .retry(id, 3, Utc::now() + chrono::Duration::seconds(120))
        .await
        .unwrap();

    let emitted = drain(&events, cursor);
    assert!(matches!(
        emitted.as_slice(),
        [ScrapeJobEvent::Retried { id: retried_id, retry_count: 3, .. }]
            if *retried_id == id
    ));
}

#[sqlx::test]
async fn exhaust_emits_exhausted_only(pool: PgPool) {
    let (ctx, events) = helpers::make_ctx(pool.clone());
    let id = helpers::insert_scrape_job(
        &pool,
        TargetType::Subject,
        json!({"subject": "CS", "term": "202610"}),
        ScrapePriority::Medium,
        true,
        5,
        5,
    )
    .await;

    let (cursor, _) = events.subscribe();
    ctx.scrape_jobs().exhaust(id).await.unwrap();

    let emitted = drain(&events, cursor);
    assert!(
        matches!(
            emitted.as_slice(),
            [ScrapeJobEvent::Exhausted { id: exhausted_id }] if *exhausted_id == id
        ),
        "exhaust keeps the row, so no Deleted event follows"
    );
}

#[sqlx::test]
async fn janitor_emits_stale_lock(pool: PgPool) {
    let (ctx, events) = helpers::make_ctx(pool.clone());
    sqlx::query(
        "INSERT INTO scrape_jobs (target_type, target_payload, priority, execute_at, locked_at)
         VALUES ('Subject', '{\"subject\": \"CS\"}', 'Medium', NOW(), NOW() - INTERVAL '12 minutes')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let (cursor, _) = events.subscribe();
    ctx.scrape_jobs()
        .release_stale_locks(Duration::from_secs(10 * 60))
        .await
        .unwrap();

    let emitted = drain(&events, cursor);
    assert!(matches!(
        emitted.as_slice(),
        [ScrapeJobEvent::StaleLock { status: ScrapeJobStatus::Pending, .. }]
    ));
}

#[sqlx::test]
async fn delete_emits_deleted(pool: PgPool) {
    let (ctx, events) = helpers::make_ctx(pool.clone());
    let id = helpers::insert_scrape_job(
        &pool,
        TargetType::CrnList,
        json!({"term": "202610", "crns": ["1", "2"]}),
        ScrapePriority::Low,
        false,
        0,
        5,
    )
    .await;

    let (cursor, _) = events.subscribe();
    ctx.scrape_jobs().delete(id).await.unwrap();

    let emitted = drain(&events, cursor);
    assert!(matches!(
        emitted.as_slice(),
        [ScrapeJobEvent::Deleted { id: deleted_id }] if *deleted_id == id
    ));
}
