//! Scrape job stream: snapshot building and event routing.

use sqlx::PgPool;
use std::collections::HashSet;

use crate::data::models::ScrapeJob;
use crate::events::{ScrapeJobDto, ScrapeJobEvent};
use crate::stream::filters::ScrapeJobsFilter;

/// Snapshot row budget; the queue view is bounded, not exhaustive.
const SNAPSHOT_LIMIT: i64 = 500;

/// Load the current queue view, filtered for one subscription.
pub async fn build_snapshot(
    db_pool: &PgPool,
    filter: &ScrapeJobsFilter,
) -> Result<Vec<ScrapeJobDto>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ScrapeJob>(
        "SELECT * FROM scrape_jobs ORDER BY priority DESC, execute_at ASC LIMIT $1",
    )
    .bind(SNAPSHOT_LIMIT)
    .fetch_all(db_pool)
    .await?;

    Ok(rows
        .iter()
        .map(ScrapeJobDto::from)
        .filter(|job| matches_filter(filter, job))
        .collect())
}

/// Whether a job matches the subscription filter.
pub fn matches_filter(filter: &ScrapeJobsFilter, job: &ScrapeJobDto) -> bool {
    if let Some(ref statuses) = filter.status
        && !statuses.is_empty()
        && !statuses.contains(&job.status)
    {
        return false;
    }

    if let Some(ref priorities) = filter.priority
        && !priorities.is_empty()
        && !priorities.contains(&job.priority)
    {
        return false;
    }

    if let Some(ref target_types) = filter.target_type
        && !target_types.is_empty()
        && !target_types.contains(&job.target_type)
    {
        return false;
    }

    true
}

/// Decide whether an event should be delivered to a subscription.
///
/// Events carrying only a job id are resolved against the subscription's
/// known-id set first; unknown ids are fetched once per dispatch (the fetch
/// is shared across subscriptions via `job_details`).
pub async fn event_matches(
    db_pool: &PgPool,
    filter: &ScrapeJobsFilter,
    known_ids: &mut HashSet<i32>,
    event: &ScrapeJobEvent,
    job_details: &mut Option<ScrapeJobDto>,
) -> bool {
    match event {
        ScrapeJobEvent::Created { job } => {
            let matches = matches_filter(filter, job);
            if matches {
                known_ids.insert(job.id);
            }
            matches
        }
        ScrapeJobEvent::Locked { id, .. }
        | ScrapeJobEvent::Retried { id, .. }
        | ScrapeJobEvent::Exhausted { id }
        | ScrapeJobEvent::StaleLock { id, .. } => {
            if known_ids.contains(id) {
                return true;
            }
            if job_details.is_none() {
                *job_details = fetch_by_id(db_pool, *id).await.ok();
            }
            match job_details.as_ref() {
                Some(job) => {
                    let matches = matches_filter(filter, job);
                    if matches {
                        known_ids.insert(*id);
                    }
                    matches
                }
                None => false,
            }
        }
        ScrapeJobEvent::Completed { id, .. } | ScrapeJobEvent::Deleted { id } => {
            known_ids.remove(id)
        }
    }
}

async fn fetch_by_id(db_pool: &PgPool, id: i32) -> Result<ScrapeJobDto, sqlx::Error> {
    let row = sqlx::query_as::<_, ScrapeJob>("SELECT * FROM scrape_jobs WHERE id = $1")
        .bind(id)
        .fetch_one(db_pool)
        .await?;
    Ok(ScrapeJobDto::from(&row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::{ScrapeJobStatus, ScrapePriority, TargetType};
    use chrono::Utc;

    fn dto(status: ScrapeJobStatus, priority: ScrapePriority) -> ScrapeJobDto {
        ScrapeJobDto {
            id: 1,
            target_type: TargetType::Subject,
            target_payload: serde_json::json!({"subject": "CS", "term": "202610"}),
            priority,
            queued_at: Utc::now().to_rfc3339(),
            execute_at: Utc::now().to_rfc3339(),
            locked_at: None,
            exhausted_at: None,
            retry_count: 0,
            max_retries: 5,
            created_at: Utc::now().to_rfc3339(),
            status,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = ScrapeJobsFilter::default();
        assert!(matches_filter(
            &filter,
            &dto(ScrapeJobStatus::Pending, ScrapePriority::Low)
        ));
    }

    #[test]
    fn status_filter() {
        let filter = ScrapeJobsFilter {
            status: Some(vec![ScrapeJobStatus::Pending, ScrapeJobStatus::Processing]),
            ..Default::default()
        };
        assert!(matches_filter(
            &filter,
            &dto(ScrapeJobStatus::Pending, ScrapePriority::Low)
        ));
        assert!(!matches_filter(
            &filter,
            &dto(ScrapeJobStatus::Exhausted, ScrapePriority::Low)
        ));
    }

    #[test]
    fn priority_filter() {
        let filter = ScrapeJobsFilter {
            priority: Some(vec![ScrapePriority::Critical]),
            ..Default::default()
        };
        assert!(!matches_filter(
            &filter,
            &dto(ScrapeJobStatus::Pending, ScrapePriority::Low)
        ));
        assert!(matches_filter(
            &filter,
            &dto(ScrapeJobStatus::Pending, ScrapePriority::Critical)
        ));
    }

    #[test]
    fn target_type_filter() {
        let filter = ScrapeJobsFilter {
            target_type: Some(vec![TargetType::CrnList]),
            ..Default::default()
        };
        assert!(!matches_filter(
            &filter,
            &dto(ScrapeJobStatus::Pending, ScrapePriority::Low)
        ));
    }
}
