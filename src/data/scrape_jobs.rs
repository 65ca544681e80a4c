//! Scrape job queue operations.
//!
//! The queue is the `scrape_jobs` table. Claiming uses `FOR UPDATE SKIP
//! LOCKED` so workers can poll concurrently; a partial unique index over
//! `(target_type, target_payload)` for live rows keeps the seeder idempotent.
//! Every state transition emits a `ScrapeJobEvent` after commit.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::data::context::DbContext;
use crate::data::models::{
    IngestReport, ScrapeJob, ScrapeJobStatus, ScrapePriority, SubjectResultStats, TargetType,
};
use crate::error::Result;
use crate::events::{DomainEvent, ScrapeJobDto, ScrapeJobEvent};

/// Scrape job operations.
pub struct ScrapeJobOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> ScrapeJobOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    fn publish(&self, event: ScrapeJobEvent) {
        self.ctx.events().publish(DomainEvent::ScrapeJob(event));
    }

    /// Atomically claim the next eligible job.
    ///
    /// Eligible means unlocked, not exhausted, and due. Ordering is priority
    /// first, then oldest `execute_at`. At most one worker can claim a given
    /// row. Emits `Locked` on success.
    pub async fn claim_next(&self) -> Result<Option<ScrapeJob>> {
        let mut tx = self.ctx.pool().begin().await?;

        let job = sqlx::query_as::<_, ScrapeJob>(
            "SELECT * FROM scrape_jobs \
             WHERE locked_at IS NULL \
               AND exhausted_at IS NULL \
               AND execute_at <= NOW() \
             ORDER BY priority DESC, execute_at ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let job = match job {
            Some(job) => {
                let locked_at: DateTime<Utc> = sqlx::query_scalar(
                    "UPDATE scrape_jobs SET locked_at = NOW() WHERE id = $1 RETURNING locked_at",
                )
                .bind(job.id)
                .fetch_one(&mut *tx)
                .await?;
                Some(ScrapeJob {
                    locked_at: Some(locked_at),
                    ..job
                })
            }
            None => None,
        };

        tx.commit().await?;

        if let Some(ref job) = job {
            self.publish(ScrapeJobEvent::Locked {
                id: job.id,
                locked_at: job
                    .locked_at
                    .unwrap_or_else(Utc::now)
                    .to_rfc3339(),
                status: ScrapeJobStatus::Processing,
            });
        }

        Ok(job)
    }

    /// Complete a job: delete the row and emit `Completed` with the subject
    /// pulled from the payload for stream filtering.
    pub async fn complete(&self, job_id: i32) -> Result<()> {
        let subject: Option<String> = sqlx::query_scalar(
            "DELETE FROM scrape_jobs WHERE id = $1 RETURNING target_payload->>'subject'",
        )
        .bind(job_id)
        .fetch_optional(self.ctx.pool())
        .await?
        .flatten();

        self.publish(ScrapeJobEvent::Completed {
            id: job_id,
            subject,
        });

        Ok(())
    }

    /// Release a job for retry: bump the retry count, push `execute_at` out
    /// by the backoff delay, refresh `queued_at`, clear the lock.
    pub async fn retry(
        &self,
        job_id: i32,
        retry_count: i32,
        execute_at: DateTime<Utc>,
    ) -> Result<()> {
        let queued_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "UPDATE scrape_jobs \
             SET locked_at = NULL, retry_count = $2, queued_at = NOW(), execute_at = $3 \
             WHERE id = $1 \
             RETURNING queued_at",
        )
        .bind(job_id)
        .bind(retry_count)
        .bind(execute_at)
        .fetch_optional(self.ctx.pool())
        .await?;

        self.publish(ScrapeJobEvent::Retried {
            id: job_id,
            retry_count,
            queued_at: queued_at.unwrap_or_else(Utc::now).to_rfc3339(),
            execute_at: execute_at.to_rfc3339(),
            status: if execute_at <= Utc::now() {
                ScrapeJobStatus::Pending
            } else {
                ScrapeJobStatus::Scheduled
            },
        });

        Ok(())
    }

    /// Mark a job exhausted. The row stays in the table as a terminal record
    /// until an operator re-enqueues or deletes it.
    pub async fn exhaust(&self, job_id: i32) -> Result<()> {
        sqlx::query(
            "UPDATE scrape_jobs SET exhausted_at = NOW(), locked_at = NULL WHERE id = $1",
        )
        .bind(job_id)
        .execute(self.ctx.pool())
        .await?;

        self.publish(ScrapeJobEvent::Exhausted { id: job_id });

        Ok(())
    }

    /// Delete a job outright (operator action, or a fatally malformed row).
    pub async fn delete(&self, job_id: i32) -> Result<()> {
        sqlx::query("DELETE FROM scrape_jobs WHERE id = $1")
            .bind(job_id)
            .execute(self.ctx.pool())
            .await?;

        self.publish(ScrapeJobEvent::Deleted { id: job_id });

        Ok(())
    }

    /// Release a held lock without touching retry state. Used when shutdown
    /// interrupts an in-flight job.
    pub async fn unlock(&self, job_id: i32) -> Result<()> {
        sqlx::query("UPDATE scrape_jobs SET locked_at = NULL WHERE id = $1")
            .bind(job_id)
            .execute(self.ctx.pool())
            .await?;
        Ok(())
    }

    /// Clear locks older than `threshold` so a future worker can reclaim the
    /// jobs. Emits a `StaleLock` event per recovered row.
    pub async fn release_stale_locks(&self, threshold: Duration) -> Result<u64> {
        let ids: Vec<(i32,)> = sqlx::query_as(
            "UPDATE scrape_jobs \
             SET locked_at = NULL \
             WHERE locked_at < NOW() - make_interval(secs => $1::double precision) \
               AND exhausted_at IS NULL \
             RETURNING id",
        )
        .bind(threshold.as_secs_f64())
        .fetch_all(self.ctx.pool())
        .await?;

        for (id,) in &ids {
            self.publish(ScrapeJobEvent::StaleLock {
                id: *id,
                status: ScrapeJobStatus::Pending,
            });
        }

        Ok(ids.len() as u64)
    }

    /// Force-unlock every locked job. Called once at startup to recover jobs
    /// left locked by an unclean shutdown.
    pub async fn force_unlock_all(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE scrape_jobs SET locked_at = NULL, queued_at = NOW() \
             WHERE locked_at IS NOT NULL AND exhausted_at IS NULL",
        )
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Find existing live job payloads matching the given target type and
    /// candidates, stringified for set membership checks during seeding.
    pub async fn find_existing_payloads(
        &self,
        target_type: TargetType,
        candidate_payloads: &[serde_json::Value],
    ) -> Result<HashSet<String>> {
        let existing: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT target_payload FROM scrape_jobs \
             WHERE target_type = $1 AND target_payload = ANY($2) \
               AND exhausted_at IS NULL",
        )
        .bind(target_type)
        .bind(candidate_payloads)
        .fetch_all(self.ctx.pool())
        .await?;

        Ok(existing
            .into_iter()
            .map(|(payload,)| payload.to_string())
            .collect())
    }

    /// Batch insert jobs using UNNEST in a single round-trip.
    ///
    /// Jobs become due immediately. The live-target partial index makes the
    /// insert a no-op for targets that already have an unlocked row; emits
    /// `Created` only for rows that actually landed.
    pub async fn batch_insert(
        &self,
        jobs: &[(serde_json::Value, TargetType, ScrapePriority)],
    ) -> Result<Vec<ScrapeJob>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let mut target_types: Vec<String> = Vec::with_capacity(jobs.len());
        let mut payloads: Vec<serde_json::Value> = Vec::with_capacity(jobs.len());
        let mut priorities: Vec<String> = Vec::with_capacity(jobs.len());

        for (payload, target_type, priority) in jobs {
            target_types.push(format!("{target_type:?}"));
            payloads.push(payload.clone());
            priorities.push(format!("{priority:?}"));
        }

        let inserted = sqlx::query_as::<_, ScrapeJob>(
            r#"
            INSERT INTO scrape_jobs (target_type, target_payload, priority, execute_at, queued_at)
            SELECT v.target_type::target_type, v.payload, v.priority::scrape_priority, NOW(), NOW()
            FROM UNNEST($1::text[], $2::jsonb[], $3::text[])
                AS v(target_type, payload, priority)
            ON CONFLICT (target_type, target_payload)
                WHERE locked_at IS NULL AND exhausted_at IS NULL
                DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&target_types)
        .bind(&payloads)
        .bind(&priorities)
        .fetch_all(self.ctx.pool())
        .await?;

        for job in &inserted {
            debug!(job_id = job.id, "job enqueued");
            self.publish(ScrapeJobEvent::Created {
                job: ScrapeJobDto::from(job),
            });
        }

        Ok(inserted)
    }

    /// Insert a scrape job result log entry.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_result(
        &self,
        target_type: TargetType,
        payload: serde_json::Value,
        priority: ScrapePriority,
        queued_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
        duration_ms: i32,
        success: bool,
        error_message: Option<&str>,
        retry_count: i32,
        report: Option<&IngestReport>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scrape_job_results (
                target_type, payload, priority,
                queued_at, started_at, duration_ms,
                success, error_message, retry_count,
                courses_fetched, courses_changed, courses_unchanged,
                audits_generated, metrics_generated
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(target_type)
        .bind(&payload)
        .bind(priority)
        .bind(queued_at)
        .bind(started_at)
        .bind(duration_ms)
        .bind(success)
        .bind(error_message)
        .bind(retry_count)
        .bind(report.map(|r| r.fetched))
        .bind(report.map(|r| r.changed))
        .bind(report.map(|r| r.unchanged))
        .bind(report.map(|r| r.audits))
        .bind(report.map(|r| r.metrics))
        .execute(self.ctx.pool())
        .await?;

        Ok(())
    }

    /// Fetch aggregated per-(subject, term) statistics over the last 24 hours
    /// of subject results.
    ///
    /// For each pair, examines the 20 most recent results and computes the
    /// average change ratio, consecutive zero-change and empty-fetch runs
    /// from the most recent result backwards, failure/success counts, and the
    /// last completion timestamp.
    pub async fn fetch_subject_stats(&self) -> Result<Vec<SubjectResultStats>> {
        let rows = sqlx::query_as::<_, SubjectResultStats>(
            r#"
            WITH recent AS (
                SELECT payload->>'subject' AS subject,
                       payload->>'term' AS term,
                       success,
                       COALESCE(courses_fetched, 0) AS courses_fetched,
                       COALESCE(courses_changed, 0) AS courses_changed,
                       completed_at,
                       ROW_NUMBER() OVER (
                           PARTITION BY payload->>'subject', payload->>'term'
                           ORDER BY completed_at DESC
                       ) AS rn
                FROM scrape_job_results
                WHERE target_type = 'Subject' AND completed_at > NOW() - INTERVAL '24 hours'
            ),
            filtered AS (SELECT * FROM recent WHERE rn <= 20),
            zero_break AS (
                SELECT subject, term,
                       MIN(rn) FILTER (WHERE courses_changed > 0 AND success) AS first_nonzero_rn,
                       MIN(rn) FILTER (WHERE courses_fetched > 0 AND success) AS first_nonempty_rn
                FROM filtered GROUP BY subject, term
            )
            SELECT
                f.subject::TEXT AS subject,
                COALESCE(f.term, '')::TEXT AS term,
                COUNT(*)::BIGINT AS recent_runs,
                COALESCE(AVG(CASE WHEN f.success AND f.courses_fetched > 0
                     THEN f.courses_changed::FLOAT / f.courses_fetched ELSE NULL END), 0.0)::FLOAT8 AS avg_change_ratio,
                COALESCE(zb.first_nonzero_rn - 1, COUNT(*) FILTER (WHERE f.success AND f.courses_changed = 0))::BIGINT AS consecutive_zero_changes,
                COALESCE(zb.first_nonempty_rn - 1, COUNT(*) FILTER (WHERE f.success AND f.courses_fetched = 0))::BIGINT AS consecutive_empty_fetches,
                COUNT(*) FILTER (WHERE NOT f.success)::BIGINT AS recent_failure_count,
                COUNT(*) FILTER (WHERE f.success)::BIGINT AS recent_success_count,
                MAX(f.completed_at) AS last_completed
            FROM filtered f
            LEFT JOIN zero_break zb ON f.subject = zb.subject AND f.term IS NOT DISTINCT FROM zb.term
            GROUP BY f.subject, f.term, zb.first_nonzero_rn, zb.first_nonempty_rn
            "#,
        )
        .fetch_all(self.ctx.pool())
        .await?;

        Ok(rows)
    }
}
