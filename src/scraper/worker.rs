//! Scrape worker: claim → fetch → ingest → commit outcome.
//!
//! Each worker runs in its own task, polling the queue through the claim
//! call. Failures are classified and handed to the retry policy; shutdown
//! either lets the in-flight job finish or releases its lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::banner::BannerApi;
use crate::data::models::{IngestReport, ScrapeJob};
use crate::data::{terms, DbContext};
use crate::scraper::jobs::{JobError, JobType};
use crate::scraper::retry::{RetryDecision, RetryPolicy};
use crate::utils::fmt_duration;

/// Maximum time a single job may run before it counts as stuck.
const JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Jobs slower than this get a warning (usually rate limiting).
const SLOW_THRESHOLD: Duration = Duration::from_secs(30);

/// Poll delay when the queue is empty.
const IDLE_POLL_DELAY: Duration = Duration::from_secs(5);

/// A single worker instance.
pub struct Worker {
    id: usize,
    db: DbContext,
    banner_api: Arc<BannerApi>,
    policy: RetryPolicy,
}

impl Worker {
    pub fn new(id: usize, db: DbContext, banner_api: Arc<BannerApi>, policy: RetryPolicy) -> Self {
        Self {
            id,
            db,
            banner_api,
            policy,
        }
    }

    /// Runs the worker's main loop until shutdown.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = self.id, "worker started");

        loop {
            let job = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker_id = self.id, "worker received shutdown signal");
                    break;
                }
                result = self.claim_next_job() => {
                    match result {
                        Ok(Some(job)) => job,
                        Ok(None) => {
                            trace!(worker_id = self.id, "no jobs available");
                            time::sleep(IDLE_POLL_DELAY).await;
                            continue;
                        }
                        Err(e) => {
                            warn!(worker_id = self.id, error = ?e, "failed to claim job");
                            time::sleep(IDLE_POLL_DELAY * 2).await;
                            continue;
                        }
                    }
                }
            };

            let job_id = job.id;
            let started_at = Utc::now();
            let start = std::time::Instant::now();

            // Process the job, racing against shutdown and the job timeout.
            let outcome = tokio::select! {
                _ = shutdown_rx.recv() => {
                    self.release_on_shutdown(job_id).await;
                    break;
                }
                result = async {
                    match time::timeout(JOB_TIMEOUT, self.process_job(&job)).await {
                        Ok(result) => result,
                        Err(_) => Err(JobError::Retriable {
                            kind: crate::scraper::retry::FailureKind::Transport,
                            source: anyhow::anyhow!(
                                "job timed out after {}s",
                                JOB_TIMEOUT.as_secs()
                            ),
                        }),
                    }
                } => result,
            };

            let duration = start.elapsed();
            if duration > SLOW_THRESHOLD {
                warn!(
                    worker_id = self.id,
                    job_id,
                    duration = fmt_duration(duration),
                    "slow job (likely rate limiting or network delays)"
                );
            }

            self.commit_outcome(&job, outcome, duration, started_at).await;
        }
    }

    /// Atomically claim the next eligible job from the queue.
    async fn claim_next_job(&self) -> crate::error::Result<Option<ScrapeJob>> {
        self.db.scrape_jobs().claim_next().await
    }

    /// Fetch via the Banner client, then hand the observations to ingest.
    async fn process_job(&self, job: &ScrapeJob) -> Result<IngestReport, JobError> {
        let typed = JobType::from_target_type_and_payload(
            job.target_type,
            job.target_payload.clone(),
        )
        .map_err(|e| JobError::Fatal(anyhow::Error::new(e)))?;
        let job_impl = typed.boxed();

        let span = tracing::info_span!("process_job", job_id = job.id);
        async move {
            debug!(worker_id = self.id, target = %job_impl.description(), "processing job");

            let fetch_start = std::time::Instant::now();
            let courses = job_impl.fetch(&self.banner_api).await?;
            let fetch_elapsed = fetch_start.elapsed();

            let ingest_start = std::time::Instant::now();
            let report = self
                .db
                .courses()
                .ingest(&courses, Utc::now())
                .await
                .map_err(|e| JobError::Retriable {
                    kind: crate::scraper::retry::FailureKind::Transport,
                    source: e,
                })?;
            let ingest_elapsed = ingest_start.elapsed();

            debug!(
                worker_id = self.id,
                fetch = fmt_duration(fetch_elapsed),
                ingest = fmt_duration(ingest_elapsed),
                fetched = report.fetched,
                changed = report.changed,
                "job phases complete"
            );

            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Apply the job outcome: complete, retry, or exhaust.
    async fn commit_outcome(
        &self,
        job: &ScrapeJob,
        outcome: Result<IngestReport, JobError>,
        duration: Duration,
        started_at: DateTime<Utc>,
    ) {
        let duration_ms = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);

        match outcome {
            Ok(report) => {
                if report.changed > 0 {
                    info!(
                        worker_id = self.id,
                        job_id = job.id,
                        duration = fmt_duration(duration),
                        fetched = report.fetched,
                        changed = report.changed,
                        unchanged = report.unchanged,
                        audits = report.audits,
                        metrics = report.metrics,
                        "job completed with changes"
                    );
                } else {
                    debug!(
                        worker_id = self.id,
                        job_id = job.id,
                        duration = fmt_duration(duration),
                        fetched = report.fetched,
                        "job completed (no changes)"
                    );
                }

                self.record_result(job, started_at, duration_ms, true, None, Some(&report))
                    .await;

                if let Err(e) = self.db.scrape_jobs().complete(job.id).await {
                    error!(worker_id = self.id, job_id = job.id, error = ?e, "failed to complete job");
                }

                if let Some(term) = job.target_payload.get("term").and_then(|v| v.as_str())
                    && let Err(e) = terms::update_last_scraped_at(self.db.pool(), term).await
                {
                    warn!(worker_id = self.id, job_id = job.id, term, error = ?e, "failed to update term last_scraped_at");
                }
            }
            Err(err) => {
                let kind = err.kind();
                let message = format!("{err}");

                match self.policy.decide(job.retry_count, job.max_retries, kind) {
                    RetryDecision::Retry { delay } => {
                        let next_attempt = job.retry_count + 1;
                        warn!(
                            worker_id = self.id,
                            job_id = job.id,
                            ?kind,
                            retry_attempt = next_attempt,
                            max_retries = job.max_retries,
                            delay = fmt_duration(delay),
                            error = %message,
                            "job failed, scheduling retry"
                        );

                        let execute_at = Utc::now()
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::seconds(30));
                        if let Err(e) = self
                            .db
                            .scrape_jobs()
                            .retry(job.id, next_attempt, execute_at)
                            .await
                        {
                            error!(worker_id = self.id, job_id = job.id, error = ?e, "failed to schedule retry");
                        }
                    }
                    RetryDecision::Exhaust => {
                        error!(
                            worker_id = self.id,
                            job_id = job.id,
                            ?kind,
                            retry_count = job.retry_count,
                            max_retries = job.max_retries,
                            error = %message,
                            "job failed permanently, exhausting"
                        );

                        self.record_result(
                            job,
                            started_at,
                            duration_ms,
                            false,
                            Some(&message),
                            None,
                        )
                        .await;

                        if let Err(e) = self.db.scrape_jobs().exhaust(job.id).await {
                            error!(worker_id = self.id, job_id = job.id, error = ?e, "failed to exhaust job");
                        }
                    }
                }
            }
        }
    }

    async fn record_result(
        &self,
        job: &ScrapeJob,
        started_at: DateTime<Utc>,
        duration_ms: i32,
        success: bool,
        error_message: Option<&str>,
        report: Option<&IngestReport>,
    ) {
        if let Err(e) = self
            .db
            .scrape_jobs()
            .insert_result(
                job.target_type,
                job.target_payload.clone(),
                job.priority,
                job.queued_at,
                started_at,
                duration_ms,
                success,
                error_message,
                job.retry_count,
                report,
            )
            .await
        {
            error!(worker_id = self.id, job_id = job.id, error = ?e, "failed to insert job result");
        }
    }

    /// Shutdown arrived mid-job: release the lock so another worker can pick
    /// the job up after restart. No result row is written.
    async fn release_on_shutdown(&self, job_id: i32) {
        info!(
            worker_id = self.id,
            job_id, "shutdown during job processing, releasing lock"
        );
        if let Err(e) = self.db.scrape_jobs().unlock(job_id).await {
            warn!(worker_id = self.id, job_id, error = ?e, "failed to unlock job during shutdown");
        }
    }
}
