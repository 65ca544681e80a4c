//! Scrape scheduler: periodic seeding, term/reference sync, and the
//! stale-lock janitor.
//!
//! The scheduler wakes every minute. Each wake-up runs the janitor, and the
//! longer-period chores (seeding, term sync, reference scrape) fire when
//! their own interval has elapsed. In-cycle work runs in a spawned task
//! guarded by a cancellation token so shutdown stays responsive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::{broadcast, RwLock};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::banner::BannerApi;
use crate::calendar::Term;
use crate::data::models::{ScrapePriority, TargetType};
use crate::data::terms::DbTerm;
use crate::data::{reference, term_subjects, terms, DbContext};
use crate::data::reference::ReferenceData;
use crate::error::Result;
use crate::scraper::adaptive::{
    evaluate_subject, SubjectSchedule, SubjectStats, TermCategory, ARCHIVED_INTERVAL,
};
use crate::scraper::jobs::SubjectJob;
use crate::state::ReferenceCache;

/// How often the scheduler wakes up.
const WORK_INTERVAL: Duration = Duration::from_secs(60);

/// How often terms are synced from the Banner listing (8 hours).
const TERM_SYNC_INTERVAL: Duration = Duration::from_secs(8 * 60 * 60);

/// How often reference data is re-scraped (6 hours).
const REFERENCE_DATA_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Periodically analyzes data and enqueues prioritized scrape jobs.
pub struct Scheduler {
    db: DbContext,
    banner_api: Arc<BannerApi>,
    reference_cache: Arc<RwLock<ReferenceCache>>,
    seed_interval: Duration,
    stale_lock_threshold: Duration,
    /// When each past/archived term was last evaluated, so the expensive
    /// subject lookup is skipped while nothing can be eligible.
    archived_eval_times: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Scheduler {
    pub fn new(
        db: DbContext,
        banner_api: Arc<BannerApi>,
        reference_cache: Arc<RwLock<ReferenceCache>>,
        seed_interval: Duration,
        stale_lock_threshold: Duration,
    ) -> Self {
        Self {
            db,
            banner_api,
            reference_cache,
            seed_interval,
            stale_lock_threshold,
            archived_eval_times: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs the scheduler loop with graceful shutdown support.
    ///
    /// On shutdown any in-progress cycle is cancelled via its token and given
    /// five seconds to wind down before being abandoned.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("scheduler started");

        let mut next_run = time::Instant::now();
        let mut current_work: Option<(tokio::task::JoinHandle<()>, CancellationToken)> = None;
        // Fire every chore immediately on the first cycle
        let mut last_seed = Instant::now() - self.seed_interval;
        let mut last_term_sync = Instant::now() - TERM_SYNC_INTERVAL;
        let mut last_ref_scrape = Instant::now() - REFERENCE_DATA_INTERVAL;

        loop {
            tokio::select! {
                _ = time::sleep_until(next_run) => {
                    // Skip this cycle if the previous one is still running.
                    if let Some((ref handle, _)) = current_work
                        && !handle.is_finished()
                    {
                        trace!("previous scheduling cycle still running, skipping");
                        next_run = time::Instant::now() + WORK_INTERVAL;
                        continue;
                    }

                    let should_seed = last_seed.elapsed() >= self.seed_interval;
                    let should_sync_terms = last_term_sync.elapsed() >= TERM_SYNC_INTERVAL;
                    let should_scrape_ref = last_ref_scrape.elapsed() >= REFERENCE_DATA_INTERVAL;

                    let cancel_token = CancellationToken::new();
                    let work_handle = tokio::spawn({
                        let db = self.db.clone();
                        let banner_api = self.banner_api.clone();
                        let reference_cache = self.reference_cache.clone();
                        let archived_eval_times = self.archived_eval_times.clone();
                        let stale_lock_threshold = self.stale_lock_threshold;
                        let cancel_token = cancel_token.clone();

                        async move {
                            tokio::select! {
                                _ = async {
                                    // The janitor runs every cycle; stale locks
                                    // self-heal within one wake-up.
                                    match db.scrape_jobs().release_stale_locks(stale_lock_threshold).await {
                                        Ok(0) => {}
                                        Ok(count) => warn!(count, "released stale job locks"),
                                        Err(e) => error!(error = ?e, "failed to release stale locks"),
                                    }

                                    if should_sync_terms
                                        && let Err(e) = Self::sync_terms(db.pool(), &banner_api).await
                                    {
                                        error!(error = ?e, "failed to sync terms");
                                    }

                                    if should_scrape_ref
                                        && let Err(e) = Self::scrape_reference_data(db.pool(), &banner_api, &reference_cache).await
                                    {
                                        error!(error = ?e, "failed to scrape reference data");
                                    }

                                    if should_seed
                                        && let Err(e) = Self::seed_jobs(&db, &banner_api, &archived_eval_times).await
                                    {
                                        error!(error = ?e, "failed to seed jobs");
                                    }
                                } => {}
                                _ = cancel_token.cancelled() => {
                                    trace!("scheduling work cancelled");
                                }
                            }
                        }
                    });

                    // Advance the in-memory timestamps now so a long-running
                    // cycle doesn't re-trigger the same chores.
                    if should_seed {
                        last_seed = Instant::now();
                    }
                    if should_sync_terms {
                        last_term_sync = Instant::now();
                    }
                    if should_scrape_ref {
                        last_ref_scrape = Instant::now();
                    }

                    current_work = Some((work_handle, cancel_token));
                    next_run = time::Instant::now() + WORK_INTERVAL;
                }
                _ = shutdown_rx.recv() => {
                    info!("scheduler received shutdown signal");

                    if let Some((handle, cancel_token)) = current_work.take() {
                        cancel_token.cancel();
                        if time::timeout(Duration::from_secs(5), handle).await.is_err() {
                            warn!("scheduling work did not complete within 5s, abandoning");
                        }
                    }

                    info!("scheduler exiting gracefully");
                    break;
                }
            }
        }
    }

    /// Seed subject jobs for every term the scheduler targets.
    ///
    /// Targets are the scrape-enabled terms plus the calendar's default term.
    /// For each (term × subject) pair the adaptive evaluator decides
    /// eligibility; eligible subjects without an existing live job are
    /// enqueued in one batch.
    async fn seed_jobs(
        db: &DbContext,
        banner_api: &BannerApi,
        archived_eval_times: &Mutex<HashMap<String, Instant>>,
    ) -> Result<()> {
        let mut target_terms = terms::get_enabled_terms(db.pool()).await?;

        let default_code = Term::default_now().to_string();
        if !target_terms.iter().any(|t| t.code == default_code)
            && let Some(default_term) = terms::get_term_by_code(db.pool(), &default_code).await?
        {
            target_terms.push(default_term);
        }

        if target_terms.is_empty() {
            trace!("no terms to seed");
            return Ok(());
        }

        // Categorize relative to the default term and drop past/archived
        // terms that were evaluated recently.
        let categorized: Vec<(DbTerm, TermCategory)> = target_terms
            .into_iter()
            .map(|t| {
                let category = if t.code.as_str() < default_code.as_str() {
                    TermCategory::Past
                } else if t.code.as_str() > default_code.as_str() {
                    TermCategory::Future
                } else if t.is_archived {
                    TermCategory::Archived
                } else {
                    TermCategory::Current
                };
                (t, category)
            })
            .collect();

        let active_terms: Vec<(DbTerm, TermCategory)> = {
            let eval_times = archived_eval_times.lock().unwrap();
            categorized
                .into_iter()
                .filter(|(t, category)| match category {
                    TermCategory::Past | TermCategory::Archived => eval_times
                        .get(&t.code)
                        .is_none_or(|last| last.elapsed() >= ARCHIVED_INTERVAL),
                    _ => true,
                })
                .collect()
        };

        if active_terms.is_empty() {
            return Ok(());
        }

        let stats_rows = db.scrape_jobs().fetch_subject_stats().await?;
        let stats_map: HashMap<(String, String), SubjectStats> = stats_rows
            .into_iter()
            .map(|row| ((row.subject.clone(), row.term.clone()), SubjectStats::from(row)))
            .collect();

        for (term, category) in active_terms {
            if let Err(e) =
                Self::seed_term_jobs(db, banner_api, &term, category, &stats_map).await
            {
                error!(term = %term.code, error = ?e, "failed to seed jobs for term");
                continue;
            }

            if matches!(category, TermCategory::Past | TermCategory::Archived) {
                archived_eval_times
                    .lock()
                    .unwrap()
                    .insert(term.code.clone(), Instant::now());
            }
        }

        trace!("job seeding complete");
        Ok(())
    }

    /// Seed jobs for a single term.
    #[tracing::instrument(skip_all, fields(term = %term.code))]
    async fn seed_term_jobs(
        db: &DbContext,
        banner_api: &BannerApi,
        term: &DbTerm,
        category: TermCategory,
        stats_map: &HashMap<(String, String), SubjectStats>,
    ) -> Result<()> {
        // Past and archived terms read the cached subject list; anything
        // fresher hits the API and refreshes the cache.
        let subjects = match category {
            TermCategory::Past | TermCategory::Archived => {
                let cached = term_subjects::get_cached(&term.code, db.pool()).await?;
                if !cached.is_empty() {
                    cached
                } else {
                    let fetched = banner_api
                        .get_subjects("", &term.code, 1, 500)
                        .await?;
                    term_subjects::cache(&term.code, &fetched, db.pool()).await?;
                    fetched
                }
            }
            _ => {
                let fetched = banner_api.get_subjects("", &term.code, 1, 500).await?;
                term_subjects::cache(&term.code, &fetched, db.pool()).await?;
                fetched
            }
        };

        let now = Utc::now();
        let mut eligible_subjects: Vec<String> = Vec::new();
        let mut cooldown_count = 0usize;
        let mut paused_count = 0usize;

        for subject in &subjects {
            let key = (subject.code.clone(), term.code.clone());
            let stats = stats_map
                .get(&key)
                .cloned()
                .unwrap_or_else(|| SubjectStats::cold(&subject.code, &term.code));

            match evaluate_subject(&stats, now, category) {
                SubjectSchedule::Eligible(_) => eligible_subjects.push(subject.code.clone()),
                SubjectSchedule::Cooldown(_) => cooldown_count += 1,
                SubjectSchedule::Paused => paused_count += 1,
            }
        }

        if eligible_subjects.is_empty() {
            trace!(
                total = subjects.len(),
                cooldown = cooldown_count,
                paused = paused_count,
                "no eligible subjects"
            );
            return Ok(());
        }

        info!(
            total = subjects.len(),
            eligible = eligible_subjects.len(),
            cooldown = cooldown_count,
            paused = paused_count,
            ?category,
            "seeding subjects"
        );

        let subject_payloads: Vec<_> = eligible_subjects
            .iter()
            .map(|code| json!({ "subject": code, "term": term.code }))
            .collect();

        let existing_payloads = db
            .scrape_jobs()
            .find_existing_payloads(TargetType::Subject, &subject_payloads)
            .await?;

        // A term that has never completed a scrape gets its first pass at low
        // priority so it doesn't crowd out the live term.
        let priority = if term.last_scraped_at.is_none() {
            ScrapePriority::Low
        } else {
            ScrapePriority::Medium
        };

        let mut skipped = 0usize;
        let new_jobs: Vec<_> = eligible_subjects
            .into_iter()
            .filter_map(|subject_code| {
                let job = SubjectJob::new(subject_code, term.code.clone());
                let payload = serde_json::to_value(&job).ok()?;

                if existing_payloads.contains(&payload.to_string()) {
                    skipped += 1;
                    None
                } else {
                    Some((payload, TargetType::Subject, priority))
                }
            })
            .collect();

        if skipped > 0 {
            debug!(count = skipped, "skipped subjects with existing jobs");
        }

        if !new_jobs.is_empty() {
            db.scrape_jobs().batch_insert(&new_jobs).await?;
        }

        Ok(())
    }

    /// Sync the upstream term listing into the `terms` table.
    #[tracing::instrument(skip_all)]
    async fn sync_terms(db_pool: &PgPool, banner_api: &BannerApi) -> Result<()> {
        let banner_terms = banner_api.get_terms("", 1, 500).await?;
        let result = terms::sync_terms_from_banner(db_pool, banner_terms).await?;

        info!(
            inserted = result.inserted,
            updated = result.updated,
            skipped = result.skipped,
            "term sync completed"
        );
        Ok(())
    }

    /// Scrape every reference-data category and refresh the in-memory cache.
    #[tracing::instrument(skip_all)]
    async fn scrape_reference_data(
        db_pool: &PgPool,
        banner_api: &BannerApi,
        reference_cache: &Arc<RwLock<ReferenceCache>>,
    ) -> Result<()> {
        let term = Term::default_now().to_string();
        info!(term = %term, "scraping reference data");

        let mut all_entries: Vec<ReferenceData> = Vec::new();
        let mut collect = |category: &str, pairs: Vec<crate::banner::Pair>| {
            all_entries.extend(pairs.into_iter().map(|p| ReferenceData {
                category: category.to_owned(),
                code: p.code,
                description: p.description,
            }));
        };

        match banner_api.get_terms("", 1, 500).await {
            Ok(pairs) => collect("term", pairs),
            Err(e) => warn!(error = ?e, "failed to fetch terms"),
        }

        match banner_api.get_subjects("", &term, 1, 500).await {
            Ok(pairs) => {
                if let Err(e) = term_subjects::cache(&term, &pairs, db_pool).await {
                    warn!(error = ?e, "failed to cache term subjects");
                }
                collect("subject", pairs);
            }
            Err(e) => warn!(error = ?e, "failed to fetch subjects"),
        }

        match banner_api.get_campuses(&term).await {
            Ok(pairs) => collect("campus", pairs),
            Err(e) => warn!(error = ?e, "failed to fetch campuses"),
        }

        match banner_api.get_instructional_methods(&term).await {
            Ok(pairs) => collect("instructional_method", pairs),
            Err(e) => warn!(error = ?e, "failed to fetch instructional methods"),
        }

        match banner_api.get_parts_of_term(&term).await {
            Ok(pairs) => collect("part_of_term", pairs),
            Err(e) => warn!(error = ?e, "failed to fetch parts of term"),
        }

        match banner_api.get_attributes(&term).await {
            Ok(pairs) => collect("attribute", pairs),
            Err(e) => warn!(error = ?e, "failed to fetch attributes"),
        }

        let total = all_entries.len();
        reference::batch_upsert(&all_entries, db_pool).await?;
        info!(total_entries = total, "reference data upserted");

        let all = reference::get_all(db_pool).await?;
        let count = all.len();
        *reference_cache.write().await = ReferenceCache::from_entries(all);
        info!(entries = count, "reference cache refreshed");

        Ok(())
    }
}
