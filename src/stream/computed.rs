//! Background recomputation for the aggregated streams.
//!
//! Stats, timeseries and subject summaries are derived from the database, not
//! from single events, so a background task watches the event ring, debounces
//! bursts, recomputes the aggregates subscribers actually asked for, diffs
//! against the previous value, and broadcasts only real changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::warn;

use crate::data::scraper_stats::{
    compute_stats, compute_subjects, compute_timeseries, ScraperStats, SubjectSummary,
    TimeseriesPoint,
};
use crate::events::{DomainEvent, EventBuffer};
use crate::stream::protocol::{StreamDelta, SubjectKey};

/// Fixed period for the singleton stats stream.
pub const STATS_PERIOD: &str = "24h";

const DEBOUNCE_DURATION: Duration = Duration::from_secs(1);

/// Cache key for computed stream data.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
pub enum ComputedCacheKey {
    Stats,
    Timeseries { period: String, bucket: String },
    Subjects,
}

/// Update broadcast to WebSocket handlers.
#[derive(Clone, Debug)]
pub struct ComputedUpdate {
    pub key: ComputedCacheKey,
    pub delta: StreamDelta,
}

enum RegistrationMsg {
    Register(ComputedCacheKey),
    Deregister(ComputedCacheKey),
}

/// Cached entry with the last computed value.
#[derive(Default)]
struct CacheEntry {
    stats: Option<ScraperStats>,
    timeseries: Option<Vec<TimeseriesPoint>>,
    subjects: Option<Vec<SubjectSummary>>,
    subscribers: usize,
    stale: bool,
}

/// Manager for computed stream data.
///
/// Spawns a background task that watches domain events, debounces changes,
/// recomputes aggregated data, and broadcasts updates to subscribers.
#[derive(Clone)]
pub struct ComputedStreamManager {
    update_tx: broadcast::Sender<ComputedUpdate>,
    reg_tx: mpsc::UnboundedSender<RegistrationMsg>,
}

impl ComputedStreamManager {
    /// Create the manager and spawn its background task.
    pub fn new(events: Arc<EventBuffer>, pool: PgPool) -> Self {
        let (update_tx, _) = broadcast::channel(256);
        let (reg_tx, reg_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_manager_loop(events, pool, update_tx.clone(), reg_rx));

        Self { update_tx, reg_tx }
    }

    /// Subscribe to computed updates (WS handlers call this).
    pub fn subscribe(&self) -> broadcast::Receiver<ComputedUpdate> {
        self.update_tx.subscribe()
    }

    /// Register interest in a cache key.
    pub fn register(&self, key: ComputedCacheKey) {
        let _ = self.reg_tx.send(RegistrationMsg::Register(key));
    }

    /// Deregister interest.
    pub fn deregister(&self, key: ComputedCacheKey) {
        let _ = self.reg_tx.send(RegistrationMsg::Deregister(key));
    }
}

async fn run_manager_loop(
    events: Arc<EventBuffer>,
    pool: PgPool,
    update_tx: broadcast::Sender<ComputedUpdate>,
    mut reg_rx: mpsc::UnboundedReceiver<RegistrationMsg>,
) {
    let mut cache: HashMap<ComputedCacheKey, CacheEntry> = HashMap::new();
    let mut debounce_deadline: Option<Instant> = None;
    let (mut cursor, mut head_watch) = events.subscribe();

    loop {
        let sleep_future = async {
            match debounce_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            msg = reg_rx.recv() => {
                match msg {
                    Some(RegistrationMsg::Register(key)) => {
                        let entry = cache.entry(key).or_insert_with(|| CacheEntry {
                            stale: true, // compute on first interest
                            ..Default::default()
                        });
                        entry.subscribers += 1;
                        if entry.stale && debounce_deadline.is_none() {
                            debounce_deadline = Some(Instant::now());
                        }
                    }
                    Some(RegistrationMsg::Deregister(key)) => {
                        if let Some(entry) = cache.get_mut(&key) {
                            entry.subscribers = entry.subscribers.saturating_sub(1);
                            if entry.subscribers == 0 {
                                cache.remove(&key);
                            }
                        }
                    }
                    None => break,
                }
            }

            result = head_watch.changed() => {
                if result.is_err() {
                    break;
                }
                // Consume new events; any job lifecycle activity invalidates
                // every aggregate.
                let mut saw_job_event = false;
                while let Some(event) = events.read(cursor) {
                    if matches!(event, DomainEvent::ScrapeJob(_)) {
                        saw_job_event = true;
                    }
                    cursor += 1;
                }
                let base = events.base_offset();
                if cursor < base {
                    warn!(cursor, base, "computed stream manager lagged, resetting cursor");
                    cursor = base;
                    saw_job_event = true;
                }
                if saw_job_event {
                    for entry in cache.values_mut() {
                        entry.stale = true;
                    }
                }
                if cache.values().any(|e| e.stale && e.subscribers > 0) {
                    debounce_deadline = Some(Instant::now() + DEBOUNCE_DURATION);
                }
            }

            _ = sleep_future, if debounce_deadline.is_some() => {
                debounce_deadline = None;
                recompute_stale(&mut cache, &pool, &update_tx).await;
            }
        }
    }
}

async fn recompute_stale(
    cache: &mut HashMap<ComputedCacheKey, CacheEntry>,
    pool: &PgPool,
    update_tx: &broadcast::Sender<ComputedUpdate>,
) {
    for (key, entry) in cache.iter_mut() {
        if !entry.stale || entry.subscribers == 0 {
            continue;
        }
        entry.stale = false;

        match key {
            ComputedCacheKey::Stats => match compute_stats(pool, STATS_PERIOD).await {
                Ok(stats) => {
                    if entry.stats.as_ref() != Some(&stats) {
                        entry.stats = Some(stats.clone());
                        let _ = update_tx.send(ComputedUpdate {
                            key: key.clone(),
                            delta: StreamDelta::ScraperStats { stats },
                        });
                    }
                }
                Err(e) => warn!(error = ?e, "failed to recompute stats"),
            },
            ComputedCacheKey::Timeseries { period, bucket } => {
                match compute_timeseries(pool, period, bucket).await {
                    Ok(points) => {
                        if entry.timeseries.as_ref() != Some(&points) {
                            entry.timeseries = Some(points.clone());
                            let _ = update_tx.send(ComputedUpdate {
                                key: key.clone(),
                                delta: StreamDelta::ScraperTimeseries {
                                    points,
                                    period: period.clone(),
                                    bucket: bucket.clone(),
                                },
                            });
                        }
                    }
                    Err(e) => warn!(error = ?e, "failed to recompute timeseries"),
                }
            }
            ComputedCacheKey::Subjects => match compute_subjects(pool).await {
                Ok(subjects) => {
                    let delta = diff_subjects(entry.subjects.as_deref(), &subjects);
                    entry.subjects = Some(subjects);
                    if let Some(delta) = delta {
                        let _ = update_tx.send(ComputedUpdate {
                            key: key.clone(),
                            delta,
                        });
                    }
                }
                Err(e) => warn!(error = ?e, "failed to recompute subject summaries"),
            },
        }
    }
}

/// Compute the changed/removed delta between two subject summary sets.
/// Returns `None` when nothing moved.
fn diff_subjects(
    previous: Option<&[SubjectSummary]>,
    current: &[SubjectSummary],
) -> Option<StreamDelta> {
    let previous = previous?;

    let prev_map: HashMap<(&str, &str), &SubjectSummary> = previous
        .iter()
        .map(|s| ((s.subject.as_str(), s.term.as_str()), s))
        .collect();
    let curr_keys: std::collections::HashSet<(&str, &str)> = current
        .iter()
        .map(|s| (s.subject.as_str(), s.term.as_str()))
        .collect();

    let changed: Vec<SubjectSummary> = current
        .iter()
        .filter(|s| {
            prev_map
                .get(&(s.subject.as_str(), s.term.as_str()))
                .is_none_or(|prev| *prev != *s)
        })
        .cloned()
        .collect();

    let removed: Vec<SubjectKey> = previous
        .iter()
        .filter(|s| !curr_keys.contains(&(s.subject.as_str(), s.term.as_str())))
        .map(|s| SubjectKey {
            subject: s.subject.clone(),
            term: s.term.clone(),
        })
        .collect();

    if changed.is_empty() && removed.is_empty() {
        None
    } else {
        Some(StreamDelta::ScraperSubjects { changed, removed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(subject: &str, term: &str, count: i64) -> SubjectSummary {
        SubjectSummary {
            subject: subject.to_owned(),
            term: term.to_owned(),
            course_count: count,
            last_scraped_at: None,
            recent_scrapes: 0,
            recent_failures: 0,
            recent_courses_changed: 0,
        }
    }

    #[test]
    fn no_previous_means_no_delta() {
        assert!(diff_subjects(None, &[summary("CS", "202610", 10)]).is_none());
    }

    #[test]
    fn identical_sets_produce_no_delta() {
        let set = vec![summary("CS", "202610", 10)];
        assert!(diff_subjects(Some(&set), &set).is_none());
    }

    #[test]
    fn changed_entry_detected() {
        let old = vec![summary("CS", "202610", 10)];
        let new = vec![summary("CS", "202610", 11)];
        let Some(StreamDelta::ScraperSubjects { changed, removed }) =
            diff_subjects(Some(&old), &new)
        else {
            panic!("expected delta");
        };
        assert_eq!(changed.len(), 1);
        assert!(removed.is_empty());
    }

    #[test]
    fn removed_entry_detected() {
        let old = vec![summary("CS", "202610", 10), summary("MAT", "202610", 5)];
        let new = vec![summary("CS", "202610", 10)];
        let Some(StreamDelta::ScraperSubjects { changed, removed }) =
            diff_subjects(Some(&old), &new)
        else {
            panic!("expected delta");
        };
        assert!(changed.is_empty());
        assert_eq!(removed, vec![SubjectKey { subject: "MAT".into(), term: "202610".into() }]);
    }
}
