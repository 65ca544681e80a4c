//! Per-connection subscription registry.

use std::collections::{HashMap, HashSet};

use crate::stream::filters::{
    parse_audit_log_filter, parse_scrape_jobs_filter, parse_scraper_stats_filter,
    parse_scraper_subjects_filter, parse_scraper_timeseries_filter, AuditLogFilter,
    ScrapeJobsFilter, ScraperSubjectsFilter, ScraperTimeseriesFilter,
};
use crate::stream::protocol::{StreamError, StreamFilter, StreamKind};

/// One active subscription and its filter state.
pub enum Subscription {
    ScrapeJobs {
        filter: ScrapeJobsFilter,
        /// Job ids known to match the filter, so bare-id events (locked,
        /// retried, ...) can be routed without refetching every time.
        known_ids: HashSet<i32>,
    },
    AuditLog {
        filter: AuditLogFilter,
    },
    ScraperStats,
    ScraperTimeseries {
        filter: ScraperTimeseriesFilter,
    },
    ScraperSubjects {
        filter: ScraperSubjectsFilter,
    },
}

impl Subscription {
    pub fn kind(&self) -> StreamKind {
        match self {
            Subscription::ScrapeJobs { .. } => StreamKind::ScrapeJobs,
            Subscription::AuditLog { .. } => StreamKind::AuditLog,
            Subscription::ScraperStats => StreamKind::ScraperStats,
            Subscription::ScraperTimeseries { .. } => StreamKind::ScraperTimeseries,
            Subscription::ScraperSubjects { .. } => StreamKind::ScraperSubjects,
        }
    }

    /// Streams whose payloads come from the computed-stream manager rather
    /// than directly from domain events.
    pub fn is_computed(&self) -> bool {
        matches!(
            self,
            Self::ScraperStats | Self::ScraperTimeseries { .. } | Self::ScraperSubjects { .. }
        )
    }
}

/// Registry of one connection's subscriptions.
pub struct SubscriptionRegistry {
    subscriptions: HashMap<String, Subscription>,
    next_id: u64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn allocate_id(&mut self) -> String {
        let id = self.next_id.to_string();
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, id: String, subscription: Subscription) {
        self.subscriptions.insert(id, subscription);
    }

    pub fn remove(&mut self, id: &str) -> Option<Subscription> {
        self.subscriptions.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Subscription> {
        self.subscriptions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Subscription)> {
        self.subscriptions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Subscription)> {
        self.subscriptions.iter_mut()
    }

    pub fn ids_for_kind(&self, kind: StreamKind) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter_map(|(id, sub)| (sub.kind() == kind).then(|| id.clone()))
            .collect()
    }
}

/// Validate a filter against a stream kind and build the subscription.
pub fn build_subscription(
    kind: StreamKind,
    filter: Option<StreamFilter>,
) -> Result<Subscription, StreamError> {
    match kind {
        StreamKind::ScrapeJobs => {
            let filter = parse_scrape_jobs_filter(filter)?;
            Ok(Subscription::ScrapeJobs {
                filter,
                known_ids: HashSet::new(),
            })
        }
        StreamKind::AuditLog => {
            let filter = parse_audit_log_filter(filter)?;
            Ok(Subscription::AuditLog { filter })
        }
        StreamKind::ScraperStats => {
            parse_scraper_stats_filter(filter)?;
            Ok(Subscription::ScraperStats)
        }
        StreamKind::ScraperTimeseries => {
            let filter = parse_scraper_timeseries_filter(filter)?;
            Ok(Subscription::ScraperTimeseries { filter })
        }
        StreamKind::ScraperSubjects => {
            let filter = parse_scraper_subjects_filter(filter)?;
            Ok(Subscription::ScraperSubjects { filter })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_ids_are_unique() {
        let mut registry = SubscriptionRegistry::new();
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_for_kind_filters() {
        let mut registry = SubscriptionRegistry::new();
        let id1 = registry.allocate_id();
        registry.insert(
            id1.clone(),
            build_subscription(StreamKind::ScrapeJobs, None).unwrap(),
        );
        let id2 = registry.allocate_id();
        registry.insert(
            id2,
            build_subscription(StreamKind::AuditLog, None).unwrap(),
        );

        assert_eq!(registry.ids_for_kind(StreamKind::ScrapeJobs), vec![id1]);
    }

    #[test]
    fn computed_classification() {
        assert!(build_subscription(StreamKind::ScraperStats, None)
            .unwrap()
            .is_computed());
        assert!(!build_subscription(StreamKind::ScrapeJobs, None)
            .unwrap()
            .is_computed());
    }
}
