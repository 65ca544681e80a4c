//! Application state shared across services.
//!
//! All shared resources live in this value; there is no package-level mutable
//! state anywhere in the crate.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::banner::BannerApi;
use crate::data::reference::ReferenceData;
use crate::data::DbContext;
use crate::status::ServiceStatusRegistry;
use crate::stream::StreamHub;

/// In-memory cache of reference data (`category → code → description`).
#[derive(Debug, Default)]
pub struct ReferenceCache {
    by_category: HashMap<String, HashMap<String, String>>,
}

impl ReferenceCache {
    pub fn from_entries(entries: Vec<ReferenceData>) -> Self {
        let mut by_category: HashMap<String, HashMap<String, String>> = HashMap::new();
        for entry in entries {
            by_category
                .entry(entry.category)
                .or_default()
                .insert(entry.code, entry.description);
        }
        Self { by_category }
    }

    pub fn description(&self, category: &str, code: &str) -> Option<&str> {
        self.by_category
            .get(category)
            .and_then(|codes| codes.get(code))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_category.is_empty()
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: DbContext,
    pub db_pool: PgPool,
    pub banner_api: Arc<BannerApi>,
    pub reference_cache: Arc<RwLock<ReferenceCache>>,
    pub service_statuses: ServiceStatusRegistry,
    pub hub: StreamHub,
}

impl AppState {
    pub fn new(banner_api: Arc<BannerApi>, db_pool: PgPool, hub: StreamHub) -> Self {
        let db = DbContext::new(db_pool.clone(), hub.events().clone());
        Self {
            db,
            db_pool,
            banner_api,
            reference_cache: Arc::new(RwLock::new(ReferenceCache::default())),
            service_statuses: ServiceStatusRegistry::new(),
            hub,
        }
    }

    /// Load the reference cache from the database (may be empty on first run).
    pub async fn load_reference_cache(&self) -> crate::error::Result<()> {
        let entries = crate::data::reference::get_all(&self.db_pool).await?;
        *self.reference_cache.write().await = ReferenceCache::from_entries(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_cache_lookup() {
        let cache = ReferenceCache::from_entries(vec![
            ReferenceData {
                category: "subject".into(),
                code: "CS".into(),
                description: "Computer Science".into(),
            },
            ReferenceData {
                category: "campus".into(),
                code: "11".into(),
                description: "Main Campus".into(),
            },
        ]);

        assert_eq!(cache.description("subject", "CS"), Some("Computer Science"));
        assert_eq!(cache.description("subject", "11"), None);
        assert_eq!(cache.description("campus", "11"), Some("Main Campus"));
        assert!(!cache.is_empty());
    }
}
