//! Scrape scheduling and execution.

pub mod adaptive;
pub mod jobs;
pub mod retry;
pub mod scheduler;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::banner::BannerApi;
use crate::data::DbContext;
use crate::state::ReferenceCache;
use crate::status::{ServiceStatus, ServiceStatusRegistry};

use self::retry::RetryPolicy;
use self::scheduler::Scheduler;
use self::worker::Worker;

/// Tunables handed to the scraper service from config.
#[derive(Debug, Clone, Copy)]
pub struct ScraperConfig {
    pub worker_count: usize,
    pub seed_interval: Duration,
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
    pub stale_lock_threshold: Duration,
}

/// Service owning the scheduler and worker pool lifecycle.
pub struct ScraperService {
    db: DbContext,
    banner_api: Arc<BannerApi>,
    reference_cache: Arc<RwLock<ReferenceCache>>,
    service_statuses: ServiceStatusRegistry,
    config: ScraperConfig,
    scheduler_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl ScraperService {
    pub fn new(
        db: DbContext,
        banner_api: Arc<BannerApi>,
        reference_cache: Arc<RwLock<ReferenceCache>>,
        service_statuses: ServiceStatusRegistry,
        config: ScraperConfig,
    ) -> Self {
        Self {
            db,
            banner_api,
            reference_cache,
            service_statuses,
            config,
            scheduler_handle: None,
            worker_handles: Vec::new(),
            shutdown_tx: None,
        }
    }

    /// Starts the scheduler and the worker pool.
    ///
    /// Recovers jobs left locked by a previous unclean shutdown, then warms
    /// the Banner session. Session setup failure is only a warning: scraping
    /// stalls until cookies can be obtained, the process keeps running.
    pub async fn start(&mut self) {
        match self.db.scrape_jobs().force_unlock_all().await {
            Ok(0) => {}
            Ok(count) => warn!(count, "force-unlocked stale jobs from previous run"),
            Err(e) => warn!(error = ?e, "failed to force-unlock stale jobs"),
        }

        if let Err(e) = self.banner_api.setup().await {
            warn!(error = %e, "Banner session setup failed; scraping stalls until cookies arrive");
        }

        info!("scraper service starting");

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let scheduler = Scheduler::new(
            self.db.clone(),
            self.banner_api.clone(),
            self.reference_cache.clone(),
            self.config.seed_interval,
            self.config.stale_lock_threshold,
        );
        let shutdown_rx = shutdown_tx.subscribe();
        self.scheduler_handle = Some(tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        }));

        let policy = RetryPolicy::new(
            self.config.retry_backoff_base,
            self.config.retry_backoff_max,
        );
        for i in 0..self.config.worker_count {
            let worker = Worker::new(i, self.db.clone(), self.banner_api.clone(), policy);
            let shutdown_rx = shutdown_tx.subscribe();
            self.worker_handles.push(tokio::spawn(async move {
                worker.run(shutdown_rx).await;
            }));
        }
        info!(
            worker_count = self.worker_handles.len(),
            "spawned worker tasks"
        );
        self.service_statuses.set("scraper", ServiceStatus::Active);
    }
}

#[async_trait::async_trait]
impl crate::services::Service for ScraperService {
    fn name(&self) -> &'static str {
        "scraper"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.start().await;
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses
            .set("scraper", ServiceStatus::Disabled);
        info!("shutting down scraper service");

        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            warn!("no shutdown channel found for scraper service");
            return Err(anyhow::anyhow!("no shutdown channel available"));
        };
        let _ = shutdown_tx.send(());

        let mut all_handles = Vec::new();
        if let Some(handle) = self.scheduler_handle.take() {
            all_handles.push(handle);
        }
        all_handles.append(&mut self.worker_handles);

        // Wait for every task; the ServiceManager enforces the drain window.
        let results = futures::future::join_all(all_handles).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed_count = failed, "some scraper tasks panicked during shutdown");
            return Err(anyhow::anyhow!("{failed} task(s) panicked"));
        }

        info!("all scraper tasks shut down gracefully");
        Ok(())
    }
}
