//! Application assembly: configuration, database pool, migrations, shared
//! state, and service registration.

use anyhow::Context;
use figment::{providers::Env, Figment};
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::banner::BannerApi;
use crate::cli::ServiceName;
use crate::config::Config;
use crate::scraper::{ScraperConfig, ScraperService};
use crate::services::manager::ServiceManager;
use crate::services::web::WebService;
use crate::state::AppState;
use crate::stream::StreamHub;

/// Main application struct containing all long-lived components.
pub struct App {
    config: Config,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Load configuration from the environment.
    pub fn load_config() -> Result<Config, anyhow::Error> {
        Figment::new()
            .merge(Env::raw())
            .extract()
            .context("failed to load config")
    }

    /// Create a new App instance with all components initialized.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(2 * 60))
            .max_lifetime(Duration::from_secs(30 * 60))
            .connect(&config.database_url)
            .await
            .context("failed to create database pool")?;

        info!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("failed to run database migrations")?;
        info!("database migrations completed");

        let banner_api = BannerApi::new_with_config(
            config.banner_base_url.clone(),
            &config.rate_limiting,
        )
        .context("failed to create BannerApi")?;

        let hub = StreamHub::new(db_pool.clone());
        let app_state = AppState::new(Arc::new(banner_api), db_pool, hub);

        // The cache may be empty on first run; the scheduler fills it.
        if let Err(e) = app_state.load_reference_cache().await {
            info!(error = ?e, "could not load reference cache on startup");
        }

        Ok(App {
            config,
            app_state,
            service_manager: ServiceManager::new(),
        })
    }

    /// Register the enabled services with the manager.
    pub fn setup_services(&mut self, services: &[ServiceName]) -> Result<(), anyhow::Error> {
        if services.contains(&ServiceName::Web) {
            let web_service = Box::new(WebService::new(self.config.port, self.app_state.clone()));
            self.service_manager
                .register_service(ServiceName::Web.as_str(), web_service);
        }

        if services.contains(&ServiceName::Scraper) {
            let scraper_service = Box::new(ScraperService::new(
                self.app_state.db.clone(),
                self.app_state.banner_api.clone(),
                self.app_state.reference_cache.clone(),
                self.app_state.service_statuses.clone(),
                ScraperConfig {
                    worker_count: self.config.worker_count,
                    seed_interval: self.config.seed_interval,
                    retry_backoff_base: self.config.retry_backoff_base,
                    retry_backoff_max: self.config.retry_backoff_max,
                    stale_lock_threshold: self.config.stale_lock_threshold,
                },
            ));
            self.service_manager
                .register_service(ServiceName::Scraper.as_str(), scraper_service);
        }

        if !self.service_manager.has_services() {
            error!("no services enabled, cannot start application");
            return Err(anyhow::anyhow!("no services enabled"));
        }

        Ok(())
    }

    /// Spawn all registered services.
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run until a service exits or a shutdown signal arrives.
    pub async fn run(self) -> ExitCode {
        crate::signals::handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout)
            .await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
