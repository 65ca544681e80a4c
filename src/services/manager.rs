use std::collections::HashMap;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::services::{run_service, Service, ServiceResult};

/// Manages multiple services and their lifecycle
pub struct ServiceManager {
    registered_services: HashMap<String, Box<dyn Service>>,
    running_services: HashMap<String, JoinHandle<ServiceResult>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registered_services: HashMap::new(),
            running_services: HashMap::new(),
            shutdown_tx,
        }
    }

    /// Register a service to be managed (not yet spawned)
    pub fn register_service(&mut self, name: &str, service: Box<dyn Service>) {
        self.registered_services.insert(name.to_string(), service);
    }

    /// Whether any services have been registered.
    pub fn has_services(&self) -> bool {
        !self.registered_services.is_empty() || !self.running_services.is_empty()
    }

    /// Spawn all registered services
    pub fn spawn_all(&mut self) {
        let service_count = self.registered_services.len();
        let service_names: Vec<_> = self.registered_services.keys().cloned().collect();

        for (name, service) in self.registered_services.drain() {
            let shutdown_rx = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(run_service(service, shutdown_rx));
            self.running_services.insert(name, handle);
        }

        info!(service_count, services = ?service_names, "spawned services");
    }

    /// Run all services until one completes or fails.
    /// Returns the first service that completes and its result.
    pub async fn run(&mut self) -> (String, ServiceResult) {
        if self.running_services.is_empty() {
            return (
                "none".to_string(),
                ServiceResult::Error(anyhow::anyhow!("no services to run")),
            );
        }

        // Await whichever service task finishes first. The others keep
        // running; their handles stay in the map for shutdown().
        let (name, join_result) = {
            let waiters: Vec<_> = self
                .running_services
                .iter_mut()
                .map(|(name, handle)| {
                    let name = name.clone();
                    Box::pin(async move { (name, handle.await) })
                })
                .collect();

            let ((name, join_result), _index, _rest) = select_all(waiters).await;
            (name, join_result)
        };

        self.running_services.remove(&name);

        match join_result {
            Ok(result) => (name, result),
            Err(e) => {
                error!(service = name, "service task panicked: {e}");
                (
                    name,
                    ServiceResult::Error(anyhow::anyhow!("task panic: {e}")),
                )
            }
        }
    }

    /// Shutdown all services gracefully with a timeout.
    ///
    /// Returns the elapsed duration on success, or the names of services that
    /// failed to drain within the window.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<Duration, Vec<String>> {
        let service_count = self.running_services.len();
        let service_names: Vec<_> = self.running_services.keys().cloned().collect();

        info!(
            service_count,
            services = ?service_names,
            timeout = format!("{timeout:.2?}"),
            "shutting down services"
        );

        let _ = self.shutdown_tx.send(());

        let start_time = std::time::Instant::now();
        let mut pending_services = Vec::new();

        for (name, handle) in self.running_services.drain() {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(_)) => {
                    debug!(service = name, "service shutdown completed");
                }
                Ok(Err(e)) => {
                    warn!(service = name, error = ?e, "service shutdown failed");
                    pending_services.push(name);
                }
                Err(_) => {
                    warn!(service = name, "service shutdown timed out");
                    pending_services.push(name);
                }
            }
        }

        let elapsed = start_time.elapsed();
        if pending_services.is_empty() {
            info!(
                service_count,
                elapsed = format!("{elapsed:.2?}"),
                "services shutdown completed"
            );
            Ok(elapsed)
        } else {
            warn!(
                pending_count = pending_services.len(),
                pending_services = ?pending_services,
                elapsed = format!("{elapsed:.2?}"),
                "services shutdown completed with pending services"
            );
            Err(pending_services)
        }
    }
}
