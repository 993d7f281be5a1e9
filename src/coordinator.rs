//! System coordinator for managing service lifecycle and dependency injection.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;

use crate::{
    app_context::AppState,
    config::ConfigManager,
    event::{Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, DBusServiceProvider, ServiceProvider,
        StartupServiceProvider, StatusServiceProvider,
    },
    task_manager::TaskManager,
};

/// Owns the services of the daemon and runs the main event loop.
///
/// # Features
/// - Service prioritization (critical vs non-critical)
/// - Graceful degradation on service failures
/// - Shutdown on Ctrl+C or on a `SystemShutdown` event
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Builds the shared state and registers the services. `profile` names a
    /// profile to apply at startup instead of the saved state.
    pub async fn initialize(
        &mut self,
        config_manager: ConfigManager,
        profile: Option<String>,
    ) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let state = AppStateProvider::new(config_manager)
            .provide()
            .await
            .context("Failed to initialize application state")?;
        self.shared_state = Some(state.clone());

        self.register_service_providers(state, profile).await;

        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    async fn register_service_providers(&mut self, state: Arc<AppState>, profile: Option<String>) {
        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(StartupServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
                profile,
            )),
            Box::new(StatusServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
        ];

        match DBusServiceProvider::new(state, self.event_bus.clone()).await {
            Ok(provider) => providers.push(Box::new(provider)),
            Err(e) => warn!("D-Bus unavailable ({e:#}), running without a control interface"),
        }

        providers.sort_by_key(|b| std::cmp::Reverse(b.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        for provider in &self.service_providers {
            match provider.start(&mut self.task_manager).await {
                Ok(()) => info!(
                    "Service '{}' started (priority: {}, critical: {})",
                    provider.name(),
                    provider.priority(),
                    provider.is_critical()
                ),
                Err(e) if provider.is_critical() => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => warn!(
                    "Non-critical service '{}' failed to start: {e}",
                    provider.name()
                ),
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Runs until Ctrl+C or a `SystemShutdown` event, then shuts down.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for shutdown signal")?;
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    break;
                }

                event = event_rx.recv() => {
                    if !self.handle_event(event)? {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Main event loop terminated");
        Ok(())
    }

    /// Returns `false` once the loop should stop.
    fn handle_event(&self, event: Result<Event, RecvError>) -> Result<bool> {
        match event {
            Ok(Event::SystemShutdown) => {
                info!("Shutdown requested");
                return Ok(false);
            }
            Ok(Event::DevicesDiscovered(count)) => info!("{count} device(s) available"),
            Ok(Event::ProfileApplied { name, summary }) => match name {
                Some(name) => info!("Profile '{name}' applied: {summary}"),
                None => info!("State applied: {summary}"),
            },
            Ok(Event::StatusRefreshed(count)) => debug!("Status read from {count} device(s)"),
            Err(RecvError::Closed) => bail!("Event bus channel closed unexpectedly"),
            Err(RecvError::Lagged(n)) => warn!("Event bus lagged by {n} messages"),
        }
        Ok(true)
    }

    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            log::error!("Error during task shutdown: {e:#}");
        }

        info!("Shutdown complete");
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn state(&self) -> Option<&Arc<AppState>> {
        self.shared_state.as_ref()
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn offline_config(dir: &TempDir) -> ConfigManager {
        let mut config = Config {
            profiles_dir: dir.path().join("profiles"),
            state_file: dir.path().join("current.json"),
            startup_delay_ms: 0,
            ..Config::default()
        };
        config.backends.riing_quad.enabled = false;
        config.backends.hwmon.root = dir.path().join("hwmon");
        ConfigManager::new(config, dir.path().join("config.yml"))
    }

    #[tokio::test]
    async fn registers_scheduling_services() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = SystemCoordinator::new();
        coordinator
            .initialize(offline_config(&dir), None)
            .await
            .unwrap();

        let services = coordinator.running_services();
        assert_eq!(services[0], "StartupService");
        assert!(services.contains(&"StatusService"));
        assert!(coordinator.state().is_some());
    }

    #[tokio::test]
    async fn shutdown_event_ends_the_loop() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = SystemCoordinator::new();
        coordinator
            .initialize(offline_config(&dir), None)
            .await
            .unwrap();
        coordinator.start_all_services().await.unwrap();

        let bus = coordinator.event_bus().clone();
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            bus.publish(Event::SystemShutdown).unwrap();
        });

        timeout(Duration::from_secs(5), coordinator.run_main_loop())
            .await
            .unwrap()
            .unwrap();
        trigger.await.unwrap();
    }
}
