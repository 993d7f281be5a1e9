//! Application state provider for dependency injection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::{app_context::AppState, config::ConfigManager, providers::traits::AsyncProvider};

/// Builds the shared [`AppState`]: registers the configured backends and
/// opens the profile store. Hardware is not touched until the startup
/// service runs discovery.
pub struct AppStateProvider {
    config_manager: ConfigManager,
}

impl AppStateProvider {
    pub const fn new(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }
}

#[async_trait]
impl AsyncProvider<Arc<AppState>> for AppStateProvider {
    async fn provide(&self) -> Result<Arc<AppState>> {
        let app_state = AppState::new(self.config_manager.clone())
            .await
            .context("Failed to build application state")?;
        Ok(Arc::new(app_state))
    }
}
