use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// One-shot delayed discovery followed by the automatic apply.
///
/// Waits `startup_delay_ms` so USB controllers can settle after boot or
/// resume, runs discovery, then applies either the profile requested on the
/// command line or (with `auto_apply_on_startup`) the saved current state.
///
/// # Priority and Criticality
///
/// - **Priority**: 9
/// - **Critical**: No (the D-Bus surface can still rescan and apply)
pub struct StartupServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    profile: Option<String>,
}

impl StartupServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus, profile: Option<String>) -> Self {
        Self {
            state,
            event_bus,
            profile,
        }
    }
}

#[async_trait]
impl ServiceProvider for StartupServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let profile = self.profile.clone();

        task_manager.spawn_task(self.name(), |cancel_token| async move {
            run_startup(state, event_bus, profile, cancel_token).await
        })
    }

    fn name(&self) -> &'static str {
        "StartupService"
    }

    fn priority(&self) -> i32 {
        9
    }
}

async fn run_startup(
    state: Arc<AppState>,
    event_bus: EventBus,
    profile: Option<String>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let (delay, auto_apply) = {
        let config = state.config().await;
        (config.startup_delay(), config.auto_apply_on_startup)
    };

    tokio::select! {
        () = cancel_token.cancelled() => {
            info!("Startup cancelled before discovery");
            return Ok(());
        }
        () = tokio::time::sleep(delay) => {}
    }

    let count = state.rescan().await?;
    info!("Discovered {count} device(s)");
    publish(&event_bus, Event::DevicesDiscovered(count));

    let report = match profile.as_deref() {
        Some(name) => state.apply_profile(name).await?,
        None if auto_apply => state.restore_current().await?,
        None => {
            info!("Automatic apply disabled, leaving devices untouched");
            return Ok(());
        }
    };

    if report.failed() > 0 {
        warn!("Startup apply finished with failures: {}", report.summary());
    }
    publish(
        &event_bus,
        Event::ProfileApplied {
            name: state.active_profile().await,
            summary: report.summary(),
        },
    );
    Ok(())
}

pub(crate) fn publish(event_bus: &EventBus, event: Event) {
    if let Err(e) = event_bus.publish(event) {
        debug!("Event not delivered: {e}");
    }
}
