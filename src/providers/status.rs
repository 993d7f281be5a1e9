use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    providers::{startup::publish, traits::ServiceProvider},
    task_manager::TaskManager,
};

/// Recurring status refresh.
///
/// Every `status_interval_seconds` reads telemetry from all monitoring
/// devices. A tick that finds another pass holding the session is skipped,
/// never queued.
///
/// # Priority and Criticality
///
/// - **Priority**: 5
/// - **Critical**: No
pub struct StatusServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl StatusServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for StatusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();

        task_manager.spawn_task(self.name(), |cancel_token| async move {
            run_status_service(state, event_bus, cancel_token).await
        })
    }

    fn name(&self) -> &'static str {
        "StatusService"
    }

    fn priority(&self) -> i32 {
        5
    }
}

async fn run_status_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let period = state.config().await.status_interval();
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Status service cancelled");
                break;
            }
            _instant = interval.tick() => {
                match state.refresh_status().await {
                    Ok(Some(count)) => publish(&event_bus, Event::StatusRefreshed(count)),
                    Ok(None) => debug!("Previous pass still running, skipping status tick"),
                    Err(e) => log::error!("Failed to refresh status: {e:#}"),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_context::testing::fixture;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn refreshes_on_each_interval() {
        let fx = fixture();
        fx.state.rescan().await.unwrap();

        let event_bus = EventBus::new();
        let mut rx = event_bus.subscribe();
        let mut manager = TaskManager::new();
        StatusServiceProvider::new(fx.state.clone(), event_bus)
            .start(&mut manager)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(rx.recv().await.unwrap(), Event::StatusRefreshed(1));
        assert!(fx.state.session().await.readings.contains_key("fan"));

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn busy_session_skips_the_tick() {
        let fx = fixture();
        fx.state.rescan().await.unwrap();

        let event_bus = EventBus::new();
        let mut rx = event_bus.subscribe();
        let mut manager = TaskManager::new();
        StatusServiceProvider::new(fx.state.clone(), event_bus)
            .start(&mut manager)
            .await
            .unwrap();

        let guard = fx.state.session().await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(rx.try_recv().is_err());
        drop(guard);

        manager.shutdown_all().await.unwrap();
    }
}
