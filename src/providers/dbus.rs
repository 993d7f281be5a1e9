//! D-Bus service provider for dependency injection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use event_listener::Event as StopEvent;
use log::info;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zbus::Connection;

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    interface::DBusInterface,
    providers::{startup::publish, traits::ServiceProvider},
    task_manager::TaskManager,
};

/// Well-known bus name.
pub const BUS_NAME: &str = "io.github.coolctld";

/// Object path of the control interface.
pub const OBJECT_PATH: &str = "/io/github/coolctld";

/// D-Bus service provider for external control.
///
/// Exposes rescans, profile management and single-channel changes on the
/// session bus. A `Stop` call turns into a [`Event::SystemShutdown`] for the
/// coordinator.
///
/// # Priority and Criticality
///
/// - **Priority**: 8
/// - **Critical**: Yes
///
/// # Interface
///
/// - **Service Name**: `io.github.coolctld`
/// - **Object Path**: `/io/github/coolctld`
///
/// # Requirements
///
/// Requires a running D-Bus session bus. Creation fails without one, which
/// the coordinator treats as "no D-Bus service".
pub struct DBusServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    connection: Connection,
}

impl DBusServiceProvider {
    /// Creates a new D-Bus service provider with session bus connection.
    pub async fn new(state: Arc<AppState>, event_bus: EventBus) -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("Failed to connect to the session bus")?;
        Ok(Self {
            state,
            event_bus,
            connection,
        })
    }
}

#[async_trait]
impl ServiceProvider for DBusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let connection = self.connection.clone();

        task_manager.spawn_task(self.name(), |cancel_token| async move {
            run_dbus_service(state, event_bus, connection, cancel_token).await
        })
    }

    fn name(&self) -> &'static str {
        "DBusService"
    }

    fn priority(&self) -> i32 {
        8
    }

    fn is_critical(&self) -> bool {
        true
    }
}

/// Serves the interface until cancelled or until a client calls `Stop`.
async fn run_dbus_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    connection: Connection,
    cancel_token: CancellationToken,
) -> Result<()> {
    let stop = Arc::new(StopEvent::new());
    let interface = DBusInterface::new(
        state,
        event_bus.clone(),
        stop.clone(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    connection
        .object_server()
        .at(OBJECT_PATH, interface)
        .await
        .context("Failed to register D-Bus object")?;
    connection
        .request_name(BUS_NAME)
        .await
        .with_context(|| format!("Failed to acquire bus name {BUS_NAME}"))?;
    info!("Serving {BUS_NAME} at {OBJECT_PATH}");

    let stop_requested = stop.listen();
    tokio::select! {
        () = cancel_token.cancelled() => {
            info!("D-Bus service cancelled");
        }
        () = stop_requested => {
            publish(&event_bus, Event::SystemShutdown);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_context::testing::fixture;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn dbus_service_provider_creation() {
        let fx = fixture();

        // CI machines usually have no session bus.
        match DBusServiceProvider::new(fx.state.clone(), EventBus::new()).await {
            Ok(provider) => {
                assert_eq!(provider.name(), "DBusService");
                assert_eq!(provider.priority(), 8);
                assert!(provider.is_critical());
            }
            Err(e) => assert!(format!("{e:#}").contains("session bus")),
        }
    }
}
