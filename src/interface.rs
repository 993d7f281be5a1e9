use std::{collections::BTreeMap, sync::Arc};

use event_listener::Event as StopEvent;
use log::{info, warn};
use zbus::{fdo, interface, object_server::SignalEmitter};

use crate::{
    app_context::{AppState, ChannelChange},
    applier::ApplyReport,
    color::Rgb,
    event::{Event, EventBus},
    providers::startup::publish,
};

/// `(id, backend, description, lighting channels, speed channels)`
pub type DeviceTuple = (String, String, String, Vec<String>, Vec<String>);

/// `(label, value, unit)`
pub type ReadingTuple = (String, String, String);

pub struct DBusInterface {
    state: Arc<AppState>,
    event_bus: EventBus,
    stop: Arc<StopEvent>,
    version: String,
}

impl DBusInterface {
    pub fn new(
        state: Arc<AppState>,
        event_bus: EventBus,
        stop: Arc<StopEvent>,
        version: String,
    ) -> Self {
        Self {
            state,
            event_bus,
            stop,
            version,
        }
    }

    async fn applied(&self, report: &ApplyReport) {
        publish(
            &self.event_bus,
            Event::ProfileApplied {
                name: self.state.active_profile().await,
                summary: report.summary(),
            },
        );
    }
}

fn failed(err: anyhow::Error) -> fdo::Error {
    fdo::Error::Failed(format!("{err:#}"))
}

/// Comma-separated `#rrggbb` list; empty means no color.
fn parse_colors(color: &str) -> fdo::Result<Option<Vec<Rgb>>> {
    if color.trim().is_empty() {
        return Ok(None);
    }
    color
        .split(',')
        .map(|c| c.trim().parse::<Rgb>())
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
        .map_err(|e| fdo::Error::InvalidArgs(e.to_string()))
}

#[interface(name = "io.github.coolctld1")]
impl DBusInterface {
    #[zbus(signal)]
    async fn stopped(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    async fn stop(
        &self,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> fdo::Result<()> {
        info!("Stop requested over D-Bus");
        emitter.stopped().await?;
        self.stop.notify(1);

        Ok(())
    }

    /// Runs discovery again. Returns the device count.
    async fn rescan(&self) -> fdo::Result<u32> {
        let count = self.state.rescan().await.map_err(failed)?;
        publish(&self.event_bus, Event::DevicesDiscovered(count));
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn devices(&self) -> Vec<DeviceTuple> {
        self.state
            .devices()
            .await
            .into_iter()
            .map(|d| {
                (
                    d.id,
                    d.backend,
                    d.description,
                    d.lighting_channels,
                    d.speed_channels,
                )
            })
            .collect()
    }

    /// Returns `(applied, suppressed, skipped, failed)`.
    async fn apply_profile(
        &self,
        name: &str,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> fdo::Result<(u32, u32, u32, u32)> {
        let report = self.state.apply_profile(name).await.map_err(failed)?;
        self.applied(&report).await;
        if let Err(e) = self.active_profile_changed(&emitter).await {
            warn!("Failed to signal ActiveProfile change: {e}");
        }

        let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        Ok((
            count(report.applied()),
            count(report.suppressed()),
            count(report.skipped()),
            count(report.failed()),
        ))
    }

    async fn save_profile(
        &self,
        name: &str,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> fdo::Result<()> {
        self.state.save_profile(name).await.map_err(failed)?;
        if let Err(e) = self.active_profile_changed(&emitter).await {
            warn!("Failed to signal ActiveProfile change: {e}");
        }
        Ok(())
    }

    async fn list_profiles(&self) -> fdo::Result<Vec<String>> {
        self.state.list_profiles().map_err(failed)
    }

    async fn delete_profile(&self, name: &str) -> fdo::Result<bool> {
        self.state.delete_profile(name).await.map_err(failed)
    }

    /// Changes one channel. Empty `mode`/`color` and a negative `speed`
    /// leave that part alone. Returns the outcome summary.
    async fn set_channel(
        &self,
        device: &str,
        channel: &str,
        mode: &str,
        color: &str,
        speed: i32,
    ) -> fdo::Result<String> {
        let change = ChannelChange {
            mode: Some(mode.trim())
                .filter(|m| !m.is_empty())
                .map(str::to_string),
            colors: parse_colors(color)?,
            speed: u8::try_from(speed.clamp(-1, 100)).ok(),
        };
        let report = self
            .state
            .set_channel(device, channel, change)
            .await
            .map_err(failed)?;
        self.applied(&report).await;

        let mut summary = report.summary();
        for (key, err) in report.failures() {
            summary.push_str(&format!("; {key}: {err}"));
        }
        Ok(summary)
    }

    /// Latest status readings per device id.
    async fn status(&self) -> BTreeMap<String, Vec<ReadingTuple>> {
        self.state
            .readings()
            .await
            .into_iter()
            .map(|(id, readings)| {
                let readings = readings
                    .into_iter()
                    .map(|r| (r.label, r.value, r.unit.to_string()))
                    .collect();
                (id, readings)
            })
            .collect()
    }

    /// `(name, priority, status)` per backend from the latest discovery.
    async fn backends(&self) -> Vec<(String, u8, String)> {
        self.state
            .backend_reports()
            .await
            .into_iter()
            .map(|r| (r.backend, r.priority, r.status.to_string()))
            .collect()
    }

    /// Re-reads the configuration file.
    async fn reload_config(&self) -> fdo::Result<()> {
        info!("Configuration reload requested over D-Bus");
        self.state.reload_config().await.map_err(failed)
    }

    #[zbus(property)]
    async fn version(&self) -> String {
        self.version.clone()
    }

    /// Empty when the applied state no longer matches a named profile.
    #[zbus(property)]
    async fn active_profile(&self) -> String {
        self.state.active_profile().await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{app_context::testing::fixture, device::testing::Op};
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_pending, assert_ready, task};

    fn interface(state: Arc<AppState>) -> DBusInterface {
        DBusInterface::new(state, EventBus::new(), Arc::new(StopEvent::new()), "9.9.9".into())
    }

    #[test]
    fn color_lists_parse() {
        assert_eq!(parse_colors("").unwrap(), None);
        assert_eq!(
            parse_colors("#ff0000, 00ff00").unwrap(),
            Some(vec![Rgb::new(255, 0, 0), Rgb::new(0, 255, 0)])
        );
        assert!(matches!(
            parse_colors("#ff00"),
            Err(fdo::Error::InvalidArgs(_))
        ));
    }

    #[tokio::test]
    async fn rescan_and_devices() {
        let fx = fixture();
        let iface = interface(fx.state.clone());

        assert_eq!(iface.rescan().await.unwrap(), 2);
        let devices = iface.devices().await;
        assert_eq!(
            devices[1],
            (
                "fan".to_string(),
                "static".to_string(),
                "fan".to_string(),
                vec![],
                vec!["pwm1".to_string()]
            )
        );
        assert_eq!(iface.version().await, "9.9.9");
        assert_eq!(iface.active_profile().await, "");
    }

    #[tokio::test]
    async fn set_channel_maps_arguments() {
        let fx = fixture();
        let iface = interface(fx.state.clone());
        iface.rescan().await.unwrap();

        let summary = iface
            .set_channel("fan", "pwm1", "", "", 250)
            .await
            .unwrap();
        assert!(summary.starts_with("1 applied"), "{summary}");
        assert_eq!(
            fx.fan.ops().last(),
            Some(&Op::Speed {
                channel: "pwm1".into(),
                percent: 100
            })
        );

        let summary = iface
            .set_channel("ring", "logo", "", "#0000ff", -1)
            .await
            .unwrap();
        assert!(summary.starts_with("1 applied"), "{summary}");

        assert!(iface.set_channel("ring", "logo", "", "blue", -1).await.is_err());
        assert_eq!(iface.list_profiles().await.unwrap(), Vec::<String>::new());
        assert!(!iface.delete_profile("none").await.unwrap());
    }

    #[tokio::test]
    async fn status_and_backends_reflect_the_latest_passes() {
        let fx = fixture();
        let iface = interface(fx.state.clone());
        assert!(iface.backends().await.is_empty());

        iface.rescan().await.unwrap();
        fx.state.refresh_status().await.unwrap();

        assert_eq!(
            iface.backends().await,
            vec![("static".to_string(), 10, "found 2".to_string())]
        );
        let status = iface.status().await;
        assert_eq!(
            status.get("fan"),
            Some(&vec![("ops".to_string(), "1".to_string(), String::new())])
        );
    }

    #[tokio::test]
    async fn set_channel_reports_failure_reasons() {
        let fx = fixture();
        let iface = interface(fx.state.clone());
        iface.rescan().await.unwrap();

        let summary = iface.set_channel("fan", "pwm9", "", "", 50).await.unwrap();
        assert!(summary.starts_with("0 applied"), "{summary}");
        assert!(summary.contains("; fan:pwm9: "), "{summary}");
    }

    #[test]
    fn stop_listener_wakes_on_notify() {
        let stop = StopEvent::new();
        let mut listener = task::spawn(stop.listen());
        assert_pending!(listener.poll());
        stop.notify(1);
        assert_ready!(listener.poll());
    }
}
