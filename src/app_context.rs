//! Application state shared by the daemon services.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    applier::{ApplyReport, ProfileApplier},
    color::Rgb,
    config::{Config, ConfigManager},
    device::{DeviceRecord, StatusReading},
    profile::{AppliedState, ChannelKey, ChannelSetting, Profile, SpeedValue},
    registry::{BackendRegistry, BackendReport, BackendStatus},
    store::{ProfileStore, Stored},
};

/// Hardware-facing state. Every discovery, apply and status pass holds the
/// lock for its whole duration, so passes never overlap.
#[derive(Debug, Default)]
pub struct Session {
    /// Devices of the latest discovery pass.
    pub devices: Vec<DeviceRecord>,
    /// What the daemon last applied.
    pub snapshot: AppliedState,
    /// Name of the profile the snapshot came from, if it is unmodified.
    pub active_profile: Option<String>,
    /// Latest status readings per device id.
    pub readings: BTreeMap<String, Vec<StatusReading>>,
    /// Per-backend outcome of the latest discovery pass.
    pub backend_reports: Vec<BackendReport>,
    /// Settings of the last full apply aimed at devices that were not
    /// present. They stay part of the persisted state until replaced.
    pub absent: Profile,
    /// Applier for the currently configured mode classes.
    pub applier: ProfileApplier,
}

/// Short description of a discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub id: String,
    pub backend: String,
    pub description: String,
    pub lighting_channels: Vec<String>,
    pub speed_channels: Vec<String>,
}

impl From<&DeviceRecord> for DeviceSummary {
    fn from(device: &DeviceRecord) -> Self {
        Self {
            id: device.id.clone(),
            backend: device.backend.clone(),
            description: device.description.clone(),
            lighting_channels: device.lighting.keys().cloned().collect(),
            speed_channels: device.speed_channels.clone(),
        }
    }
}

/// One channel change requested from outside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelChange {
    pub mode: Option<String>,
    pub colors: Option<Vec<Rgb>>,
    pub speed: Option<u8>,
}

impl ChannelChange {
    fn into_setting(self) -> ChannelSetting {
        ChannelSetting {
            mode: self.mode,
            colors: self.colors,
            speed: self.speed.map(SpeedValue::from),
        }
    }
}

/// Shared application state containing all runtime data.
///
/// Owns the backend registry, the profile applier and store, and the
/// [`Session`]. Hardware calls run on the blocking pool while the session
/// lock is held.
pub struct AppState {
    config_manager: Arc<ConfigManager>,
    registry: Arc<BackendRegistry>,
    store: ProfileStore,
    session: Mutex<Session>,
}

impl AppState {
    /// Builds the state with the shipped backends enabled in the config.
    pub async fn new(config_manager: ConfigManager) -> Result<Self> {
        let config = config_manager.clone_config().await;
        let registry = BackendRegistry::with_defaults(&config.backends)
            .context("Failed to register backends")?;
        info!(
            "Registered backends: {}",
            registry
                .descriptors()
                .iter()
                .map(|d| format!("{} ({})", d.name, d.priority))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self::from_parts(config_manager, &config, registry))
    }

    /// Builds the state around an explicit registry.
    pub fn from_parts(
        config_manager: ConfigManager,
        config: &Config,
        registry: BackendRegistry,
    ) -> Self {
        Self {
            store: ProfileStore::new(&config.profiles_dir, &config.state_file),
            registry: Arc::new(registry),
            session: Mutex::new(Session {
                applier: ProfileApplier::new(config.classifier()),
                ..Session::default()
            }),
            config_manager: Arc::new(config_manager),
        }
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config_manager.get().await
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    /// Waits for the session.
    pub async fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().await
    }

    /// The session, unless another pass currently holds it.
    pub fn try_session(&self) -> Option<MutexGuard<'_, Session>> {
        self.session.try_lock().ok()
    }

    /// Runs discovery and replaces the device set. Devices are initialized
    /// when `auto_initialize_on_startup` is set. Returns the device count.
    pub async fn rescan(&self) -> Result<usize> {
        let initialize = self.config().await.auto_initialize_on_startup;
        let mut session = self.session().await;
        rescan_locked(&mut session, Arc::clone(&self.registry), initialize).await
    }

    /// Discovery followed by either the named profile or the saved current
    /// state.
    pub async fn startup(&self, profile: Option<&str>) -> Result<ApplyReport> {
        let count = self.rescan().await?;
        info!("Startup discovery found {count} device(s)");
        match profile {
            Some(name) => self.apply_profile(name).await,
            None => self.restore_current().await,
        }
    }

    /// Re-applies the persisted current state. Missing or corrupt state is
    /// an empty profile.
    pub async fn restore_current(&self) -> Result<ApplyReport> {
        let loaded = self.store.load_current();
        if loaded == Stored::Missing {
            info!("No saved state to restore");
        }
        let current = loaded.unwrap_or_default();

        let mut session = self.session().await;
        let report = self.apply_locked(&mut session, current.profile).await?;
        session.active_profile = current.profile_name;
        report.log_summary("saved state");
        Ok(report)
    }

    /// Loads and applies a named profile, replacing the snapshot, and makes
    /// it the current state.
    pub async fn apply_profile(&self, name: &str) -> Result<ApplyReport> {
        let profile = match self.store.load(name)? {
            Stored::Present(profile) => profile,
            Stored::Missing => anyhow::bail!("Profile '{name}' does not exist"),
            Stored::Corrupt(reason) => {
                warn!("Profile '{name}' is corrupt, applying it as empty: {reason}");
                Profile::new()
            }
        };

        let mut session = self.session().await;
        let report = self.apply_locked(&mut session, profile).await?;
        session.active_profile = Some(name.to_string());
        self.persist_current(&session)?;
        report.log_summary(&format!("profile '{name}'"));
        Ok(report)
    }

    /// Stores what is currently applied under `name`.
    pub async fn save_profile(&self, name: &str) -> Result<PathBuf> {
        let mut session = self.session().await;
        let path = self.store.save(name, &saved_state(&session))?;
        session.active_profile = Some(name.to_string());
        self.persist_current(&session)?;
        Ok(path)
    }

    pub fn list_profiles(&self) -> Result<Vec<String>> {
        self.store.list()
    }

    /// Deletes a named profile; the active name is forgotten if it matches.
    pub async fn delete_profile(&self, name: &str) -> Result<bool> {
        let deleted = self.store.delete(name)?;
        if deleted {
            let mut session = self.session().await;
            if session.active_profile.as_deref() == Some(name) {
                session.active_profile = None;
                self.persist_current(&session)?;
            }
        }
        Ok(deleted)
    }

    /// Applies a single channel change on top of the current state.
    pub async fn set_channel(
        &self,
        device: &str,
        channel: &str,
        change: ChannelChange,
    ) -> Result<ApplyReport> {
        let mut profile = Profile::new();
        profile.insert(ChannelKey::new(device, channel), change.into_setting());

        let mut session = self.session().await;
        let applier = session.applier.clone();
        let devices = session.devices.clone();
        let mut snapshot = session.snapshot.clone();
        let (report, snapshot) = blocking(move || {
            let report = applier.apply_update(&profile, &devices, &mut snapshot);
            (report, snapshot)
        })
        .await?;

        session.snapshot = snapshot;
        if report.applied() > 0 {
            session.active_profile = None;
        }
        self.persist_current(&session)?;
        debug!("Channel {device}:{channel}: {}", report.summary());
        Ok(report)
    }

    /// Reads status from every monitoring device. Returns `None` without
    /// touching hardware when another pass is in flight.
    pub async fn refresh_status(&self) -> Result<Option<usize>> {
        let Some(mut session) = self.try_session() else {
            return Ok(None);
        };

        let devices: Vec<DeviceRecord> = session
            .devices
            .iter()
            .filter(|d| d.supports_monitoring)
            .cloned()
            .collect();
        let readings = blocking(move || {
            devices
                .iter()
                .filter_map(|device| match device.handle().status() {
                    Ok(readings) => Some((device.id.clone(), readings)),
                    Err(e) => {
                        debug!("Status of {} unavailable: {e}", device.id);
                        None
                    }
                })
                .collect::<BTreeMap<_, _>>()
        })
        .await?;

        let count = readings.len();
        session.readings = readings;
        Ok(Some(count))
    }

    pub async fn devices(&self) -> Vec<DeviceSummary> {
        self.session()
            .await
            .devices
            .iter()
            .map(DeviceSummary::from)
            .collect()
    }

    pub async fn active_profile(&self) -> Option<String> {
        self.session().await.active_profile.clone()
    }

    /// Latest status readings per device id.
    pub async fn readings(&self) -> BTreeMap<String, Vec<StatusReading>> {
        self.session().await.readings.clone()
    }

    /// Per-backend outcome of the latest discovery pass.
    pub async fn backend_reports(&self) -> Vec<BackendReport> {
        self.session().await.backend_reports.clone()
    }

    /// Re-reads the config file. The log level and mode classes take effect
    /// at once; backend and path settings on the next start.
    pub async fn reload_config(&self) -> Result<()> {
        self.config_manager.reload().await?;
        let (level, classifier) = {
            let config = self.config().await;
            (config.log_filter(), config.classifier())
        };
        log::set_max_level(level);
        self.session().await.applier = ProfileApplier::new(classifier);
        info!("Log level {level}, mode classes reloaded");
        Ok(())
    }

    async fn apply_locked(&self, session: &mut Session, profile: Profile) -> Result<ApplyReport> {
        let applier = session.applier.clone();
        let devices = session.devices.clone();
        let (report, snapshot, absent) = blocking(move || {
            let absent: Profile = profile
                .iter()
                .filter(|(key, _)| !devices.iter().any(|d| d.id == key.device))
                .map(|(key, setting)| (key.clone(), setting.clone()))
                .collect();
            let mut snapshot = AppliedState::new();
            let report = applier.apply(&profile, &devices, &mut snapshot);
            (report, snapshot, absent)
        })
        .await?;

        if !absent.is_empty() {
            debug!("Keeping {} setting(s) for absent devices", absent.len());
        }
        session.snapshot = snapshot;
        session.absent = absent;
        Ok(report)
    }

    fn persist_current(&self, session: &Session) -> Result<()> {
        self.store
            .save_current(&saved_state(session), session.active_profile.as_deref())
    }
}

/// What gets written to disk: the settings kept for absent devices with the
/// applied snapshot on top, filtered for global-sync devices.
fn saved_state(session: &Session) -> Profile {
    let mut state = AppliedState::from_profile(session.absent.clone());
    state.merge(session.snapshot.clone());
    session.applier.filter_for_save(&state)
}

async fn rescan_locked(
    session: &mut Session,
    registry: Arc<BackendRegistry>,
    initialize: bool,
) -> Result<usize> {
    let discovery = blocking(move || {
        let discovery = registry.discover_with_report();
        if initialize {
            for device in &discovery.devices {
                if let Err(e) = device.handle().initialize() {
                    warn!("Failed to initialize {}: {e}", device.id);
                }
            }
        }
        discovery
    })
    .await?;

    for report in &discovery.reports {
        match &report.status {
            BackendStatus::Failed(e) => warn!("Backend {} failed: {e}", report.backend),
            status => debug!("Backend {}: {status:?}", report.backend),
        }
    }

    let count = discovery.devices.len();
    session.devices = discovery.devices;
    session.backend_reports = discovery.reports;
    session.readings.clear();
    Ok(count)
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("Hardware task panicked")
}

#[cfg(test)]
pub(crate) mod testing {
    //! Daemon state over in-memory devices and a temporary profile store.

    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::{
        backend::{Backend, CapabilityDescriptor, SysfsPaths},
        device::testing::RecordingDevice,
        error::ControlResult,
    };

    /// Backend that always finds the same devices.
    pub struct StaticBackend(pub Vec<DeviceRecord>);

    impl Backend for StaticBackend {
        fn capabilities(&self) -> CapabilityDescriptor {
            CapabilityDescriptor::new("static", 10).lighting().cooling()
        }

        fn is_available(&self) -> bool {
            true
        }

        fn discover(&self, _exclude: &SysfsPaths) -> ControlResult<Vec<DeviceRecord>> {
            Ok(self.0.clone())
        }
    }

    pub struct Fixture {
        pub dir: TempDir,
        pub state: Arc<AppState>,
        pub ring: Arc<RecordingDevice>,
        pub fan: Arc<RecordingDevice>,
    }

    /// `ring` has lighting channels `sync` and `logo`; `fan` has speed
    /// channel `pwm1` and reports monitoring.
    pub fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    pub fn fixture_with(adjust: impl FnOnce(&mut Config)) -> Fixture {
        let dir = TempDir::new().unwrap();
        let ring = RecordingDevice::new();
        let fan = RecordingDevice::new();
        let devices = vec![
            DeviceRecord::new("ring", "static", ring.clone())
                .with_lighting_channel("sync", ["spectrum-wave"])
                .with_lighting_channel("logo", Vec::<String>::new()),
            DeviceRecord::new("fan", "static", fan.clone())
                .with_speed_channel("pwm1")
                .with_monitoring(),
        ];
        let mut registry = BackendRegistry::new();
        registry.register(Box::new(StaticBackend(devices))).unwrap();

        let mut config = Config {
            profiles_dir: dir.path().join("profiles"),
            state_file: dir.path().join("current.json"),
            ..Config::default()
        };
        adjust(&mut config);
        let manager = ConfigManager::new(config.clone(), dir.path().join("config.yml"));
        let state = Arc::new(AppState::from_parts(manager, &config, registry));
        Fixture {
            dir,
            state,
            ring,
            fan,
        }
    }
}
