//! Backend registry and priority-ordered, deduplicating discovery.

use std::fmt;

use log::{debug, info, warn};

use crate::{
    backend::{Backend, CapabilityDescriptor, SysfsPaths, is_claimed},
    config::BackendsCfg,
    device::DeviceRecord,
    drivers::{hwmon::HwmonBackend, riing_quad::RiingQuadBackend},
    error::{ControlError, RegistryError},
};

/// What happened to one backend during a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    /// Availability check failed; the backend was not asked to discover.
    Unavailable,
    /// Discovery succeeded with this many accepted devices.
    Found(usize),
    /// Discovery failed; counted as zero devices.
    Failed(ControlError),
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => f.write_str("unavailable"),
            Self::Found(n) => write!(f, "found {n}"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Per-backend line of a [`Discovery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReport {
    pub backend: String,
    pub priority: u8,
    pub status: BackendStatus,
}

/// Result of one discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    pub devices: Vec<DeviceRecord>,
    pub reports: Vec<BackendReport>,
}

/// Owns the registered backends and the single discovery entry point.
///
/// Backends are registered explicitly at start-up. Discovery walks them from
/// highest to lowest priority and feeds each one the sysfs paths claimed so far,
/// so a physical device is never handed to two backends.
///
/// # Example
///
/// ```no_run
/// use coolctld::{config::Config, registry::BackendRegistry};
///
/// let registry = BackendRegistry::with_defaults(&Config::default().backends)?;
/// for device in registry.discover() {
///     println!("{} via {}", device.id, device.backend);
/// }
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the shipped backends that the configuration enables.
    pub fn with_defaults(cfg: &BackendsCfg) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        if cfg.riing_quad.enabled {
            registry.register(Box::new(RiingQuadBackend::new(&cfg.riing_quad)))?;
        }
        if cfg.hwmon.enabled {
            registry.register(Box::new(HwmonBackend::new(&cfg.hwmon)))?;
        }
        Ok(registry)
    }

    /// Adds a backend. Names must be unique.
    pub fn register(&mut self, backend: Box<dyn Backend>) -> Result<(), RegistryError> {
        let caps = backend.capabilities();
        if self
            .backends
            .iter()
            .any(|b| b.capabilities().name == caps.name)
        {
            return Err(RegistryError::DuplicateBackendName(caps.name));
        }
        debug!("Registered backend: {} (priority: {})", caps.name, caps.priority);
        self.backends.push(backend);
        Ok(())
    }

    /// Descriptors of all registered backends in discovery order.
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.ordered().map(|b| b.capabilities()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Discovers devices from every available backend, deduplicated by sysfs path.
    pub fn discover(&self) -> Vec<DeviceRecord> {
        self.discover_with_report().devices
    }

    /// Same as [`discover`](Self::discover), with a per-backend report.
    pub fn discover_with_report(&self) -> Discovery {
        let mut discovery = Discovery::default();
        let mut claimed = SysfsPaths::new();

        for backend in self.ordered() {
            let caps = backend.capabilities();
            let report = |status| BackendReport {
                backend: caps.name.clone(),
                priority: caps.priority,
                status,
            };

            if !backend.is_available() {
                debug!("Backend {} unavailable, skipping", caps.name);
                discovery.reports.push(report(BackendStatus::Unavailable));
                continue;
            }

            debug!("Discovering devices from backend: {}", caps.name);
            let found = match backend.discover(&claimed) {
                Ok(found) => found,
                Err(e) => {
                    warn!("Error discovering devices from backend {}: {e}", caps.name);
                    discovery.reports.push(report(BackendStatus::Failed(e)));
                    continue;
                }
            };

            let accepted: Vec<DeviceRecord> = found
                .into_iter()
                .filter(|device| match &device.sysfs_path {
                    Some(path) if is_claimed(path, &claimed) => {
                        warn!(
                            "Backend {} returned {} at claimed path {path}, dropping it",
                            caps.name, device.id
                        );
                        false
                    }
                    _ => true,
                })
                .collect();

            if accepted.is_empty() {
                debug!("Backend {} found no devices", caps.name);
            } else {
                info!("Backend {} found {} device(s)", caps.name, accepted.len());
            }

            let paths = backend.sysfs_paths_for(&accepted);
            if !paths.is_empty() {
                debug!("Backend {} claims {} sysfs paths", caps.name, paths.len());
            }
            claimed.extend(paths.into_iter().filter(|p| !p.is_empty()));

            discovery
                .reports
                .push(report(BackendStatus::Found(accepted.len())));
            discovery.devices.extend(accepted);
        }

        discovery
    }

    /// Backends by descending priority; `sort_by_key` is stable, so ties keep
    /// registration order.
    fn ordered(&self) -> impl Iterator<Item = &dyn Backend> {
        let mut ordered: Vec<&dyn Backend> = self.backends.iter().map(|b| &**b).collect();
        ordered.sort_by_key(|b| std::cmp::Reverse(b.capabilities().priority));
        ordered.into_iter()
    }
}
