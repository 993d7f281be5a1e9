//! Backend abstraction: one pluggable hardware-control subsystem.

use std::collections::BTreeSet;

use crate::{device::DeviceRecord, error::ControlResult};

/// Set of canonical sysfs paths already claimed by higher-priority backends.
pub type SysfsPaths = BTreeSet<String>;

/// Immutable metadata a backend publishes about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    /// Unique backend name, e.g. `"hwmon"`.
    pub name: String,

    /// Discovery priority in 0..=100; higher is queried first.
    pub priority: u8,

    pub supports_cooling: bool,
    pub supports_lighting: bool,
    pub supports_monitoring: bool,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, priority: u8) -> Self {
        Self {
            name: name.into(),
            priority: priority.min(100),
            supports_cooling: false,
            supports_lighting: false,
            supports_monitoring: false,
        }
    }

    pub fn cooling(mut self) -> Self {
        self.supports_cooling = true;
        self
    }

    pub fn lighting(mut self) -> Self {
        self.supports_lighting = true;
        self
    }

    pub fn monitoring(mut self) -> Self {
        self.supports_monitoring = true;
        self
    }
}

/// A hardware-control subsystem that can discover and drive one class of
/// devices.
///
/// Each discovery call is independent: implementations keep no mutable state
/// between calls and decide only from their input and the hardware.
#[cfg_attr(test, mockall::automock)]
pub trait Backend: Send + Sync {
    /// Returns the backend's metadata. Must be deterministic.
    fn capabilities(&self) -> CapabilityDescriptor;

    /// Checks runtime preconditions such as library or driver presence.
    /// Never fails; any problem reads as unavailable.
    fn is_available(&self) -> bool;

    /// Enumerates reachable devices, leaving out every device whose sysfs path
    /// is in `exclude`. Missing hardware yields an empty list, not an error.
    fn discover(&self, exclude: &SysfsPaths) -> ControlResult<Vec<DeviceRecord>>;

    /// Canonical sysfs paths of `devices`, best effort. Devices without a
    /// resolvable path contribute nothing and so opt out of deduplication.
    fn sysfs_paths_for(&self, devices: &[DeviceRecord]) -> SysfsPaths {
        devices
            .iter()
            .filter_map(|device| device.sysfs_path.clone())
            .filter(|path| !path.is_empty())
            .collect()
    }
}

/// Whether two sysfs paths name the same node or one lies below the other.
///
/// A hwmon chip sits underneath the USB or PCI device that exposes it, so a
/// claim on either end covers the pair.
pub fn sysfs_overlaps(a: &str, b: &str) -> bool {
    let (a, b) = (std::path::Path::new(a), std::path::Path::new(b));
    a.starts_with(b) || b.starts_with(a)
}

/// Whether `path` overlaps any entry of `claimed`.
pub fn is_claimed(path: &str, claimed: &SysfsPaths) -> bool {
    claimed.iter().any(|c| sysfs_overlaps(path, c))
}
