//! Thermaltake Riing Quad controllers over HID.
//!
//! Each controller drives five fan ports with independent speed and an
//! addressable LED ring per fan. Lighting channels are `fan1`..`fan5` plus
//! `sync`, which writes every port at once.

mod controller;
mod device_io;
pub mod protocol;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use hidapi::{DeviceInfo, HidApi};
use log::{debug, info, warn};

use crate::{
    backend::{Backend, CapabilityDescriptor, SysfsPaths, is_claimed},
    color::Rgb,
    config::{RiingQuadCfg, UsbId},
    device::{DeviceControl, DeviceRecord, SYNC_CHANNEL, StatusReading},
    error::{ControlError, ControlResult},
};

use self::{
    controller::Controller,
    device_io::DeviceIO,
    protocol::{EFFECTS, Effect, SYNC_EFFECTS, fill_port},
};

pub const BACKEND_NAME: &str = "riing-quad";

/// Thermaltake Vendor ID for HID devices.
pub const VID: u16 = 0x264A;

pub const PORTS: u8 = 5;

/// Colors a port shows under a color mode before any color was written.
const DEFAULT_COLOR: Rgb = Rgb::new(255, 255, 255);

/// Discovery and control for Riing Quad controllers.
///
/// # Example
///
/// ```no_run
/// use coolctld::backend::{Backend, SysfsPaths};
/// use coolctld::config::RiingQuadCfg;
/// use coolctld::drivers::riing_quad::RiingQuadBackend;
///
/// let backend = RiingQuadBackend::new(&RiingQuadCfg::default());
/// if backend.is_available() {
///     for device in backend.discover(&SysfsPaths::new())? {
///         device.handle().initialize()?;
///         device.handle().set_speed("fan1", 40)?;
///     }
/// }
/// # Ok::<(), coolctld::error::ControlError>(())
/// ```
#[derive(Debug, Clone)]
pub struct RiingQuadBackend {
    enabled: bool,
    ids: Vec<UsbId>,
    sys_root: PathBuf,
}

impl RiingQuadBackend {
    pub fn new(cfg: &RiingQuadCfg) -> Self {
        Self {
            enabled: cfg.enabled,
            ids: cfg.devices.clone(),
            sys_root: PathBuf::from("/sys"),
        }
    }

    fn matches(&self, info: &DeviceInfo) -> bool {
        self.ids
            .iter()
            .any(|id| id.vid == info.vendor_id() && id.pid == info.product_id())
    }
}

impl Backend for RiingQuadBackend {
    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new(BACKEND_NAME, 90)
            .lighting()
            .cooling()
            .monitoring()
    }

    fn is_available(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match HidApi::new() {
            Ok(_) => true,
            Err(e) => {
                debug!("HID API unavailable: {e}");
                false
            }
        }
    }

    fn discover(&self, exclude: &SysfsPaths) -> ControlResult<Vec<DeviceRecord>> {
        let api = HidApi::new()
            .map_err(|e| ControlError::BackendUnavailable(format!("HID API: {e}")))?;

        let mut records = Vec::new();
        let matching = api.device_list().filter(|d| self.matches(d));
        for (idx, info) in matching.enumerate() {
            let hid_path = info.path().to_string_lossy().into_owned();
            let sysfs_path = resolve_sysfs_path(&self.sys_root, &hid_path);
            if let Some(path) = sysfs_path.as_deref().filter(|p| is_claimed(p, exclude)) {
                debug!("Skipping {hid_path}: {path} is already claimed");
                continue;
            }

            let device = match info.open_device(&api) {
                Ok(device) => device,
                Err(e) => {
                    warn!("Cannot open Riing Quad at {hid_path}: {e}");
                    continue;
                }
            };
            info!(
                "{:?} device PID={:04X} at {hid_path}",
                info.product_string(),
                info.product_id()
            );

            let id = device_id(info.serial_number(), idx);
            let description = info
                .product_string()
                .filter(|s| !s.is_empty())
                .unwrap_or("Thermaltake Riing Quad")
                .to_string();
            let mut record = describe(
                DeviceRecord::new(id, BACKEND_NAME, Arc::new(RiingQuad::new(device)))
                    .with_description(description),
            );
            if let Some(path) = sysfs_path {
                record = record.with_sysfs_path(path);
            }
            records.push(record);
        }
        Ok(records)
    }
}

/// `riing-quad:<serial>`, or the 1-based position when there is no serial.
fn device_id(serial: Option<&str>, idx: usize) -> String {
    match serial.map(str::trim).filter(|s| !s.is_empty()) {
        Some(serial) => format!("{BACKEND_NAME}:{serial}"),
        None => format!("{BACKEND_NAME}:{}", idx + 1),
    }
}

/// Adds the channel layout every Riing Quad shares.
fn describe(record: DeviceRecord) -> DeviceRecord {
    let port_modes = || EFFECTS.iter().map(|(name, _)| *name);
    let sync_modes = port_modes().chain(SYNC_EFFECTS.iter().map(|(name, _)| *name));

    let mut record = record
        .with_lighting_channel(SYNC_CHANNEL, sync_modes)
        .with_monitoring();
    for port in 1..=PORTS {
        record = record
            .with_lighting_channel(format!("fan{port}"), port_modes())
            .with_speed_channel(format!("fan{port}"));
    }
    record
}

/// Resolves the USB device behind a hidraw node: canonicalizes
/// `<sys_root>/class/hidraw/<node>/device` and walks up to the first ancestor
/// carrying an `idVendor` attribute.
pub fn resolve_sysfs_path(sys_root: &Path, hid_path: &str) -> Option<String> {
    let node = Path::new(hid_path).file_name()?.to_str()?;
    if !node.starts_with("hidraw") {
        return None;
    }
    let root = sys_root
        .canonicalize()
        .unwrap_or_else(|_| sys_root.to_path_buf());
    let device = root
        .join("class/hidraw")
        .join(node)
        .join("device")
        .canonicalize()
        .ok()?;
    let usb = device
        .ancestors()
        .take_while(|p| p.starts_with(&root))
        .find(|p| p.join("idVendor").exists())
        .unwrap_or(device.as_path());
    Some(usb.to_string_lossy().into_owned())
}

#[derive(Debug, Clone)]
struct PortState {
    effect: Effect,
    colors: Vec<Rgb>,
}

impl Default for PortState {
    fn default() -> Self {
        Self {
            effect: Effect::Direct,
            colors: vec![DEFAULT_COLOR],
        }
    }
}

#[derive(Debug)]
struct Inner<Io: DeviceIO> {
    controller: Controller<Io>,
    ports: BTreeMap<u8, PortState>,
}

/// Live handle to one controller.
///
/// A color write is always encoded under the port's active effect, so the
/// handle remembers effect and colors per port.
#[derive(Debug)]
struct RiingQuad<Io: DeviceIO> {
    inner: Mutex<Inner<Io>>,
}

impl<Io: DeviceIO> RiingQuad<Io> {
    pub fn new(dev: Io) -> Self {
        Self {
            inner: Mutex::new(Inner {
                controller: Controller::new(dev),
                ports: (1..=PORTS).map(|p| (p, PortState::default())).collect(),
            }),
        }
    }

    fn lock(&self) -> ControlResult<MutexGuard<'_, Inner<Io>>> {
        self.inner
            .lock()
            .map_err(|_| ControlError::UnsupportedOperation("controller state poisoned".into()))
    }

    /// Ports addressed by a channel name.
    fn ports(channel: &str) -> ControlResult<Vec<u8>> {
        if channel == SYNC_CHANNEL {
            return Ok((1..=PORTS).collect());
        }
        channel
            .strip_prefix("fan")
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|p| (1..=PORTS).contains(p))
            .map(|p| vec![p])
            .ok_or_else(|| ControlError::UnsupportedOperation(format!("unknown channel '{channel}'")))
    }

    fn write_port(inner: &Inner<Io>, port: u8, off: bool) -> ControlResult<()> {
        let Some(state) = inner.ports.get(&port) else {
            return Ok(());
        };
        let colors = if off { Vec::new() } else { state.colors.clone() };
        inner
            .controller
            .set_rgb(port, state.effect.mode_byte(), fill_port(&colors))
    }
}

impl<Io: DeviceIO + std::fmt::Debug> DeviceControl for RiingQuad<Io> {
    fn initialize(&self) -> ControlResult<()> {
        let inner = self.lock()?;
        inner.controller.init()?;
        let (major, minor, patch) = inner.controller.firmware_version()?;
        info!("Riing Quad firmware {major}.{minor}.{patch}");
        Ok(())
    }

    fn set_mode(&self, channel: &str, mode: &str) -> ControlResult<()> {
        let ports = Self::ports(channel)?;
        let per_port = match SYNC_EFFECTS.iter().find(|(name, _)| *name == mode) {
            Some(_) if channel != SYNC_CHANNEL => {
                return Err(ControlError::UnsupportedOperation(format!(
                    "'{mode}' is only available on the {SYNC_CHANNEL} channel"
                )));
            }
            Some((_, port_effect)) => *port_effect,
            None => mode,
        };
        let effect = Effect::lookup(per_port)
            .ok_or_else(|| ControlError::UnsupportedOperation(format!("unknown mode '{mode}'")))?;

        let mut inner = self.lock()?;
        for port in ports {
            if let Some(state) = inner.ports.get_mut(&port) {
                state.effect = effect;
            }
            Self::write_port(&inner, port, mode == "off")?;
        }
        Ok(())
    }

    fn set_color(&self, channel: &str, colors: &[Rgb]) -> ControlResult<()> {
        let ports = Self::ports(channel)?;
        let mut inner = self.lock()?;
        for port in ports {
            if let Some(state) = inner.ports.get_mut(&port) {
                state.colors = colors.to_vec();
            }
            Self::write_port(&inner, port, false)?;
        }
        Ok(())
    }

    fn set_speed(&self, channel: &str, percent: u8) -> ControlResult<()> {
        let ports = match channel {
            SYNC_CHANNEL => {
                return Err(ControlError::UnsupportedOperation(
                    "speed needs a fan channel".into(),
                ));
            }
            _ => Self::ports(channel)?,
        };
        let inner = self.lock()?;
        for port in ports {
            inner.controller.set_speed(port, percent.min(100))?;
        }
        Ok(())
    }

    fn status(&self) -> ControlResult<Vec<StatusReading>> {
        let inner = self.lock()?;
        let mut readings = Vec::new();
        for port in 1..=PORTS {
            let (speed, rpm) = inner.controller.get_data(port)?;
            readings.push(StatusReading::new(format!("Fan {port} speed"), rpm, "rpm"));
            readings.push(StatusReading::new(format!("Fan {port} duty"), speed, "%"));
        }
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::symlink;

    use super::controller::testing::{MockIo, ok_reply};
    use super::protocol::LEDS_PER_PORT;
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn rgb_packets(io: &MockIo) -> Vec<Vec<u8>> {
        io.written().into_iter().filter(|p| p[..3] == [0x00, 0x32, 0x52]).collect()
    }

    #[test]
    fn color_is_encoded_under_active_mode() {
        let io = MockIo::default();
        let quad = RiingQuad::new(io.clone());

        quad.set_mode("fan2", "breathing").unwrap();
        quad.set_color("fan2", &[Rgb::new(10, 20, 30)]).unwrap();

        let packets = rgb_packets(&io);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1][3..5], [2, 0x12]);
        assert_eq!(packets[1][5..8], [20, 10, 30]);
        assert_eq!(packets[1].len(), 5 + LEDS_PER_PORT * 3);
    }

    #[test]
    fn sync_channel_writes_every_port() {
        let io = MockIo::default();
        let quad = RiingQuad::new(io.clone());

        quad.set_mode(SYNC_CHANNEL, "spectrum-wave").unwrap();

        let ports: Vec<u8> = rgb_packets(&io).iter().map(|p| p[3]).collect();
        assert_eq!(ports, vec![1, 2, 3, 4, 5]);
        assert!(rgb_packets(&io).iter().all(|p| p[4] == 0x06));
    }

    #[test]
    fn sync_effects_are_rejected_on_single_ports() {
        let quad = RiingQuad::new(MockIo::default());
        let err = quad.set_mode("fan1", "spectrum-wave").unwrap_err();
        assert_eq!(err.kind(), "unsupported");
    }

    #[test]
    fn off_sends_black_but_keeps_colors() {
        let io = MockIo::default();
        let quad = RiingQuad::new(io.clone());
        quad.set_color("fan1", &[Rgb::new(9, 9, 9)]).unwrap();
        quad.set_mode("fan1", "off").unwrap();
        quad.set_mode("fan1", "fixed").unwrap();

        let packets = rgb_packets(&io);
        assert_eq!(packets[1][5..8], [0, 0, 0]);
        assert_eq!(packets[2][5..8], [9, 9, 9]);
    }

    #[test]
    fn speed_targets_one_port() {
        let io = MockIo::default();
        let quad = RiingQuad::new(io.clone());
        quad.set_speed("fan4", 65).unwrap();
        assert_eq!(io.written(), vec![vec![0x00, 0x32, 0x51, 4, 0x01, 65]]);

        assert!(quad.set_speed("sync", 50).is_err());
        assert!(quad.set_speed("fan6", 50).is_err());
    }

    #[test]
    fn status_reads_every_port() {
        let io = MockIo::default();
        let mut reply = ok_reply();
        reply[2] = 35;
        reply[3] = 0xE8;
        reply[4] = 0x03;
        io.queue_reply(reply);
        let quad = RiingQuad::new(io);

        let status = quad.status().unwrap();
        assert_eq!(status.len(), 10);
        assert_eq!(status[0], StatusReading::new("Fan 1 speed", 1000, "rpm"));
        assert_eq!(status[1], StatusReading::new("Fan 1 duty", 35, "%"));
    }

    #[test]
    fn initialize_reads_firmware() {
        let io = MockIo::default();
        io.queue_reply(ok_reply());
        io.queue_reply(vec![1, 0, 3]);
        RiingQuad::new(io.clone()).initialize().unwrap();
        assert_eq!(io.written()[1], vec![0x00, 0x33, 0x50]);
    }

    #[test]
    fn identity_prefers_serial() {
        assert_eq!(device_id(Some("A1B2"), 0), "riing-quad:A1B2");
        assert_eq!(device_id(Some("  "), 1), "riing-quad:2");
        assert_eq!(device_id(None, 0), "riing-quad:1");
    }

    #[test]
    fn records_expose_ports_and_sync() {
        let record = describe(DeviceRecord::new(
            "riing-quad:1",
            BACKEND_NAME,
            Arc::new(RiingQuad::new(MockIo::default())),
        ));
        assert_eq!(record.speed_channels.len(), 5);
        assert!(record.modes_for("sync").unwrap().contains(&"spectrum-wave".to_string()));
        assert!(!record.modes_for("fan1").unwrap().contains(&"spectrum-wave".to_string()));
        assert!(record.supports_monitoring);
    }

    #[test]
    fn hidraw_node_resolves_to_usb_device() {
        let sys = TempDir::new().unwrap();
        let usb = sys.path().join("devices/pci0000:00/usb1/1-4");
        let iface = usb.join("1-4:1.0/0003:264A:2260.0001");
        fs::create_dir_all(&iface).unwrap();
        fs::write(usb.join("idVendor"), "264a\n").unwrap();
        let class = sys.path().join("class/hidraw/hidraw3");
        fs::create_dir_all(&class).unwrap();
        symlink(&iface, class.join("device")).unwrap();

        let resolved = resolve_sysfs_path(sys.path(), "/dev/hidraw3").unwrap();
        assert_eq!(resolved, usb.canonicalize().unwrap().to_string_lossy());
        assert_eq!(resolve_sysfs_path(sys.path(), "1-4:1.0"), None);
        assert_eq!(resolve_sysfs_path(sys.path(), "/dev/hidraw9"), None);
    }
}
