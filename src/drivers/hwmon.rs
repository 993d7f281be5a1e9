//! Motherboard PWM fan headers through the Linux hwmon sysfs class.
//!
//! Each `hwmonN` chip with at least one writable `pwmN` output becomes a
//! device `hwmon:<chip>` with speed channels `pwm1`, `pwm2`, ...

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};

use crate::{
    backend::{Backend, CapabilityDescriptor, SysfsPaths, is_claimed},
    color::Rgb,
    config::HwmonCfg,
    device::{DeviceControl, DeviceRecord, StatusReading},
    error::{ControlError, ControlResult},
};

pub const BACKEND_NAME: &str = "hwmon";

/// `pwmN_enable` value selecting manual control.
const MANUAL: &str = "1";

#[derive(Debug, Clone)]
pub struct HwmonBackend {
    enabled: bool,
    root: PathBuf,
    min_pwm: u8,
    skip_chips: Vec<String>,
}

impl HwmonBackend {
    pub fn new(cfg: &HwmonCfg) -> Self {
        Self {
            enabled: cfg.enabled,
            root: cfg.root.clone(),
            min_pwm: u8::try_from(cfg.min_pwm).unwrap_or(u8::MAX),
            skip_chips: cfg.skip_chips.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    fn is_skipped(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.skip_chips.iter().any(|skip| name.contains(skip.as_str()))
    }

    fn probe_chip(&self, dir: &Path, exclude: &SysfsPaths) -> Option<HwmonChip> {
        let name = read_trimmed(&dir.join("name"))?;
        if self.is_skipped(&name) {
            debug!("Skipping non-fan-controller hwmon device: {name}");
            return None;
        }

        let sysfs_path = fs::canonicalize(dir.join("device"))
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        if let Some(path) = sysfs_path.as_deref().filter(|p| is_claimed(p, exclude)) {
            debug!("Skipping hwmon device {name}: {path} is claimed by another backend");
            return None;
        }

        let chip = read_trimmed(&dir.join("device/name")).unwrap_or_else(|| name.clone());
        let outputs = scan_pwm_outputs(dir);
        if outputs.is_empty() {
            debug!("Skipping hwmon device {name} (no writable PWM outputs)");
            return None;
        }

        let fans = scan_inputs(dir, "fan");
        let temps = scan_inputs(dir, "temp");
        info!(
            "Detected hwmon device: {chip} with {} PWM outputs, {} fans, {} temp sensors",
            outputs.len(),
            fans.len(),
            temps.len()
        );

        Some(HwmonChip {
            chip,
            sysfs_path,
            device: HwmonDevice {
                outputs,
                fans,
                temps,
                min_pwm: self.min_pwm,
            },
        })
    }
}

struct HwmonChip {
    chip: String,
    sysfs_path: Option<String>,
    device: HwmonDevice,
}

impl Backend for HwmonBackend {
    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new(BACKEND_NAME, 50)
            .cooling()
            .monitoring()
    }

    fn is_available(&self) -> bool {
        self.enabled && self.root.is_dir()
    }

    fn discover(&self, exclude: &SysfsPaths) -> ControlResult<Vec<DeviceRecord>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ControlError::from_io(&e, self.root.display())),
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("hwmon"))
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort_by_key(|path| numeric_suffix(path, "hwmon"));

        let mut records: Vec<DeviceRecord> = Vec::new();
        for dir in dirs {
            let Some(found) = self.probe_chip(&dir, exclude) else {
                continue;
            };

            let mut id = format!("{BACKEND_NAME}:{}", found.chip);
            if records.iter().any(|r| r.id == id) {
                let node = dir.file_name().map(|n| n.to_string_lossy().into_owned());
                id = format!("{id}-{}", node.unwrap_or_default());
            }

            let channels: Vec<String> = found.device.outputs.keys().map(|n| format!("pwm{n}")).collect();
            let mut record = DeviceRecord::new(id, BACKEND_NAME, Arc::new(found.device))
                .with_description(format!("Motherboard: {}", found.chip))
                .with_monitoring();
            for channel in channels {
                record = record.with_speed_channel(channel);
            }
            if let Some(path) = found.sysfs_path {
                record = record.with_sysfs_path(path);
            }
            records.push(record);
        }
        debug!("Hwmon discovered {} devices", records.len());
        Ok(records)
    }
}

#[derive(Debug, Clone)]
struct PwmOutput {
    pwm: PathBuf,
    enable: Option<PathBuf>,
    label: Option<String>,
}

#[derive(Debug, Clone)]
struct Input {
    path: PathBuf,
    label: Option<String>,
}

/// Control handle for one hwmon chip.
#[derive(Debug)]
pub struct HwmonDevice {
    outputs: BTreeMap<u32, PwmOutput>,
    fans: BTreeMap<u32, Input>,
    temps: BTreeMap<u32, Input>,
    min_pwm: u8,
}

impl HwmonDevice {
    fn output(&self, channel: &str) -> ControlResult<&PwmOutput> {
        channel
            .strip_prefix("pwm")
            .and_then(|n| n.parse::<u32>().ok())
            .and_then(|n| self.outputs.get(&n))
            .ok_or_else(|| {
                ControlError::UnsupportedOperation(format!("PWM channel '{channel}' not available"))
            })
    }

    /// 0..=255 duty for `percent`, raised to the safety floor.
    pub fn pwm_value(&self, percent: u8) -> u8 {
        let value = (u32::from(percent.min(100)) * 255 / 100) as u8;
        if value < self.min_pwm {
            warn!(
                "Requested PWM value {value} is below minimum {}, clamping for safety",
                self.min_pwm
            );
            return self.min_pwm;
        }
        value
    }
}

fn enable_manual(output: &PwmOutput) -> ControlResult<()> {
    let Some(enable) = &output.enable else {
        return Ok(());
    };
    if read_trimmed(enable).as_deref() == Some(MANUAL) {
        return Ok(());
    }
    debug!("Enabling manual mode for {}", output.pwm.display());
    fs::write(enable, format!("{MANUAL}\n")).map_err(|e| ControlError::from_io(&e, enable.display()))
}

impl DeviceControl for HwmonDevice {
    fn initialize(&self) -> ControlResult<()> {
        let mut first_error = None;
        for output in self.outputs.values() {
            if let Err(e) = enable_manual(output) {
                warn!("Failed to enable manual control: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn set_mode(&self, channel: &str, _mode: &str) -> ControlResult<()> {
        Err(ControlError::UnsupportedOperation(format!(
            "hwmon has no lighting channel '{channel}'"
        )))
    }

    fn set_color(&self, channel: &str, _colors: &[Rgb]) -> ControlResult<()> {
        Err(ControlError::UnsupportedOperation(format!(
            "hwmon has no lighting channel '{channel}'"
        )))
    }

    fn set_speed(&self, channel: &str, percent: u8) -> ControlResult<()> {
        let output = self.output(channel)?;
        let value = self.pwm_value(percent);
        enable_manual(output)?;
        fs::write(&output.pwm, format!("{value}\n"))
            .map_err(|e| ControlError::from_io(&e, output.pwm.display()))?;
        let label = output.label.as_deref().unwrap_or(channel);
        info!("Set {label} to {percent}% (PWM={value})");
        Ok(())
    }

    fn status(&self) -> ControlResult<Vec<StatusReading>> {
        let mut status = Vec::new();
        for (n, fan) in &self.fans {
            if let Some(rpm) = read_number(&fan.path) {
                let label = fan.label.clone().unwrap_or_else(|| format!("Fan {n}"));
                status.push(StatusReading::new(label, rpm, "rpm"));
            }
        }
        for (n, temp) in &self.temps {
            if let Some(millideg) = read_number(&temp.path) {
                let label = temp.label.clone().unwrap_or_else(|| format!("Temp {n}"));
                let celsius = format!("{:.1}", millideg as f64 / 1000.0);
                status.push(StatusReading::new(label, celsius, "°C"));
            }
        }
        for (n, output) in &self.outputs {
            if let Some(pwm) = read_number(&output.pwm) {
                let label = output.label.clone().unwrap_or_else(|| format!("PWM {n}"));
                status.push(StatusReading::new(format!("{label} duty"), pwm * 100 / 255, "%"));
            }
        }
        Ok(status)
    }
}

/// `pwmN` outputs whose control files can be opened for writing. Read-only
/// outputs are left out here rather than failing on the first write.
fn scan_pwm_outputs(dir: &Path) -> BTreeMap<u32, PwmOutput> {
    numbered_files(dir, "pwm", "")
        .into_iter()
        .filter_map(|(n, pwm)| {
            let enable = Some(dir.join(format!("pwm{n}_enable"))).filter(|p| p.exists());
            let writable = is_writable(&pwm) && enable.as_deref().is_none_or(is_writable);
            if !writable {
                debug!("PWM{n} in {} is read-only, skipping", dir.display());
                return None;
            }
            let label = read_trimmed(&dir.join(format!("pwm{n}_label")));
            Some((n, PwmOutput { pwm, enable, label }))
        })
        .collect()
}

fn scan_inputs(dir: &Path, prefix: &str) -> BTreeMap<u32, Input> {
    numbered_files(dir, prefix, "_input")
        .into_iter()
        .filter(|(_, path)| fs::read_to_string(path).is_ok())
        .map(|(n, path)| {
            let label = read_trimmed(&dir.join(format!("{prefix}{n}_label")));
            (n, Input { path, label })
        })
        .collect()
}

/// Files named `<prefix><N><suffix>` in `dir`, keyed by N.
fn numbered_files(dir: &Path, prefix: &str, suffix: &str) -> BTreeMap<u32, PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return BTreeMap::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let n = name.strip_prefix(prefix)?.strip_suffix(suffix)?.parse().ok()?;
            Some((n, entry.path()))
        })
        .collect()
}

fn numeric_suffix(path: &Path, prefix: &str) -> u32 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(prefix))
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

fn is_writable(path: &Path) -> bool {
    let not_readonly = fs::metadata(path).is_ok_and(|m| !m.permissions().readonly());
    not_readonly && OpenOptions::new().write(true).open(path).is_ok()
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_number(path: &Path) -> Option<i64> {
    read_trimmed(path)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::{PermissionsExt, symlink};

    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Sysfs {
        tmp: TempDir,
    }

    impl Sysfs {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            fs::create_dir_all(tmp.path().join("class/hwmon")).unwrap();
            Self { tmp }
        }

        fn root(&self) -> PathBuf {
            self.tmp.path().join("class/hwmon")
        }

        /// Creates `hwmonN` backed by `devices/<device>`.
        fn chip(&self, node: &str, name: &str, device: &str) -> PathBuf {
            let dir = self.root().join(node);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("name"), format!("{name}\n")).unwrap();
            let backing = self.tmp.path().join("devices").join(device);
            fs::create_dir_all(&backing).unwrap();
            symlink(&backing, dir.join("device")).unwrap();
            dir
        }

        fn backend(&self) -> HwmonBackend {
            HwmonBackend::new(&HwmonCfg {
                root: self.root(),
                ..HwmonCfg::default()
            })
        }

        fn device_path(&self, device: &str) -> String {
            fs::canonicalize(self.tmp.path().join("devices").join(device))
                .unwrap()
                .to_string_lossy()
                .into_owned()
        }
    }

    fn write(dir: &Path, file: &str, content: &str) {
        fs::write(dir.join(file), content).unwrap();
    }

    fn make_readonly(path: &Path) {
        fs::set_permissions(path, fs::Permissions::from_mode(0o444)).unwrap();
    }

    #[test]
    fn discovers_writable_pwm_outputs() {
        let sys = Sysfs::new();
        let chip = sys.chip("hwmon2", "nct6798", "platform/nct6775.656");
        write(&chip, "pwm1", "128\n");
        write(&chip, "pwm1_enable", "2\n");
        write(&chip, "pwm2", "64\n");
        write(&chip, "pwm2_enable", "2\n");
        make_readonly(&chip.join("pwm2"));
        write(&chip, "fan1_input", "900\n");

        let devices = sys.backend().discover(&SysfsPaths::new()).unwrap();

        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(device.id, "hwmon:nct6798");
        assert_eq!(device.speed_channels, vec!["pwm1"]);
        assert!(!device.supports_lighting());
        assert_eq!(
            device.sysfs_path.as_deref(),
            Some(sys.device_path("platform/nct6775.656").as_str())
        );
    }

    #[test]
    fn skips_temperature_only_and_pwmless_chips() {
        let sys = Sysfs::new();
        let cpu = sys.chip("hwmon0", "k10temp", "pci/k10");
        write(&cpu, "pwm1", "0\n");
        let nvme = sys.chip("hwmon1", "nvme", "pci/nvme0");
        write(&nvme, "temp1_input", "40000\n");
        let bare = sys.chip("hwmon3", "it8686", "platform/it87");
        write(&bare, "fan1_input", "700\n");

        assert!(sys.backend().discover(&SysfsPaths::new()).unwrap().is_empty());
    }

    #[test]
    fn skips_chips_under_claimed_paths() {
        let sys = Sysfs::new();
        let usb = sys.chip("hwmon4", "corsair", "usb1/1-4/1-4:1.0");
        write(&usb, "pwm1", "0\n");
        let board = sys.chip("hwmon5", "nct6798", "platform/nct");
        write(&board, "pwm1", "0\n");

        let exclude = SysfsPaths::from([sys.device_path("usb1/1-4")]);
        let devices = sys.backend().discover(&exclude).unwrap();

        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["hwmon:nct6798"]);
    }

    #[test]
    fn duplicate_chip_names_get_distinct_ids() {
        let sys = Sysfs::new();
        for (node, dev) in [("hwmon1", "platform/a"), ("hwmon2", "platform/b")] {
            let chip = sys.chip(node, "it8686", dev);
            write(&chip, "pwm1", "0\n");
        }
        let devices = sys.backend().discover(&SysfsPaths::new()).unwrap();
        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["hwmon:it8686", "hwmon:it8686-hwmon2"]);
    }

    #[test]
    fn set_speed_switches_to_manual_and_honours_floor() {
        let sys = Sysfs::new();
        let chip = sys.chip("hwmon2", "nct6798", "platform/nct");
        write(&chip, "pwm1", "128\n");
        write(&chip, "pwm1_enable", "2\n");
        let devices = sys.backend().discover(&SysfsPaths::new()).unwrap();
        let handle = devices[0].handle();

        handle.set_speed("pwm1", 60).unwrap();
        assert_eq!(fs::read_to_string(chip.join("pwm1_enable")).unwrap(), "1\n");
        assert_eq!(fs::read_to_string(chip.join("pwm1")).unwrap(), "153\n");

        handle.set_speed("pwm1", 5).unwrap();
        assert_eq!(fs::read_to_string(chip.join("pwm1")).unwrap(), "51\n");

        let err = handle.set_speed("pwm7", 50).unwrap_err();
        assert_eq!(err.kind(), "unsupported");
    }

    #[test]
    fn initialize_enables_manual_control() {
        let sys = Sysfs::new();
        let chip = sys.chip("hwmon2", "nct6798", "platform/nct");
        for n in 1..=2 {
            write(&chip, &format!("pwm{n}"), "0\n");
            write(&chip, &format!("pwm{n}_enable"), "5\n");
        }
        let devices = sys.backend().discover(&SysfsPaths::new()).unwrap();

        devices[0].handle().initialize().unwrap();

        for n in 1..=2 {
            let enable = fs::read_to_string(chip.join(format!("pwm{n}_enable"))).unwrap();
            assert_eq!(enable, "1\n");
        }
    }

    #[test]
    fn status_reports_fans_temps_and_duty() {
        let sys = Sysfs::new();
        let chip = sys.chip("hwmon2", "nct6798", "platform/nct");
        write(&chip, "pwm1", "255\n");
        write(&chip, "pwm1_label", "CPU_FAN\n");
        write(&chip, "fan1_input", "1200\n");
        write(&chip, "temp1_input", "41500\n");
        let devices = sys.backend().discover(&SysfsPaths::new()).unwrap();

        let status = devices[0].handle().status().unwrap();

        assert_eq!(
            status,
            vec![
                StatusReading::new("Fan 1", 1200, "rpm"),
                StatusReading::new("Temp 1", "41.5", "°C"),
                StatusReading::new("CPU_FAN duty", 100, "%"),
            ]
        );
    }

    #[test]
    fn lighting_is_unsupported() {
        let device = HwmonDevice {
            outputs: BTreeMap::new(),
            fans: BTreeMap::new(),
            temps: BTreeMap::new(),
            min_pwm: 51,
        };
        assert!(device.set_mode("ring", "fixed").is_err());
        assert!(device.set_color("ring", &[Rgb::BLACK]).is_err());
        assert_eq!(device.pwm_value(100), 255);
        assert_eq!(device.pwm_value(0), 51);
    }

    #[test]
    fn availability_follows_root_and_flag() {
        let sys = Sysfs::new();
        assert!(sys.backend().is_available());

        let disabled = HwmonBackend::new(&HwmonCfg {
            enabled: false,
            root: sys.root(),
            ..HwmonCfg::default()
        });
        assert!(!disabled.is_available());

        let missing = HwmonBackend::new(&HwmonCfg {
            root: sys.root().join("absent"),
            ..HwmonCfg::default()
        });
        assert!(!missing.is_available());
        assert!(missing.discover(&SysfsPaths::new()).unwrap().is_empty());
    }
}
