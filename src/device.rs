//! Discovered devices and the control trait every backend implements.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{color::Rgb, error::ControlResult};

/// Conventional lighting channel that addresses a device's whole lighting.
pub const SYNC_CHANNEL: &str = "sync";

/// One line of a device status readout (`label`, `value`, `unit`).
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReading {
    pub label: String,
    pub value: String,
    pub unit: &'static str,
}

impl StatusReading {
    pub fn new(label: impl Into<String>, value: impl ToString, unit: &'static str) -> Self {
        Self {
            label: label.into(),
            value: value.to_string(),
            unit,
        }
    }
}

/// Trait for live device handles produced by a backend.
///
/// Provides a unified interface for lighting and cooling control across
/// different hardware types. Mode and color are separate operations: a color
/// write is always interpreted under the channel's active mode, so callers set
/// the mode first.
///
/// # Example
///
/// ```no_run
/// use coolctld::color::Rgb;
/// use coolctld::device::{DeviceControl, StatusReading};
/// use coolctld::error::ControlResult;
///
/// #[derive(Debug)]
/// struct NullDevice;
///
/// impl DeviceControl for NullDevice {
///     fn initialize(&self) -> ControlResult<()> { Ok(()) }
///     fn set_mode(&self, _channel: &str, _mode: &str) -> ControlResult<()> { Ok(()) }
///     fn set_color(&self, _channel: &str, _colors: &[Rgb]) -> ControlResult<()> { Ok(()) }
///     fn set_speed(&self, _channel: &str, _percent: u8) -> ControlResult<()> { Ok(()) }
///     fn status(&self) -> ControlResult<Vec<StatusReading>> { Ok(Vec::new()) }
/// }
/// ```
pub trait DeviceControl: Send + Sync + fmt::Debug {
    /// Prepares the hardware for manual control.
    fn initialize(&self) -> ControlResult<()>;

    /// Switches a lighting channel to `mode`.
    fn set_mode(&self, channel: &str, mode: &str) -> ControlResult<()>;

    /// Writes colors to a lighting channel under its active mode.
    fn set_color(&self, channel: &str, colors: &[Rgb]) -> ControlResult<()>;

    /// Sets a speed channel to an integer percentage. Backends may raise the
    /// value to their own safety floor.
    fn set_speed(&self, channel: &str, percent: u8) -> ControlResult<()>;

    /// Reads current telemetry.
    fn status(&self) -> ControlResult<Vec<StatusReading>>;
}

/// Uniform result of discovery.
///
/// Records are created fresh on every discovery pass and never mutated; the
/// next pass replaces the whole set.
#[derive(Clone)]
pub struct DeviceRecord {
    /// Stable identity used as the device half of profile keys.
    pub id: String,

    /// Human-readable description.
    pub description: String,

    /// Name of the backend that produced this record.
    pub backend: String,

    /// Lighting channels with the modes each accepts.
    pub lighting: BTreeMap<String, Vec<String>>,

    /// Speed channels.
    pub speed_channels: Vec<String>,

    pub supports_monitoring: bool,

    /// Canonical sysfs path, absent when the backend cannot resolve one.
    pub sysfs_path: Option<String>,

    handle: Arc<dyn DeviceControl>,
}

impl DeviceRecord {
    pub fn new(
        id: impl Into<String>,
        backend: impl Into<String>,
        handle: Arc<dyn DeviceControl>,
    ) -> Self {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            backend: backend.into(),
            lighting: BTreeMap::new(),
            speed_channels: Vec::new(),
            supports_monitoring: false,
            sysfs_path: None,
            handle,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_lighting_channel<I, S>(mut self, channel: impl Into<String>, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lighting
            .insert(channel.into(), modes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_speed_channel(mut self, channel: impl Into<String>) -> Self {
        self.speed_channels.push(channel.into());
        self
    }

    pub fn with_monitoring(mut self) -> Self {
        self.supports_monitoring = true;
        self
    }

    pub fn with_sysfs_path(mut self, path: impl Into<String>) -> Self {
        self.sysfs_path = Some(path.into()).filter(|p: &String| !p.is_empty());
        self
    }

    pub fn supports_lighting(&self) -> bool {
        !self.lighting.is_empty()
    }

    pub fn supports_cooling(&self) -> bool {
        !self.speed_channels.is_empty()
    }

    pub fn has_speed_channel(&self, channel: &str) -> bool {
        self.speed_channels.iter().any(|c| c == channel)
    }

    /// Modes accepted by a lighting channel, `None` if the channel is unknown.
    pub fn modes_for(&self, channel: &str) -> Option<&[String]> {
        self.lighting.get(channel).map(Vec::as_slice)
    }

    pub fn handle(&self) -> &dyn DeviceControl {
        self.handle.as_ref()
    }
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("lighting", &self.lighting.keys().collect::<Vec<_>>())
            .field("speed_channels", &self.speed_channels)
            .field("sysfs_path", &self.sysfs_path)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording device used by registry and applier tests.

    use std::sync::Mutex;

    use super::*;
    use crate::error::ControlError;

    /// Operation observed by a [`RecordingDevice`].
    #[derive(Debug, Clone, PartialEq)]
    pub enum Op {
        Init,
        Mode { channel: String, mode: String },
        Color { channel: String, colors: Vec<Rgb> },
        Speed { channel: String, percent: u8 },
    }

    #[derive(Debug, Default)]
    pub struct RecordingDevice {
        pub ops: Mutex<Vec<Op>>,
        pub fail_with: Mutex<Option<ControlError>>,
    }

    impl RecordingDevice {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn failing(err: ControlError) -> Arc<Self> {
            Arc::new(Self {
                ops: Mutex::default(),
                fail_with: Mutex::new(Some(err)),
            })
        }

        pub fn ops(&self) -> Vec<Op> {
            self.ops.lock().unwrap().clone()
        }

        fn record(&self, op: Op) -> ControlResult<()> {
            if let Some(err) = self.fail_with.lock().unwrap().clone() {
                return Err(err);
            }
            self.ops.lock().unwrap().push(op);
            Ok(())
        }
    }

    impl DeviceControl for RecordingDevice {
        fn initialize(&self) -> ControlResult<()> {
            self.record(Op::Init)
        }

        fn set_mode(&self, channel: &str, mode: &str) -> ControlResult<()> {
            self.record(Op::Mode {
                channel: channel.into(),
                mode: mode.into(),
            })
        }

        fn set_color(&self, channel: &str, colors: &[Rgb]) -> ControlResult<()> {
            self.record(Op::Color {
                channel: channel.into(),
                colors: colors.to_vec(),
            })
        }

        fn set_speed(&self, channel: &str, percent: u8) -> ControlResult<()> {
            self.record(Op::Speed {
                channel: channel.into(),
                percent,
            })
        }

        fn status(&self) -> ControlResult<Vec<StatusReading>> {
            Ok(vec![StatusReading::new("ops", self.ops().len(), "")])
        }
    }
}
