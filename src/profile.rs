//! Desired per-channel settings and the record of what was last applied.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    color::Rgb,
    error::{ControlError, ControlResult},
};

/// `(device, channel)` pair, written `device:channel`.
///
/// Device identities may contain colons themselves (`hwmon:nct6798`), channel
/// names never do, so parsing splits on the last colon.
///
/// # Example
///
/// ```
/// use coolctld::profile::ChannelKey;
///
/// let key: ChannelKey = "hwmon:nct6798:pwm2".parse()?;
/// assert_eq!(key.device, "hwmon:nct6798");
/// assert_eq!(key.channel, "pwm2");
/// # Ok::<(), coolctld::error::ControlError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelKey {
    pub device: String,
    pub channel: String,
}

impl ChannelKey {
    pub fn new(device: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.channel)
    }
}

impl FromStr for ChannelKey {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((device, channel)) if !device.is_empty() && !channel.is_empty() => {
                Ok(Self::new(device, channel))
            }
            _ => Err(ControlError::Corrupt(format!(
                "invalid channel key '{s}', expected device:channel"
            ))),
        }
    }
}

/// Requested fan speed as it appears in persisted data.
///
/// Older files store speeds as strings, so the value is kept as written and
/// only coerced when applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpeedValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl SpeedValue {
    /// Integer percentage in 0..=100. Fractions truncate and out-of-range
    /// values clamp; text that is not a number fails.
    pub fn percent(&self) -> ControlResult<u8> {
        let raw = match self {
            Self::Integer(v) => return Ok((*v).clamp(0, 100) as u8),
            Self::Float(v) => *v,
            Self::Text(text) => text.trim().parse::<f64>().map_err(|_| {
                ControlError::UnsupportedOperation(format!("invalid speed '{text}'"))
            })?,
        };
        if raw.is_nan() {
            return Err(ControlError::UnsupportedOperation("invalid speed 'NaN'".into()));
        }
        Ok(raw.trunc().clamp(0.0, 100.0) as u8)
    }
}

impl From<u8> for SpeedValue {
    fn from(percent: u8) -> Self {
        Self::Integer(percent.into())
    }
}

impl fmt::Display for SpeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Settings for one channel. `None` means "leave unspecified".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSetting {
    pub mode: Option<String>,
    pub colors: Option<Vec<Rgb>>,
    pub speed: Option<SpeedValue>,
}

impl ChannelSetting {
    /// Whether the setting touches lighting at all.
    pub fn has_lighting(&self) -> bool {
        self.mode.is_some() || self.colors.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_lighting() && self.speed.is_none()
    }
}

/// Desired configuration keyed by `(device, channel)`.
///
/// A profile is plain data: applying it never modifies it.
///
/// # Example
///
/// ```
/// use coolctld::{color::Rgb, profile::{ChannelKey, Profile}};
///
/// let profile = Profile::new()
///     .with_mode("riing-quad:1:fan1", "breathing")
///     .with_colors("riing-quad:1:fan1", [Rgb::new(0, 0, 255)])
///     .with_speed("hwmon:nct6798:pwm2", 60);
///
/// assert_eq!(profile.len(), 2);
/// assert_eq!(
///     profile.get(&ChannelKey::new("riing-quad:1", "fan1")).and_then(|s| s.mode.as_deref()),
///     Some("breathing")
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    entries: BTreeMap<ChannelKey, ChannelSetting>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mode of `key`. Malformed keys are ignored with a warning.
    pub fn with_mode(mut self, key: &str, mode: impl Into<String>) -> Self {
        if let Some(setting) = self.entry_for(key) {
            setting.mode = Some(mode.into());
        }
        self
    }

    pub fn with_colors(mut self, key: &str, colors: impl IntoIterator<Item = Rgb>) -> Self {
        if let Some(setting) = self.entry_for(key) {
            setting.colors = Some(colors.into_iter().collect());
        }
        self
    }

    pub fn with_speed(self, key: &str, percent: u8) -> Self {
        self.with_speed_value(key, SpeedValue::from(percent))
    }

    /// Sets a speed exactly as it would be read from disk.
    pub fn with_speed_value(mut self, key: &str, speed: SpeedValue) -> Self {
        if let Some(setting) = self.entry_for(key) {
            setting.speed = Some(speed);
        }
        self
    }

    fn entry_for(&mut self, key: &str) -> Option<&mut ChannelSetting> {
        match key.parse::<ChannelKey>() {
            Ok(key) => Some(self.entries.entry(key).or_default()),
            Err(err) => {
                log::warn!("Ignoring profile entry: {err}");
                None
            }
        }
    }

    /// Inserts or replaces a whole setting. Empty settings are dropped.
    pub fn insert(&mut self, key: ChannelKey, setting: ChannelSetting) {
        if setting.is_empty() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, setting);
        }
    }

    pub fn get(&self, key: &ChannelKey) -> Option<&ChannelSetting> {
        self.entries.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &ChannelKey) -> Option<&mut ChannelSetting> {
        self.entries.get_mut(key)
    }

    pub fn remove(&mut self, key: &ChannelKey) -> Option<ChannelSetting> {
        self.entries.remove(key)
    }

    pub(crate) fn retain(&mut self, f: impl FnMut(&ChannelKey, &mut ChannelSetting) -> bool) {
        self.entries.retain(f);
    }

    /// Entries in key order, which groups them by device.
    pub fn iter(&self) -> impl Iterator<Item = (&ChannelKey, &ChannelSetting)> {
        self.entries.iter()
    }

    /// Distinct device identities, sorted.
    pub fn devices(&self) -> Vec<&str> {
        let mut devices: Vec<&str> = self.entries.keys().map(|k| k.device.as_str()).collect();
        devices.dedup();
        devices
    }

    /// Entries belonging to `device`, in channel order.
    pub fn device_entries<'a>(
        &'a self,
        device: &'a str,
    ) -> impl Iterator<Item = (&'a ChannelKey, &'a ChannelSetting)> {
        self.entries.iter().filter(move |(k, _)| k.device == device)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(ChannelKey, ChannelSetting)> for Profile {
    fn from_iter<I: IntoIterator<Item = (ChannelKey, ChannelSetting)>>(iter: I) -> Self {
        let mut profile = Self::new();
        for (key, setting) in iter {
            profile.insert(key, setting);
        }
        profile
    }
}

/// Last-known mode, colors and speed per channel, as actually applied.
///
/// Owned by whoever drives the applier; the applier only fills it in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedState {
    settings: Profile,
}

impl AppliedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_profile(settings: Profile) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Profile {
        &self.settings
    }

    pub fn into_profile(self) -> Profile {
        self.settings
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Records a lighting change, replacing whatever mode and colors the
    /// channel had before.
    pub fn record_lighting(&mut self, key: &ChannelKey, mode: &str, colors: Option<&[Rgb]>) {
        let mut setting = self.settings.get(key).cloned().unwrap_or_default();
        setting.mode = Some(mode.to_string());
        setting.colors = colors.map(<[Rgb]>::to_vec);
        self.settings.insert(key.clone(), setting);
    }

    pub fn record_speed(&mut self, key: &ChannelKey, percent: u8) {
        let mut setting = self.settings.get(key).cloned().unwrap_or_default();
        setting.speed = Some(percent.into());
        self.settings.insert(key.clone(), setting);
    }

    /// Forgets the lighting part of every channel of `device` for which
    /// `drop` returns true.
    pub fn clear_lighting_where(
        &mut self,
        device: &str,
        mut drop: impl FnMut(&ChannelKey, &ChannelSetting) -> bool,
    ) {
        let keys: Vec<ChannelKey> = self
            .settings
            .device_entries(device)
            .filter(|(k, s)| s.has_lighting() && drop(k, s))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            if let Some(setting) = self.settings.get_mut(&key) {
                setting.mode = None;
                setting.colors = None;
            }
        }
        self.settings.retain(|_, s| !s.is_empty());
    }

    /// Overlays `other` on top of this snapshot, field by field.
    pub fn merge(&mut self, other: AppliedState) {
        for (key, incoming) in other.settings.entries {
            let mut setting = self.settings.get(&key).cloned().unwrap_or_default();
            if incoming.has_lighting() {
                setting.mode = incoming.mode;
                setting.colors = incoming.colors;
            }
            if incoming.speed.is_some() {
                setting.speed = incoming.speed;
            }
            self.settings.insert(key, setting);
        }
    }
}
