//! JSON persistence for profiles and the current applied state.
//!
//! Profiles live as `<dir>/<name>.json`; the current state is a single file of
//! the same shape with an extra `profile_name`. Reads never fail hard: a file
//! that cannot be parsed is reported as [`Stored::Corrupt`] and callers treat
//! it as an empty profile.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    color::Rgb,
    profile::{ChannelKey, ChannelSetting, Profile, SpeedValue},
};

/// Result of reading a persisted value.
#[derive(Debug, Clone, PartialEq)]
pub enum Stored<T> {
    Present(T),
    Missing,
    Corrupt(String),
}

impl<T: Default> Stored<T> {
    /// The value, or its default when missing or corrupt.
    pub fn unwrap_or_default(self) -> T {
        match self {
            Self::Present(value) => value,
            Self::Missing => T::default(),
            Self::Corrupt(reason) => {
                warn!("Ignoring corrupt data: {reason}");
                T::default()
            }
        }
    }
}

impl<T> Stored<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Stored<U> {
        match self {
            Self::Present(value) => Stored::Present(f(value)),
            Self::Missing => Stored::Missing,
            Self::Corrupt(reason) => Stored::Corrupt(reason),
        }
    }
}

/// One color or a list of colors, as written on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorField {
    Single(String),
    List(Vec<String>),
}

/// On-disk shape of a profile.
///
/// ```json
/// {
///   "colors": {"riing-quad:1:fan1": "#ff0000"},
///   "modes": {"riing-quad:1:fan1": "fixed"},
///   "speeds": {"hwmon:nct6798:pwm2": 60}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,

    #[serde(default)]
    pub colors: BTreeMap<String, ColorField>,

    #[serde(default)]
    pub modes: BTreeMap<String, String>,

    #[serde(default)]
    pub speeds: BTreeMap<String, SpeedValue>,
}

impl ProfileDocument {
    pub fn from_profile(profile: &Profile, profile_name: Option<&str>) -> Self {
        let mut doc = Self {
            profile_name: profile_name.map(str::to_string),
            ..Self::default()
        };
        for (key, setting) in profile.iter() {
            let key = key.to_string();
            if let Some(mode) = &setting.mode {
                doc.modes.insert(key.clone(), mode.clone());
            }
            match setting.colors.as_deref() {
                Some([single]) => {
                    doc.colors.insert(key.clone(), ColorField::Single(single.to_string()));
                }
                Some(colors) => {
                    let list = colors.iter().map(Rgb::to_string).collect();
                    doc.colors.insert(key.clone(), ColorField::List(list));
                }
                None => {}
            }
            if let Some(speed) = &setting.speed {
                doc.speeds.insert(key, speed.clone());
            }
        }
        doc
    }

    /// Converts to a [`Profile`]. Malformed keys and colors are dropped with a
    /// warning; empty color strings mean "no color".
    pub fn into_profile(self) -> Profile {
        let mut settings: BTreeMap<ChannelKey, ChannelSetting> = BTreeMap::new();
        for (raw, mode) in self.modes {
            if let Some(setting) = slot(&mut settings, &raw) {
                setting.mode = Some(mode);
            }
        }
        for (raw, field) in self.colors {
            if let Some(colors) = parse_colors(&raw, field) {
                if let Some(setting) = slot(&mut settings, &raw) {
                    setting.colors = Some(colors);
                }
            }
        }
        for (raw, speed) in self.speeds {
            if let Some(setting) = slot(&mut settings, &raw) {
                setting.speed = Some(speed);
            }
        }

        settings.into_iter().collect()
    }
}

fn slot<'a>(
    settings: &'a mut BTreeMap<ChannelKey, ChannelSetting>,
    raw: &str,
) -> Option<&'a mut ChannelSetting> {
    match raw.parse::<ChannelKey>() {
        Ok(key) => Some(settings.entry(key).or_default()),
        Err(err) => {
            warn!("Skipping entry: {err}");
            None
        }
    }
}

fn parse_colors(key: &str, field: ColorField) -> Option<Vec<Rgb>> {
    let raw = match field {
        ColorField::Single(s) => vec![s],
        ColorField::List(list) => list,
    };
    let raw: Vec<String> = raw.into_iter().filter(|s| !s.trim().is_empty()).collect();
    if raw.is_empty() {
        return None;
    }
    match raw.iter().map(|s| s.parse()).collect::<Result<Vec<Rgb>, _>>() {
        Ok(colors) => Some(colors),
        Err(err) => {
            warn!("Skipping colors of {key}: {err}");
            None
        }
    }
}

/// The persisted current state: what was last applied and from which profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentState {
    pub profile_name: Option<String>,
    pub profile: Profile,
}

/// Named profiles in a directory plus the current-state file.
///
/// # Example
///
/// ```no_run
/// use coolctld::{profile::Profile, store::ProfileStore};
///
/// let store = ProfileStore::new("/var/lib/coolctld/profiles", "/var/lib/coolctld/current.json");
/// store.save("quiet", &Profile::new().with_speed("hwmon:nct6798:pwm2", 35))?;
/// let quiet = store.load("quiet")?.unwrap_or_default();
/// assert_eq!(quiet.len(), 1);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
    state_file: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>, state_file: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            state_file: state_file.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, name: &str, profile: &Profile) -> Result<PathBuf> {
        let path = self.profile_path(name)?;
        write_json(&path, &ProfileDocument::from_profile(profile, None))?;
        info!("Profile '{name}' saved to {}", path.display());
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Stored<Profile>> {
        let path = self.profile_path(name)?;
        Ok(read_json::<ProfileDocument>(&path).map(ProfileDocument::into_profile))
    }

    /// Profile names, sorted. A missing directory has no profiles.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to list {}", self.dir.display()));
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
            .filter(|name| is_safe_name(name))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Removes a profile. Returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = self.profile_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Profile '{name}' deleted");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    pub fn save_current(&self, profile: &Profile, profile_name: Option<&str>) -> Result<()> {
        write_json(
            &self.state_file,
            &ProfileDocument::from_profile(profile, profile_name),
        )?;
        debug!("Current state saved to {}", self.state_file.display());
        Ok(())
    }

    pub fn load_current(&self) -> Stored<CurrentState> {
        read_json::<ProfileDocument>(&self.state_file).map(|mut doc| CurrentState {
            profile_name: doc.profile_name.take(),
            profile: doc.into_profile(),
        })
    }

    fn profile_path(&self, name: &str) -> Result<PathBuf> {
        anyhow::ensure!(is_safe_name(name), "Invalid profile name '{name}'");
        Ok(self.dir.join(format!("{name}.json")))
    }
}

/// Letters, digits, `-`, `_`, `.` and spaces; no leading dot.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Stored<T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Stored::Missing,
        Err(err) => return Stored::Corrupt(format!("{}: {err}", path.display())),
    };
    match serde_json::from_str(&content) {
        Ok(value) => Stored::Present(value),
        Err(err) => Stored::Corrupt(format!("{}: {err}", path.display())),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("Failed to serialize profile")?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)
        .with_context(|| format!("Failed to write temporary file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move profile to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> ProfileStore {
        ProfileStore::new(tmp.path().join("profiles"), tmp.path().join("current.json"))
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let profile = Profile::new()
            .with_mode("riing-quad:1:fan1", "breathing")
            .with_colors("riing-quad:1:fan1", [Rgb::new(0, 0, 255)])
            .with_colors("riing-quad:1:fan2", [Rgb::new(1, 1, 1), Rgb::new(2, 2, 2)])
            .with_speed("hwmon:nct6798:pwm2", 60);

        store.save("gaming", &profile).unwrap();

        assert_eq!(store.load("gaming").unwrap(), Stored::Present(profile));
    }

    #[test]
    fn reads_legacy_documents() {
        let doc = r##"{
            "colors": {"devX:ring": "#ff0000", "devX:logo": "", "devX:strip": ["#000001", "#000002"]},
            "modes": {"devX:ring": "fixed", "devX:logo": "spectrum"},
            "speeds": {"hwmon:it8686:pwm1": "45", "hwmon:it8686:pwm2": 70}
        }"##;
        let profile = serde_json::from_str::<ProfileDocument>(doc)
            .unwrap()
            .into_profile();

        let logo = profile.get(&ChannelKey::new("devX", "logo")).unwrap();
        assert_eq!(logo.colors, None);
        assert_eq!(logo.mode.as_deref(), Some("spectrum"));
        let strip = profile.get(&ChannelKey::new("devX", "strip")).unwrap();
        assert_eq!(strip.colors.as_ref().map(Vec::len), Some(2));
        let pwm1 = profile.get(&ChannelKey::new("hwmon:it8686", "pwm1")).unwrap();
        assert_eq!(pwm1.speed, Some(SpeedValue::Text("45".into())));
        assert_eq!(profile.len(), 5);
    }

    #[test]
    fn malformed_entries_are_dropped_individually() {
        let doc = r##"{
            "colors": {"devX:ring": "not-a-color", "nochannel": "#ffffff"},
            "modes": {"devX:ring": "fixed"}
        }"##;
        let profile = serde_json::from_str::<ProfileDocument>(doc)
            .unwrap()
            .into_profile();

        assert_eq!(profile, Profile::new().with_mode("devX:ring", "fixed"));
    }

    #[test]
    fn missing_and_corrupt_files_load_as_empty() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert_eq!(store.load("absent").unwrap(), Stored::Missing);

        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("broken.json"), "{ not json").unwrap();
        let broken = store.load("broken").unwrap();
        assert!(matches!(broken, Stored::Corrupt(_)));
        assert!(broken.unwrap_or_default().is_empty());
    }

    #[test]
    fn list_is_sorted_and_ignores_other_files() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(store.list().unwrap().is_empty());

        store.save("silent", &Profile::new()).unwrap();
        store.save("gaming", &Profile::new()).unwrap();
        fs::write(store.dir().join("notes.txt"), "x").unwrap();

        assert_eq!(store.list().unwrap(), vec!["gaming", "silent"]);
    }

    #[test]
    fn delete_reports_whether_profile_existed() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.save("quiet", &Profile::new()).unwrap();

        assert!(store.delete("quiet").unwrap());
        assert!(!store.delete("quiet").unwrap());
        assert_eq!(store.load("quiet").unwrap(), Stored::Missing);
    }

    #[test]
    fn unsafe_names_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        for name in ["", "../etc/passwd", ".hidden", "a/b"] {
            assert!(store.save(name, &Profile::new()).is_err(), "{name:?}");
        }
        assert!(is_safe_name("Night mode_2"));
    }

    #[test]
    fn current_state_keeps_profile_name() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert_eq!(store.load_current(), Stored::Missing);

        let profile = Profile::new().with_mode("devX:sync", "spectrum-wave");
        store.save_current(&profile, Some("party")).unwrap();

        let current = store.load_current().unwrap_or_default();
        assert_eq!(current.profile_name.as_deref(), Some("party"));
        assert_eq!(current.profile, profile);
        assert!(!tmp.path().join("current.json.tmp").exists());
    }
}
