//! Ordered application of a profile to discovered devices.
//!
//! Work is grouped per device. Within a device, global-sync lighting goes
//! first and suppresses every other lighting entry. Otherwise the `sync`
//! channel is written before the individual channels it covers, each entry
//! sets its mode before its color, and speeds come last. Every entry
//! yields an [`Outcome`]; nothing aborts the pass.

use std::collections::BTreeSet;

use log::{debug, info, warn};

use crate::{
    color::Rgb,
    device::{DeviceRecord, SYNC_CHANNEL},
    error::{ControlError, ControlResult},
    modes::{ModeClass, ModeClassifier},
    profile::{AppliedState, ChannelKey, ChannelSetting, Profile},
};

/// Which half of a channel setting an outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aspect {
    Lighting,
    Speed,
}

/// Result of one profile entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied,
    /// Not issued because a global-sync mode owns the device's lighting.
    Suppressed,
    /// The device is not present, or vanished during the pass.
    SkippedNotFound,
    Failed(ControlError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryOutcome {
    pub key: ChannelKey,
    pub aspect: Aspect,
    pub outcome: Outcome,
}

/// Per-entry outcomes of one application pass, in issue order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub entries: Vec<EntryOutcome>,
}

impl ApplyReport {
    fn push(&mut self, key: &ChannelKey, aspect: Aspect, outcome: Outcome) {
        self.entries.push(EntryOutcome {
            key: key.clone(),
            aspect,
            outcome,
        });
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(|o| *o == Outcome::Applied)
    }

    pub fn suppressed(&self) -> usize {
        self.count(|o| *o == Outcome::Suppressed)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| *o == Outcome::SkippedNotFound)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    /// Outcome recorded for `key`, if that aspect was part of the pass.
    pub fn outcome_for(&self, key: &ChannelKey, aspect: Aspect) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| &e.key == key && e.aspect == aspect)
            .map(|e| &e.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ChannelKey, &ControlError)> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            Outcome::Failed(err) => Some((&e.key, err)),
            _ => None,
        })
    }

    pub fn summary(&self) -> String {
        format!(
            "{} applied, {} suppressed, {} skipped, {} failed",
            self.applied(),
            self.suppressed(),
            self.skipped(),
            self.failed()
        )
    }

    /// Logs the one-line summary at info level.
    pub fn log_summary(&self, what: &str) {
        info!("Applied {what}: {}", self.summary());
    }
}

/// Applies profiles to the devices of the latest discovery pass.
///
/// Holds no device state of its own; the caller passes devices and owns the
/// [`AppliedState`] snapshot.
///
/// # Example
///
/// ```no_run
/// use coolctld::applier::ProfileApplier;
/// use coolctld::modes::ModeClassifier;
/// use coolctld::profile::{AppliedState, Profile};
///
/// let applier = ProfileApplier::new(ModeClassifier::default());
/// let profile = Profile::new().with_mode("riing-quad:1:sync", "spectrum-wave");
/// let mut snapshot = AppliedState::new();
/// let report = applier.apply(&profile, &[], &mut snapshot);
/// assert_eq!(report.skipped(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProfileApplier {
    classifier: ModeClassifier,
}

impl ProfileApplier {
    pub fn new(classifier: ModeClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &ModeClassifier {
        &self.classifier
    }

    /// Applies a complete profile. The snapshot is replaced by exactly what
    /// this pass applied.
    pub fn apply(
        &self,
        profile: &Profile,
        devices: &[DeviceRecord],
        snapshot: &mut AppliedState,
    ) -> ApplyReport {
        let (report, applied) = self.run(profile, devices);
        *snapshot = applied;
        report
    }

    /// Applies a partial profile and merges what was applied into the
    /// snapshot.
    ///
    /// A global-sync mode replaces all lighting recorded for its device; any
    /// other lighting change drops a recorded global-sync mode of its device.
    pub fn apply_update(
        &self,
        profile: &Profile,
        devices: &[DeviceRecord],
        snapshot: &mut AppliedState,
    ) -> ApplyReport {
        let (report, applied) = self.run(profile, devices);

        let touched: Vec<(String, bool)> = applied
            .settings()
            .devices()
            .into_iter()
            .filter_map(|device| {
                let mut lighting = applied
                    .settings()
                    .device_entries(device)
                    .filter(|(_, s)| s.has_lighting())
                    .peekable();
                lighting.peek()?;
                let sync = lighting.any(|(_, s)| self.is_sync(s));
                Some((device.to_string(), sync))
            })
            .collect();
        for (device, sync) in touched {
            if sync {
                snapshot.clear_lighting_where(&device, |_, _| true);
            } else {
                snapshot.clear_lighting_where(&device, |_, s| self.is_sync(s));
            }
        }

        snapshot.merge(applied);
        report
    }

    /// Profile to persist for `snapshot`: devices under a global-sync mode
    /// keep only that mode and their speeds.
    pub fn filter_for_save(&self, snapshot: &AppliedState) -> Profile {
        let settings = snapshot.settings();
        let synced: BTreeSet<&str> = settings
            .iter()
            .filter(|(_, s)| self.is_sync(s))
            .map(|(k, _)| k.device.as_str())
            .collect();

        settings
            .iter()
            .map(|(key, setting)| {
                if !synced.contains(key.device.as_str()) {
                    return (key.clone(), setting.clone());
                }
                let filtered = ChannelSetting {
                    mode: setting.mode.clone().filter(|_| self.is_sync(setting)),
                    colors: None,
                    speed: setting.speed.clone(),
                };
                (key.clone(), filtered)
            })
            .collect()
    }

    fn is_sync(&self, setting: &ChannelSetting) -> bool {
        setting
            .mode
            .as_deref()
            .is_some_and(|mode| self.classifier.is_global_sync(mode))
    }

    fn run(&self, profile: &Profile, devices: &[DeviceRecord]) -> (ApplyReport, AppliedState) {
        let mut report = ApplyReport::default();
        let mut applied = AppliedState::new();

        for device_id in profile.devices() {
            let entries: Vec<(&ChannelKey, &ChannelSetting)> =
                profile.device_entries(device_id).collect();

            match devices.iter().find(|d| d.id == device_id) {
                Some(record) => self.apply_device(record, &entries, &mut report, &mut applied),
                None => {
                    debug!("Device {device_id} not present, skipping its entries");
                    for (key, setting) in entries {
                        if setting.has_lighting() {
                            report.push(key, Aspect::Lighting, Outcome::SkippedNotFound);
                        }
                        if setting.speed.is_some() {
                            report.push(key, Aspect::Speed, Outcome::SkippedNotFound);
                        }
                    }
                }
            }
        }

        (report, applied)
    }

    fn apply_device(
        &self,
        record: &DeviceRecord,
        entries: &[(&ChannelKey, &ChannelSetting)],
        report: &mut ApplyReport,
        applied: &mut AppliedState,
    ) {
        let mut lighting: Vec<(&ChannelKey, &str, ModeClass, Option<&[Rgb]>)> = entries
            .iter()
            .filter(|(_, s)| s.has_lighting())
            .map(|(key, setting)| {
                let mode = setting
                    .mode
                    .as_deref()
                    .unwrap_or_else(|| self.classifier.default_color_mode());
                let colors = setting.colors.as_deref().filter(|c| !c.is_empty());
                (*key, mode, self.classifier.classify(mode), colors)
            })
            .collect();
        // `sync` sets the base for every LED, individual channels refine it.
        lighting.sort_by_key(|(key, ..)| key.channel != SYNC_CHANNEL);

        let has_sync = lighting.iter().any(|(_, _, class, _)| *class == ModeClass::GlobalSync);
        if has_sync {
            for (key, mode, _, _) in lighting.iter().filter(|l| l.2 == ModeClass::GlobalSync) {
                let result = self.set_lighting(record, key, mode, None);
                self.finish_lighting(key, mode, None, result, report, applied);
            }
            for (key, mode, _, _) in lighting.iter().filter(|l| l.2 != ModeClass::GlobalSync) {
                debug!("{key}: '{mode}' suppressed by a global-sync mode");
                report.push(key, Aspect::Lighting, Outcome::Suppressed);
            }
        } else {
            for (key, mode, class, colors) in &lighting {
                let colors = match class {
                    ModeClass::RequiresColor => *colors,
                    _ => None,
                };
                let result = self.set_lighting(record, key, mode, colors);
                self.finish_lighting(key, mode, colors, result, report, applied);
            }
        }

        for (key, setting) in entries {
            let Some(speed) = &setting.speed else {
                continue;
            };
            let result = speed.percent().and_then(|percent| {
                if !record.supports_cooling() || !record.has_speed_channel(&key.channel) {
                    return Err(ControlError::UnsupportedOperation(format!(
                        "{} has no speed channel '{}'",
                        record.id, key.channel
                    )));
                }
                record.handle().set_speed(&key.channel, percent)?;
                Ok(percent)
            });
            match result {
                Ok(percent) => {
                    debug!("{key}: speed {percent}%");
                    applied.record_speed(key, percent);
                    report.push(key, Aspect::Speed, Outcome::Applied);
                }
                Err(err) => report.push(key, Aspect::Speed, failure(key, err)),
            }
        }
    }

    fn set_lighting(
        &self,
        record: &DeviceRecord,
        key: &ChannelKey,
        mode: &str,
        colors: Option<&[Rgb]>,
    ) -> ControlResult<()> {
        if !record.supports_lighting() {
            return Err(ControlError::UnsupportedOperation(format!(
                "{} has no lighting",
                record.id
            )));
        }
        let modes = record.modes_for(&key.channel).ok_or_else(|| {
            ControlError::UnsupportedOperation(format!(
                "{} has no lighting channel '{}'",
                record.id, key.channel
            ))
        })?;
        if !modes.is_empty() && !modes.iter().any(|m| m == mode) {
            return Err(ControlError::UnsupportedOperation(format!(
                "mode '{mode}' is not supported on {key}"
            )));
        }

        record.handle().set_mode(&key.channel, mode)?;
        if let Some(colors) = colors {
            record.handle().set_color(&key.channel, colors)?;
        }
        Ok(())
    }

    fn finish_lighting(
        &self,
        key: &ChannelKey,
        mode: &str,
        colors: Option<&[Rgb]>,
        result: ControlResult<()>,
        report: &mut ApplyReport,
        applied: &mut AppliedState,
    ) {
        match result {
            Ok(()) => {
                debug!("{key}: mode '{mode}'{}", if colors.is_some() { " with color" } else { "" });
                applied.record_lighting(key, mode, colors);
                report.push(key, Aspect::Lighting, Outcome::Applied);
            }
            Err(err) => report.push(key, Aspect::Lighting, failure(key, err)),
        }
    }
}

fn failure(key: &ChannelKey, err: ControlError) -> Outcome {
    if err.is_not_found() {
        debug!("{key}: device gone ({err})");
        Outcome::SkippedNotFound
    } else {
        warn!("{key}: {err}");
        Outcome::Failed(err)
    }
}
