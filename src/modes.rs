//! Lighting mode classification.
//!
//! Backends do not report whether a mode takes a color or drives the whole
//! device, so that knowledge lives in a lookup table here. The built-in table
//! covers the common effect names; the configuration can add or override
//! entries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How a lighting mode relates to colors and to the rest of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeClass {
    /// Self-contained effect; any color value is ignored.
    NoColor,
    /// Needs an accompanying color to mean anything.
    RequiresColor,
    /// Drives every LED of the device as one effect; conflicts with per-channel
    /// settings on the same device.
    GlobalSync,
}

/// Effects that take over a device's whole lighting.
const GLOBAL_SYNC_MODES: &[&str] = &[
    "spectrum-wave",
    "color-cycle",
    "rainbow-flow",
    "super-rainbow",
    "rainbow-pulse",
    "covering-marquee",
    "marquee-3",
    "marquee-4",
    "marquee-5",
    "marquee-6",
    "moving-alternating-3",
    "moving-alternating-4",
    "moving-alternating-5",
    "alternating-3",
    "alternating-4",
    "alternating-5",
];

/// Self-contained effects scoped to one channel.
const NO_COLOR_MODES: &[&str] = &["off", "spectrum", "flow"];

/// Mode used when a profile entry carries colors but no mode.
pub const DEFAULT_COLOR_MODE: &str = "fixed";

/// Lookup table from mode name to [`ModeClass`].
///
/// Unknown modes classify as [`ModeClass::RequiresColor`]: the applier then
/// sends the mode alone when no color is given, and mode plus color otherwise,
/// which is safe for any effect.
///
/// # Example
///
/// ```
/// use coolctld::modes::{ModeClass, ModeClassifier};
///
/// let classifier = ModeClassifier::default().with_entry("aurora", ModeClass::GlobalSync);
/// assert_eq!(classifier.classify("spectrum-wave"), ModeClass::GlobalSync);
/// assert_eq!(classifier.classify("off"), ModeClass::NoColor);
/// assert_eq!(classifier.classify("breathing"), ModeClass::RequiresColor);
/// assert_eq!(classifier.classify("aurora"), ModeClass::GlobalSync);
/// ```
#[derive(Debug, Clone)]
pub struct ModeClassifier {
    table: HashMap<String, ModeClass>,
    default_color_mode: String,
}

impl Default for ModeClassifier {
    fn default() -> Self {
        let table = GLOBAL_SYNC_MODES
            .iter()
            .map(|m| (m.to_string(), ModeClass::GlobalSync))
            .chain(NO_COLOR_MODES.iter().map(|m| (m.to_string(), ModeClass::NoColor)))
            .collect();
        Self {
            table,
            default_color_mode: DEFAULT_COLOR_MODE.to_string(),
        }
    }
}

impl ModeClassifier {
    /// Built-in table extended with `overrides`.
    pub fn with_overrides<'a, I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a ModeClass)>,
    {
        overrides
            .into_iter()
            .fold(Self::default(), |acc, (mode, class)| acc.with_entry(mode, *class))
    }

    /// Adds or replaces one entry.
    pub fn with_entry(mut self, mode: impl Into<String>, class: ModeClass) -> Self {
        self.table.insert(normalize(&mode.into()), class);
        self
    }

    pub fn with_default_color_mode(mut self, mode: impl Into<String>) -> Self {
        self.default_color_mode = mode.into();
        self
    }

    pub fn classify(&self, mode: &str) -> ModeClass {
        self.table
            .get(&normalize(mode))
            .copied()
            .unwrap_or(ModeClass::RequiresColor)
    }

    pub fn is_global_sync(&self, mode: &str) -> bool {
        self.classify(mode) == ModeClass::GlobalSync
    }

    /// Mode applied to entries that carry colors but no mode.
    pub fn default_color_mode(&self) -> &str {
        &self.default_color_mode
    }
}

fn normalize(mode: &str) -> String {
    mode.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_global_sync_mode_classifies_as_such() {
        let classifier = ModeClassifier::default();
        for mode in GLOBAL_SYNC_MODES {
            assert_eq!(classifier.classify(mode), ModeClass::GlobalSync, "{mode}");
        }
    }

    #[test]
    fn color_modes_and_unknown_modes_require_color() {
        let classifier = ModeClassifier::default();
        for mode in ["fixed", "breathing", "pulse", "blink", "some-new-effect"] {
            assert_eq!(classifier.classify(mode), ModeClass::RequiresColor, "{mode}");
        }
    }

    #[test]
    fn lookup_ignores_case_and_whitespace() {
        let classifier = ModeClassifier::default();
        assert_eq!(classifier.classify(" Spectrum-Wave "), ModeClass::GlobalSync);
        assert_eq!(classifier.classify("OFF"), ModeClass::NoColor);
    }

    #[test]
    fn overrides_replace_builtin_entries() {
        let overrides = HashMap::from([
            ("color-cycle".to_string(), ModeClass::NoColor),
            ("starry-night".to_string(), ModeClass::GlobalSync),
        ]);
        let classifier = ModeClassifier::with_overrides(&overrides);

        assert_eq!(classifier.classify("color-cycle"), ModeClass::NoColor);
        assert!(classifier.is_global_sync("starry-night"));
        assert!(classifier.is_global_sync("spectrum-wave"));
    }

    #[test]
    fn default_color_mode_is_configurable() {
        assert_eq!(ModeClassifier::default().default_color_mode(), "fixed");
        let classifier = ModeClassifier::default().with_default_color_mode("static");
        assert_eq!(classifier.default_color_mode(), "static");
    }

    #[test]
    fn classes_use_kebab_case_names() {
        let class: ModeClass = serde_yaml::from_str("global-sync").unwrap();
        assert_eq!(class, ModeClass::GlobalSync);
        assert_eq!(serde_yaml::to_string(&ModeClass::NoColor).unwrap().trim(), "no-color");
    }
}
