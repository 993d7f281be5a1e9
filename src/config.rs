//! Configuration management for the coolctld daemon.
//!
//! Handles loading, parsing, and validation of the YAML configuration file
//! that selects backends, tunes the scheduling triggers and extends the mode
//! classification table.

use anyhow::{Context, Result};
use log::{LevelFilter, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::sync::RwLock;

use crate::modes::{ModeClass, ModeClassifier};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "COOLCTLD_CONFIG";

/// Environment variable overriding `log_level`.
pub const LOG_LEVEL_ENV: &str = "COOLCTLD_LOG_LEVEL";

/// Main configuration structure for the coolctld daemon.
///
/// Every key is optional except `version`; a missing file behaves like an
/// empty one.
///
/// # Example
///
/// ```yaml
/// version: 1
/// log_level: debug
/// startup_delay_ms: 2000
/// status_interval_seconds: 10
/// profiles_dir: /home/me/.config/coolctld/profiles
///
/// backends:
///   riing_quad:
///     devices:
///       - vid: 0x264a
///         pid: 0x2330
///   hwmon:
///     min_pwm: 64
///     skip_chips: [acpitz, nvme]
///
/// mode_classes:
///   rainbow-sweep: global-sync
///   candle: no-color
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// `error`, `warn`, `info`, `debug` or `trace`.
    #[serde(default = "defaults::log_level")]
    pub log_level: String,

    /// Delay before the first discovery after startup.
    #[serde(default = "defaults::startup_delay_ms")]
    pub startup_delay_ms: u64,

    /// Interval of the recurring status refresh.
    #[serde(default = "defaults::status_interval_seconds")]
    pub status_interval_seconds: u64,

    /// Restore the saved current state once devices are discovered.
    #[serde(default = "defaults::enabled")]
    pub auto_apply_on_startup: bool,

    /// Put every discovered device into software control before applying.
    #[serde(default = "defaults::enabled")]
    pub auto_initialize_on_startup: bool,

    /// Directory holding one JSON file per named profile.
    #[serde(default = "defaults::profiles_dir")]
    pub profiles_dir: PathBuf,

    /// File holding the last applied state.
    #[serde(default = "defaults::state_file")]
    pub state_file: PathBuf,

    #[serde(default)]
    pub backends: BackendsCfg,

    /// Extra or overriding mode classifications, merged over the built-in table.
    #[serde(default)]
    pub mode_classes: HashMap<String, ModeClass>,

    /// Mode issued for entries that carry colors but no mode.
    #[serde(default = "defaults::default_color_mode")]
    pub default_color_mode: String,
}

/// Per-backend settings. A disabled backend is never registered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendsCfg {
    #[serde(default)]
    pub riing_quad: RiingQuadCfg,

    #[serde(default)]
    pub hwmon: HwmonCfg,
}

/// Thermaltake Riing Quad HID controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiingQuadCfg {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// USB ids treated as Riing Quad controllers.
    #[serde(default = "defaults::riing_quad_devices")]
    pub devices: Vec<UsbId>,
}

impl Default for RiingQuadCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            devices: defaults::riing_quad_devices(),
        }
    }
}

/// USB vendor/product pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

/// Motherboard PWM outputs exposed through the hwmon class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HwmonCfg {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    #[serde(default = "defaults::hwmon_root")]
    pub root: PathBuf,

    /// Lowest raw PWM value ever written (0..=255).
    #[serde(default = "defaults::min_pwm")]
    pub min_pwm: u16,

    /// Chip names (or name prefixes) never offered for control.
    #[serde(default = "defaults::skip_chips")]
    pub skip_chips: Vec<String>,
}

impl Default for HwmonCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            root: defaults::hwmon_root(),
            min_pwm: defaults::min_pwm(),
            skip_chips: defaults::skip_chips(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            log_level: defaults::log_level(),
            startup_delay_ms: defaults::startup_delay_ms(),
            status_interval_seconds: defaults::status_interval_seconds(),
            auto_apply_on_startup: true,
            auto_initialize_on_startup: true,
            profiles_dir: defaults::profiles_dir(),
            state_file: defaults::state_file(),
            backends: BackendsCfg::default(),
            mode_classes: HashMap::new(),
            default_color_mode: defaults::default_color_mode(),
        }
    }
}

impl Config {
    /// Validates the configuration for consistency.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use coolctld::config::Config;
    ///
    /// let config = Config::default();
    /// config.validate()?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            anyhow::bail!("Unsupported config version {}", self.version);
        }

        LevelFilter::from_str(&self.log_level)
            .map_err(|_| anyhow::anyhow!("Unknown log level '{}'", self.log_level))?;

        if self.status_interval_seconds == 0 {
            anyhow::bail!("status_interval_seconds must be greater than zero");
        }

        if self.backends.hwmon.min_pwm > u16::from(u8::MAX) {
            anyhow::bail!(
                "hwmon min_pwm {} is out of range (0..=255)",
                self.backends.hwmon.min_pwm
            );
        }

        if self.profiles_dir.as_os_str().is_empty() || self.profiles_dir == Path::new("/") {
            anyhow::bail!(
                "profiles_dir '{}' is not a usable directory",
                self.profiles_dir.display()
            );
        }

        if self.state_file.file_name().is_none() {
            anyhow::bail!("state_file '{}' has no file name", self.state_file.display());
        }

        if self.default_color_mode.trim().is_empty() {
            anyhow::bail!("default_color_mode cannot be empty");
        }

        Ok(())
    }

    /// Effective log level: `COOLCTLD_LOG_LEVEL` wins over `log_level`.
    pub fn log_filter(&self) -> LevelFilter {
        if let Ok(level) = env::var(LOG_LEVEL_ENV) {
            match LevelFilter::from_str(&level) {
                Ok(filter) => return filter,
                Err(_) => warn!("Ignoring invalid {LOG_LEVEL_ENV}={level}"),
            }
        }
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_seconds)
    }

    /// Built-in classification table extended by `mode_classes`.
    pub fn classifier(&self) -> ModeClassifier {
        ModeClassifier::with_overrides(&self.mode_classes)
            .with_default_color_mode(self.default_color_mode.as_str())
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::UsbId;

    pub fn log_level() -> String {
        "info".to_string()
    }

    pub fn startup_delay_ms() -> u64 {
        1500
    }

    pub fn status_interval_seconds() -> u64 {
        5
    }

    pub fn enabled() -> bool {
        true
    }

    /// Per-user data lives next to the configuration when a home exists.
    fn data_dir() -> PathBuf {
        super::user_config_dir()
            .map(|dir| dir.join("coolctld"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/coolctld"))
    }

    pub fn profiles_dir() -> PathBuf {
        data_dir().join("profiles")
    }

    pub fn state_file() -> PathBuf {
        data_dir().join("current.json")
    }

    pub fn default_color_mode() -> String {
        crate::modes::DEFAULT_COLOR_MODE.to_string()
    }

    pub fn riing_quad_devices() -> Vec<UsbId> {
        (0x2260..=0x226F)
            .chain([0x2330])
            .map(|pid| UsbId { vid: 0x264A, pid })
            .collect()
    }

    pub fn hwmon_root() -> PathBuf {
        PathBuf::from("/sys/class/hwmon")
    }

    /// About 20 % duty.
    pub fn min_pwm() -> u16 {
        51
    }

    /// Temperature-only chips.
    pub fn skip_chips() -> Vec<String> {
        ["acpitz", "pch_", "nvme", "coretemp", "k10temp", "zenpower"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}

fn user_config_dir() -> Option<PathBuf> {
    env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
}

fn locate_config() -> Option<PathBuf> {
    if let Ok(env_path) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = user_config_dir() {
        cfg_dir.push("coolctld/config.yml");
        if cfg_dir.exists() {
            return Some(cfg_dir);
        }
    }

    let etc = Path::new("/etc/coolctld/config.yml");
    if etc.exists() {
        return Some(etc.to_path_buf());
    }

    None
}

/// Configuration manager that handles both config data and file operations.
///
/// # Example
///
/// ```no_run
/// use coolctld::config::ConfigManager;
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// // Load from specific path
/// let config_manager = ConfigManager::load(Some(PathBuf::from("config.yml"))).await?;
///
/// // Load from standard locations, or defaults
/// let config_manager = ConfigManager::load(None).await?;
///
/// let interval = config_manager.get().await.status_interval();
/// config_manager.reload().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the given config and path.
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. COOLCTLD_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/coolctld/config.yml or ~/.config/coolctld/config.yml
    /// 4. /etc/coolctld/config.yml
    ///
    /// An explicitly named file must exist. When no standard location has one,
    /// the defaults are used and the per-user location becomes the path that
    /// `reload` reads.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path.or_else(locate_config) {
            Some(p) => p,
            None => {
                let fallback = user_config_dir()
                    .map(|dir| dir.join("coolctld/config.yml"))
                    .unwrap_or_else(|| PathBuf::from("/etc/coolctld/config.yml"));
                info!(
                    "No configuration file found, using defaults (reload reads {})",
                    fallback.display()
                );
                return Ok(Self::new(Config::default(), fallback));
            }
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path).await?;

        Ok(Self::new(config, config_path))
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    /// Returns the path to the configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reloads configuration from the same file. On any error the current
    /// configuration stays in place.
    pub async fn reload(&self) -> Result<()> {
        info!("Reloading config from: {}", self.path.display());
        let new_config = Self::load_config_from_path(&self.path).await?;

        *self.config.write().await = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Clones the current configuration.
    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    async fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}
