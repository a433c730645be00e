//! Dashboard Configuration
//!
//! One TOML file describes a dashboard: display settings, logging, the
//! providers it reads and the widget tree. Providers may also live in a
//! separate file (see [`load_providers`]).
//!
//! ```toml
//! [graphics]
//! fps_limit = 30
//! resolution = [480, 320]
//!
//! [logging]
//! level = "info"
//!
//! [providers.weather]
//! type = "rest"
//! url = "https://example.invalid/weather"
//! json_path = "current.temp"
//!
//! [[widgets]]
//! widget = "provider"
//! providers = ["weather"]
//! ```
//!
//! # Priority
//!
//! CLI flags (applied by the caller) > environment > file > defaults.
//!
//! | Variable | Field |
//! |---|---|
//! | `GRYDGETS_FPS` | `graphics.fps_limit` |
//! | `GRYDGETS_LOG` | `logging.level` |

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::provider::ProviderSpec;
use crate::surface::Size;
use crate::tree::WidgetSpec;

/// Highest accepted frame rate
pub const MAX_FPS: u32 = 60;

/// Environment variable overriding `graphics.fps_limit`
pub const ENV_FPS: &str = "GRYDGETS_FPS";

/// Environment variable overriding `logging.level`
pub const ENV_LOG: &str = "GRYDGETS_LOG";

// ============================================================================
// Sections
// ============================================================================

/// `[graphics]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Frames per second, 1..=60
    #[serde(alias = "fps-limit")]
    pub fps_limit: u32,
    /// Width and height in pixels
    pub resolution: [u32; 2],
    /// Ask the display backend for fullscreen
    pub fullscreen: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            fps_limit: MAX_FPS,
            resolution: [480, 320],
            fullscreen: false,
        }
    }
}

impl GraphicsConfig {
    /// Screen size
    pub fn size(&self) -> Size {
        Size::new(self.resolution[0], self.resolution[1])
    }

    /// Target time between frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps_limit.max(1)))
    }
}

/// Accepted log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-fetch detail
    Debug,
    /// Lifecycle events
    #[default]
    Info,
    /// Recovered failures only
    #[serde(alias = "warn")]
    Warning,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            other => Err(ConfigError::ValidationError(format!(
                "unknown log level '{other}' (expected debug, info or warning)"
            ))),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level
    pub level: LogLevel,
}

// ============================================================================
// DashboardConfig
// ============================================================================

/// A whole dashboard file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Display settings
    pub graphics: GraphicsConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Providers declared inline, by name
    pub providers: BTreeMap<String, ProviderSpec>,
    /// Widget trees; the first one is shown
    pub widgets: Vec<WidgetSpec>,
    /// File this was loaded from
    #[serde(skip)]
    pub config_file_path: Option<PathBuf>,
}

impl DashboardConfig {
    /// Check ranges and that there is something to show
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_FPS).contains(&self.graphics.fps_limit) {
            return Err(ConfigError::ValidationError(format!(
                "graphics.fps_limit must be between 1 and {MAX_FPS}, got {}",
                self.graphics.fps_limit
            )));
        }
        if self.graphics.resolution.contains(&0) {
            return Err(ConfigError::ValidationError(format!(
                "graphics.resolution must be at least 1x1, got {:?}",
                self.graphics.resolution
            )));
        }
        if self.widgets.is_empty() {
            return Err(ConfigError::ValidationError("no [[widgets]] declared".to_string()));
        }
        Ok(())
    }

    /// The widget tree to display
    pub fn root_widget(&self) -> Option<&WidgetSpec> {
        self.widgets.first()
    }

    /// Merge providers from another source; inline declarations win
    pub fn merge_providers(&mut self, extra: BTreeMap<String, ProviderSpec>) {
        for (name, spec) in extra {
            if self.providers.contains_key(&name) {
                warn!(provider = %name, "Provider declared twice, keeping the inline one");
                continue;
            }
            self.providers.insert(name, spec);
        }
    }

    /// Apply `GRYDGETS_*` variables from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(ENV_FPS) {
            match raw.trim().parse::<u32>() {
                Ok(fps) => self.graphics.fps_limit = fps,
                Err(e) => warn!(var = ENV_FPS, value = %raw, error = %e, "Ignoring override"),
            }
        }
        if let Some(raw) = lookup(ENV_LOG) {
            match raw.parse::<LogLevel>() {
                Ok(level) => self.logging.level = level,
                Err(e) => warn!(var = ENV_LOG, value = %raw, error = %e, "Ignoring override"),
            }
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProvidersFile {
    providers: BTreeMap<String, ProviderSpec>,
}

/// `$XDG_CONFIG_HOME/grydgets/grydgets.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("grydgets").join("grydgets.toml"))
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Parse and validate a dashboard from TOML text
///
/// The environment is not consulted.
pub fn load_config_from_str(content: &str) -> Result<DashboardConfig, ConfigError> {
    let config: DashboardConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load a dashboard file, then apply environment overrides
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the
/// resulting values are out of range.
pub fn load_config(path: &Path) -> Result<DashboardConfig, ConfigError> {
    let mut config: DashboardConfig = toml::from_str(&read(path)?)?;
    config.config_file_path = Some(path.to_path_buf());
    config.apply_env();
    config.validate()?;

    info!(
        path = %path.display(),
        fps = config.graphics.fps_limit,
        providers = config.providers.len(),
        "Loaded configuration from file"
    );
    Ok(config)
}

/// Load `[providers.*]` tables from a separate file
///
/// A missing file yields no providers.
pub fn load_providers(path: &Path) -> Result<BTreeMap<String, ProviderSpec>, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "No providers file");
        return Ok(BTreeMap::new());
    }
    let file: ProvidersFile = toml::from_str(&read(path)?)?;
    info!(path = %path.display(), count = file.providers.len(), "Loaded providers");
    Ok(file.providers)
}
