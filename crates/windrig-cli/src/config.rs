//! Configuration file support for the windrig console
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/windrig/config.toml`
//! - macOS: `~/Library/Application Support/windrig/config.toml`
//! - Windows: `%APPDATA%\windrig\config.toml`
//!
//! Durations are human-readable strings such as `"10s"` or `"500ms"`.

use crate::error::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use windrig_core::session::DEFAULT_TONGUING_DELAY_MS;
use windrig_core::{Instrument, SessionSettings};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rig server connection
    pub rig: RigSettings,
    /// Initial session parameters
    pub session: SessionDefaults,
    /// Poll and tick periods
    pub polling: PollingSettings,
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "windrig") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = r#"# windrig configuration file

[rig]
# Base URL of the rig server
base_url = "http://localhost:1105"

# Timeout for every request except preprocessing, which may take minutes
request_timeout = "10s"

[session]
# Instrument fitted to the rig: "sks" (saxophone) or "sn" (suona)
instrument = "sn"

# Articulation latency in milliseconds
tonguing_delay_ms = 30

[polling]
# How often the rig's playback status is fetched
status_interval = "1s"

# How often the rig's playback log is fetched
log_interval = "500ms"

# Local timer resolution
timer_resolution = "10ms"
"#;

        fs::write(&path, content)?;
        Ok(path)
    }

    /// Check that every duration setting parses.
    pub fn validate(&self) -> Result<()> {
        self.rig.request_timeout()?;
        self.polling.intervals()?;
        Ok(())
    }

    /// Initial settings for the session controller
    pub fn session_settings(&self) -> Result<SessionSettings> {
        Ok(SessionSettings {
            instrument: self.session.instrument,
            tonguing_delay_ms: self.session.tonguing_delay_ms,
            status_interval: self.polling.intervals()?.status,
        })
    }
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).map_err(|source| Error::Duration { field, source })
}

/// Rig server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RigSettings {
    /// Base URL of the rig server
    pub base_url: String,
    /// Per-request timeout (humantime)
    pub request_timeout: String,
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1105".to_string(),
            request_timeout: "10s".to_string(),
        }
    }
}

impl RigSettings {
    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration("rig.request_timeout", &self.request_timeout)
    }
}

/// Initial session parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub instrument: Instrument,
    pub tonguing_delay_ms: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            instrument: Instrument::default(),
            tonguing_delay_ms: DEFAULT_TONGUING_DELAY_MS,
        }
    }
}

/// Poll and tick periods (humantime strings)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub status_interval: String,
    pub log_interval: String,
    pub timer_resolution: String,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            status_interval: "1s".to_string(),
            log_interval: "500ms".to_string(),
            timer_resolution: "10ms".to_string(),
        }
    }
}

impl PollingSettings {
    pub fn intervals(&self) -> Result<Intervals> {
        let intervals = Intervals {
            status: parse_duration("polling.status_interval", &self.status_interval)?,
            logs: parse_duration("polling.log_interval", &self.log_interval)?,
            tick: parse_duration("polling.timer_resolution", &self.timer_resolution)?,
        };
        // tokio intervals panic on a zero period.
        if intervals.status.is_zero() || intervals.logs.is_zero() || intervals.tick.is_zero() {
            return Err(Error::Config("polling intervals must be non-zero".to_string()));
        }
        Ok(intervals)
    }
}

/// Parsed driver periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub status: Duration,
    pub logs: Duration,
    pub tick: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            status: Duration::from_secs(1),
            logs: Duration::from_millis(500),
            tick: Duration::from_millis(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rig.base_url, "http://localhost:1105");
        assert_eq!(config.rig.request_timeout().unwrap(), Duration::from_secs(10));
        assert_eq!(config.polling.intervals().unwrap(), Intervals::default());
        let settings = config.session_settings().unwrap();
        assert_eq!(settings.instrument, Instrument::Sn);
        assert_eq!(settings.tonguing_delay_ms, 30);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[session]\ninstrument = \"sks\"\n\n[polling]\nstatus_interval = \"2s\""
        )
        .unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.session.instrument, Instrument::Sks);
        assert_eq!(config.session.tonguing_delay_ms, 30);
        let intervals = config.polling.intervals().unwrap();
        assert_eq!(intervals.status, Duration::from_secs(2));
        assert_eq!(intervals.logs, Duration::from_millis(500));
        let settings = config.session_settings().unwrap();
        assert_eq!(settings.status_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rig]\nrequest_timeout = \"soon\"").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(Error::Duration {
                field: "rig.request_timeout",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let polling = PollingSettings {
            timer_resolution: "0s".to_string(),
            ..Default::default()
        };
        assert!(matches!(polling.intervals(), Err(Error::Config(_))));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut config = Config::default();
        config.session.instrument = Instrument::Sks;
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.session.instrument, Instrument::Sks);
        assert_eq!(back.rig.base_url, config.rig.base_url);
    }
}
