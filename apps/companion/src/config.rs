//! Companion configuration.
//!
//! Configuration is stored as TOML at `~/.config/printwatch/companion.toml`,
//! or at the path given as the first CLI argument. A missing file yields the
//! defaults: one printer on the local daemon, notifications in English.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::FixedOffset;
use serde::Deserialize;

use printwatch_notify::NotifyConfig;
use printwatch_notify::template::FALLBACK_ETA_FORMAT;

pub const DEFAULT_MOONRAKER_URI: &str = "ws://127.0.0.1:7125/websocket";
const DEFAULT_PUSH_URI: &str = "https://mobileraker.eliteschw31n.de";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default, rename = "printer")]
    pub printers: Vec<PrinterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Notification language for all devices of this installation.
    pub language: String,
    /// strftime pattern for the `$eta` placeholder.
    pub eta_format: String,
    /// UTC offset ETAs are rendered in, e.g. `"+02:00"`.
    pub utc_offset: String,
    pub include_snapshot: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            language: "en".into(),
            eta_format: FALLBACK_ETA_FORMAT.into(),
            utc_offset: "+00:00".into(),
            include_snapshot: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub uri: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_PUSH_URI.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    pub name: String,
    pub moonraker_uri: String,
    pub api_key: Option<String>,
    /// Sensors that never notify; devices may override with their own list.
    pub exclude_sensors: Vec<String>,
    /// Fallback camera for devices without a webcam selection.
    pub snapshot_uri: Option<String>,
    pub snapshot_rotation: i32,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            name: "printer".into(),
            moonraker_uri: DEFAULT_MOONRAKER_URI.into(),
            api_key: None,
            exclude_sensors: Vec::new(),
            snapshot_uri: None,
            snapshot_rotation: 0,
        }
    }
}

impl AppConfig {
    /// Loads configuration from disk.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path(),
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        if config.printers.is_empty() {
            config.printers.push(PrinterConfig::default());
        }
        Ok(config)
    }

    /// The configuration used when no file exists.
    pub fn with_defaults() -> Self {
        Self {
            printers: vec![PrinterConfig::default()],
            ..Self::default()
        }
    }

    pub fn notify_config(&self) -> anyhow::Result<NotifyConfig> {
        Ok(NotifyConfig {
            language: self.general.language.clone(),
            eta_format: self.general.eta_format.clone(),
            timezone: parse_utc_offset(&self.general.utc_offset)?,
        })
    }
}

fn parse_utc_offset(raw: &str) -> anyhow::Result<FixedOffset> {
    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'-') => (-1, &raw[1..]),
        Some(b'+') => (1, &raw[1..]),
        _ => (1, raw),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours
        .parse()
        .with_context(|| format!("bad UTC offset `{raw}`"))?;
    let minutes: i32 = minutes
        .parse()
        .with_context(|| format!("bad UTC offset `{raw}`"))?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .with_context(|| format!("UTC offset `{raw}` out of range"))
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("printwatch")
        .join("companion.toml")
}
