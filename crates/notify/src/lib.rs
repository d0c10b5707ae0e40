//! Decides which push notifications a printer snapshot warrants.
//!
//! The evaluator is pure: it reads a device record and two snapshots and
//! returns payloads plus flags, leaving all I/O (database writes, webcam
//! capture, the actual push) to the orchestrator.

use chrono::FixedOffset;

pub mod evaluator;
pub mod i18n;
pub mod template;
pub mod util;

pub use evaluator::{EvaluationResult, NotificationEvaluator};

/// Installation-wide notification settings from the local config file.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Language for all devices of this installation.
    pub language: String,
    /// strftime pattern for the `$eta` placeholder.
    pub eta_format: String,
    /// Timezone ETAs are rendered in.
    pub timezone: FixedOffset,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            language: "en".into(),
            eta_format: template::FALLBACK_ETA_FORMAT.into(),
            timezone: FixedOffset::east_opt(0).unwrap(),
        }
    }
}

/// Server-side minimums that cap how chatty a single device may be,
/// regardless of its own settings.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Smallest progress step in whole percent.
    pub increments: i32,
    /// Time-based fallback interval for progress-bar and live-activity
    /// updates, in seconds.
    pub interval_secs: i64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            increments: 5,
            interval_secs: 300,
        }
    }
}
