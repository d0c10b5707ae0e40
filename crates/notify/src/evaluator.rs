//! The seven notification rules, evaluated per device against the current
//! snapshot and the device's dedupe marker.

use chrono::{DateTime, Utc};
use tracing::debug;

use printwatch_protocol::PrintState;
use printwatch_protocol::device::DeviceNotificationConfig;
use printwatch_protocol::push::{
    LiveActivityContent, NotificationContent, NotificationPayload, ProgressBarContent,
};
use printwatch_protocol::version::version_at_least;
use printwatch_sync::Snapshot;

use crate::util::{interval_reached, notification_id};
use crate::{NotifyConfig, RemoteConfig, i18n, template};

/// M117 messages must start with this to become a notification.
pub const M117_PREFIX: &str = "$MR$:";
/// Console responses must start with this to become a notification.
pub const GCODE_RESPONSE_PREFIX: &str = "MR_NOTIFY:";

/// Everything one evaluation pass produced for a single device.
///
/// The flags tell the orchestrator which marker bucket fields to advance;
/// they cannot be recovered from the payload list alone.
#[derive(Debug, Default)]
pub struct EvaluationResult {
    pub notifications: Vec<NotificationPayload>,
    pub has_live_activity: bool,
    pub has_progress: bool,
    pub has_progressbar: bool,
}

/// Pure rule engine: no I/O, explicit clock.
pub struct NotificationEvaluator {
    config: NotifyConfig,
    remote: RemoteConfig,
}

impl NotificationEvaluator {
    pub fn new(config: NotifyConfig, remote: RemoteConfig) -> Self {
        Self { config, remote }
    }

    /// Runs every rule for one device.
    ///
    /// `last_snapshot` is the previous published snapshot (for the
    /// live-activity ETA delta), `exclude_sensors` the printer-level sensor
    /// exclusions.
    pub fn evaluate(
        &self,
        cfg: &DeviceNotificationConfig,
        snap: &Snapshot,
        last_snapshot: Option<&Snapshot>,
        exclude_sensors: &[String],
        now: DateTime<Utc>,
    ) -> EvaluationResult {
        let mut result = EvaluationResult::default();

        if let Some(n) = self.state_notification(cfg, snap, now) {
            result.notifications.push(NotificationPayload::Notification(n));
        }
        if let Some(n) = self.progress_notification(cfg, snap, now) {
            result.has_progress = true;
            result.notifications.push(NotificationPayload::Notification(n));
        }
        if let Some(n) = self.progressbar_notification(cfg, snap, now) {
            result.has_progressbar = true;
            result.notifications.push(NotificationPayload::ProgressBar(n));
        }
        if let Some(n) = self.custom_notification(cfg, snap, now, true) {
            result.notifications.push(NotificationPayload::Notification(n));
        }
        if let Some(n) = self.custom_notification(cfg, snap, now, false) {
            result.notifications.push(NotificationPayload::Notification(n));
        }
        if let Some(n) = self.live_activity_update(cfg, snap, last_snapshot, now) {
            result.has_live_activity = true;
            result.notifications.push(NotificationPayload::LiveActivity(n));
        }
        for n in self.filament_sensor_notifications(cfg, snap, exclude_sensors, now) {
            result.notifications.push(NotificationPayload::Notification(n));
        }

        debug!(
            device = %cfg.machine_id,
            count = result.notifications.len(),
            "evaluation pass done"
        );
        result
    }

    fn text(
        &self,
        key: &str,
        cfg: &DeviceNotificationConfig,
        snap: &Snapshot,
        now: DateTime<Utc>,
        extra: &[(&str, String)],
    ) -> String {
        template::replace_placeholders(
            i18n::translate(&self.config.language, key),
            cfg,
            snap,
            &self.config,
            now,
            extra,
        )
    }

    fn state_notification(
        &self,
        cfg: &DeviceNotificationConfig,
        snap: &Snapshot,
        now: DateTime<Utc>,
    ) -> Option<NotificationContent> {
        if cfg.marker.state == Some(snap.print_state) {
            return None;
        }
        // Errors are only worth a push when a print was actually running.
        if snap.print_state == PrintState::Error && cfg.marker.state != Some(PrintState::Printing) {
            return None;
        }
        if !cfg.settings.states.contains(&snap.print_state) {
            return None;
        }
        if snap.is_timelapse_pause() {
            return None;
        }

        let body_key = match snap.print_state {
            PrintState::Printing if cfg.marker.state == Some(PrintState::Paused) => {
                "state_resumed_body"
            }
            PrintState::Printing => "state_printing_body",
            PrintState::Paused => "state_paused_body",
            PrintState::Complete => "state_completed_body",
            PrintState::Cancelled => "state_cancelled_body",
            PrintState::Error => "state_error_body",
            PrintState::Standby => "state_standby_body",
        };

        Some(NotificationContent {
            id: notification_id(&cfg.machine_id, 0),
            channel: format!("{}-statusUpdates", cfg.machine_id),
            title: self.text("state_title", cfg, snap, now, &[]),
            body: self.text(body_key, cfg, snap, now, &[]),
            image: None,
        })
    }

    fn progress_notification(
        &self,
        cfg: &DeviceNotificationConfig,
        snap: &Snapshot,
        now: DateTime<Utc>,
    ) -> Option<NotificationContent> {
        if cfg.settings.progress == -1 {
            return None;
        }
        if !snap.print_state.is_active() {
            return None;
        }
        let progress = snap.progress()?;
        // 100 % is covered by the printing -> complete state notification.
        if progress == 100 {
            return None;
        }

        let step = self.remote.increments.max(cfg.settings.progress);
        let was_active = cfg.marker.state.is_some_and(PrintState::is_active);
        if was_active && !interval_reached(cfg.marker.progress, progress, step) {
            return None;
        }

        Some(NotificationContent {
            id: notification_id(&cfg.machine_id, 1),
            channel: format!("{}-progressUpdates", cfg.machine_id),
            title: self.text("print_progress_title", cfg, snap, now, &[]),
            body: self.text("print_progress_body", cfg, snap, now, &[]),
            image: None,
        })
    }

    fn progressbar_notification(
        &self,
        cfg: &DeviceNotificationConfig,
        snap: &Snapshot,
        now: DateTime<Utc>,
    ) -> Option<ProgressBarContent> {
        if !cfg.settings.android_progressbar || !cfg.is_android() {
            return None;
        }
        let version = cfg.version.as_deref()?;
        if !version_at_least(version, "2.6.10") {
            return None;
        }
        if !snap.print_state.is_active() {
            return None;
        }
        let progress = snap.progress()?;
        if progress == 100 {
            return None;
        }

        let perc_reached = interval_reached(
            cfg.marker.progress_progressbar,
            progress,
            self.remote.increments,
        );
        let time_reached = (now - cfg.marker.last_progress_progressbar).num_seconds()
            >= self.remote.interval_secs;
        let was_active = cfg.marker.state.is_some_and(PrintState::is_active);
        if was_active && !perc_reached && !time_reached {
            return None;
        }

        // Older app versions only know the shared progress channel.
        let channel = if version_at_least(version, "2.7.2") {
            format!("{}-progressBarUpdates", cfg.machine_id)
        } else {
            format!("{}-progressUpdates", cfg.machine_id)
        };

        Some(ProgressBarContent {
            progress,
            id: notification_id(&cfg.machine_id, 4),
            channel,
            title: self.text("print_progress_title", cfg, snap, now, &[]),
            body: self.text("print_progress_body", cfg, snap, now, &[]),
        })
    }

    fn live_activity_update(
        &self,
        cfg: &DeviceNotificationConfig,
        snap: &Snapshot,
        last_snapshot: Option<&Snapshot>,
        now: DateTime<Utc>,
    ) -> Option<LiveActivityContent> {
        let token = cfg.apns.as_ref().map(|a| a.live_activity.as_str())?;
        if token.is_empty() {
            return None;
        }
        let progress = snap.progress()?;

        let sources = &cfg.settings.eta_sources;
        // The delta scales with the job length so short prints still update.
        let eta_delta_minutes = snap.eta_window().map_or(15, |w| w.max(15));
        let last_remaining = last_snapshot.and_then(|s| s.remaining_time_avg(sources));
        let cur_remaining = snap.remaining_time_avg(sources);
        let eta_update = match (last_remaining, cur_remaining) {
            (None, Some(_)) => true,
            (Some(last), Some(cur)) => (last - cur).abs() > eta_delta_minutes * 60,
            _ => false,
        };

        let perc_reached = interval_reached(
            cfg.marker.progress_live_activity,
            progress,
            self.remote.increments,
        );
        let time_reached = (now - cfg.marker.last_progress_live_activity).num_seconds()
            >= self.remote.interval_secs
            && snap.print_state.is_active();
        let state_changed = cfg.marker.state != Some(snap.print_state);
        if !perc_reached && !state_changed && !eta_update && !time_reached {
            return None;
        }

        let event = if snap.print_state.is_active() {
            "update"
        } else {
            "end"
        };

        Some(LiveActivityContent {
            event: event.into(),
            token: token.into(),
            progress,
            eta: snap.eta_seconds_utc(now, sources),
            print_state: snap.print_state.as_str().into(),
            file: snap.filename().map(str::to_owned),
        })
    }

    fn custom_notification(
        &self,
        cfg: &DeviceNotificationConfig,
        snap: &Snapshot,
        now: DateTime<Utc>,
        is_m117: bool,
    ) -> Option<NotificationContent> {
        let (candidate, prefix) = if is_m117 {
            (snap.m117.as_deref(), M117_PREFIX)
        } else {
            (snap.gcode_response.as_deref(), GCODE_RESPONSE_PREFIX)
        };
        let message = candidate?.strip_prefix(prefix)?;
        if message.is_empty() {
            return None;
        }

        // Hashes in the marker dedupe repeats of the same message.
        let already_sent = if is_m117 {
            cfg.marker.m117 == snap.m117_hash
        } else {
            cfg.marker.gcode_response.as_deref() == Some(snap.gcode_response_hash.as_str())
        };
        if already_sent {
            return None;
        }

        // "title|body" picks a custom title, a bare message gets the stock one.
        let parts: Vec<&str> = message.split('|').collect();
        let (title, body) = if parts.len() == 2 {
            (parts[0].trim().to_owned(), parts[1].trim())
        } else {
            (
                i18n::translate(&self.config.language, "m117_custom_title").to_owned(),
                parts[0].trim(),
            )
        };

        Some(NotificationContent {
            id: notification_id(&cfg.machine_id, 2),
            channel: format!("{}-m117", cfg.machine_id),
            title: template::replace_placeholders(&title, cfg, snap, &self.config, now, &[]),
            body: template::replace_placeholders(body, cfg, snap, &self.config, now, &[]),
            image: None,
        })
    }

    fn filament_sensor_notifications(
        &self,
        cfg: &DeviceNotificationConfig,
        snap: &Snapshot,
        exclude_sensors: &[String],
        now: DateTime<Utc>,
    ) -> Vec<NotificationContent> {
        let mut notifications = Vec::new();
        for (key, sensor) in &snap.filament_sensors {
            let qualified = format!("{}#{}", sensor.kind.as_str(), sensor.name);
            if exclude_sensors.contains(key) || exclude_sensors.contains(&qualified) {
                continue;
            }
            if !sensor.enabled {
                continue;
            }
            // One notification per runout; the marker clears once the sensor
            // sees filament again.
            if sensor.filament_detected || cfg.marker.filament_sensors.contains(key) {
                continue;
            }

            let extra = [("sensor", sensor.name.clone())];
            notifications.push(NotificationContent {
                id: notification_id(&cfg.machine_id, 3),
                channel: format!("{}-filamentSensor", cfg.machine_id),
                title: self.text("filament_sensor_triggered_title", cfg, snap, now, &extra),
                body: self.text("filament_sensor_triggered_body", cfg, snap, now, &extra),
                image: None,
            });
        }
        notifications
    }
}
