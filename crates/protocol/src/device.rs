//! Per-device notification records stored in the daemon database.
//!
//! Each registered phone owns one JSON entry under the `mobileraker.fcm`
//! namespace, keyed by device UUID. The record bundles the push token, the
//! user's notification preferences (`settings`) and the companion's own
//! dedupe marker (`snap`). The marker is the only part the companion writes
//! back during evaluation; everything else is owned by the app.
//!
//! Field names on the wire are a mix of camelCase (written by the app) and
//! snake_case (written by the companion), so parsing is hand-rolled over
//! [`serde_json::Value`] instead of derived.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::objects::{EtaSource, PrintState};

/// A device record that cannot be used for notifications.
#[derive(Debug, Error, PartialEq)]
pub enum DeviceRecordError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` has the wrong type")]
    BadField(&'static str),
}

fn req_str(json: &Value, key: &'static str) -> Result<String, DeviceRecordError> {
    match json.get(key) {
        None => Err(DeviceRecordError::MissingField(key)),
        Some(v) => v
            .as_str()
            .map(str::to_owned)
            .ok_or(DeviceRecordError::BadField(key)),
    }
}

/// Device-level webcam preference for snapshot attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebcamPref {
    /// The device opted out of snapshots entirely.
    Disabled,
    /// Use the webcam with this uid.
    Webcam(String),
}

/// The `settings` block: what the user wants to be notified about.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSettings {
    pub created: String,
    pub last_modified: String,
    /// Progress step in whole percent, clamped to at most 50; `-1` disables
    /// progress notifications.
    pub progress: i32,
    /// Print states that produce a state-change notification.
    pub states: Vec<PrintState>,
    pub android_progressbar: bool,
    /// Remaining-time sources, in preference order.
    pub eta_sources: Vec<EtaSource>,
    /// Device-specific sensor exclusions; `None` falls back to the printer's
    /// configured exclusions.
    pub excluded_filament_sensors: Option<Vec<String>>,
    /// `None` means the record predates per-device webcam selection.
    pub snapshot_webcam: Option<WebcamPref>,
}

impl NotificationSettings {
    pub fn from_json(json: &Value) -> Result<Self, DeviceRecordError> {
        let progress_frac = json
            .get("progress")
            .ok_or(DeviceRecordError::MissingField("settings.progress"))?
            .as_f64()
            .ok_or(DeviceRecordError::BadField("settings.progress"))?;
        let progress = if progress_frac > 0.0 {
            ((progress_frac * 100.0).round() as i32).min(50)
        } else {
            -1
        };

        let states = json
            .get("states")
            .and_then(Value::as_array)
            .ok_or(DeviceRecordError::MissingField("settings.states"))?
            .iter()
            .filter_map(Value::as_str)
            .filter_map(PrintState::try_from_wire)
            .collect();

        // The app wrote snake_case here in older releases.
        let android_progressbar = json
            .get("androidProgressbar")
            .or_else(|| json.get("android_progressbar"))
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let eta_sources = match json.get("etaSources").and_then(Value::as_array) {
            Some(raw) => raw
                .iter()
                .filter_map(Value::as_str)
                .filter_map(EtaSource::from_wire)
                .collect(),
            None => vec![EtaSource::Filament, EtaSource::Slicer],
        };

        let excluded_filament_sensors = json
            .get("excludedFilamentSensors")
            .and_then(Value::as_array)
            .map(|raw| {
                raw.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            });

        let snapshot_webcam = match json.get("snapshotWebcam") {
            None => None,
            Some(Value::String(uid)) if !uid.is_empty() => {
                Some(WebcamPref::Webcam(uid.clone()))
            }
            // false, null, or empty string all read as an explicit opt-out.
            Some(_) => Some(WebcamPref::Disabled),
        };

        Ok(Self {
            created: req_str(json, "created").unwrap_or_default(),
            last_modified: req_str(json, "lastModified").unwrap_or_default(),
            progress,
            states,
            android_progressbar,
            eta_sources,
            excluded_filament_sensors,
            snapshot_webcam,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("created".into(), self.created.clone().into());
        map.insert("lastModified".into(), self.last_modified.clone().into());
        let progress_frac = if self.progress > 0 {
            f64::from(self.progress) / 100.0
        } else {
            0.0
        };
        map.insert("progress".into(), json!(progress_frac));
        map.insert(
            "states".into(),
            self.states.iter().map(|s| s.as_str()).collect::<Vec<_>>().into(),
        );
        map.insert("androidProgressbar".into(), self.android_progressbar.into());
        map.insert(
            "etaSources".into(),
            self.eta_sources
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .into(),
        );
        if let Some(excluded) = &self.excluded_filament_sensors {
            map.insert("excludedFilamentSensors".into(), excluded.clone().into());
        }
        match &self.snapshot_webcam {
            None => {}
            Some(WebcamPref::Disabled) => {
                map.insert("snapshotWebcam".into(), false.into());
            }
            Some(WebcamPref::Webcam(uid)) => {
                map.insert("snapshotWebcam".into(), uid.clone().into());
            }
        }
        Value::Object(map)
    }
}

/// The `snap` block: the companion's last-notified marker for one device.
///
/// Progress values are whole percent in memory and fractions (two decimal
/// places) on the wire. A missing progress key parses as `-1`, which never
/// equals a real bucket and so forces a fresh notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMarker {
    pub progress: i32,
    pub progress_live_activity: i32,
    pub progress_progressbar: i32,
    pub state: Option<PrintState>,
    pub m117: String,
    pub gcode_response: Option<String>,
    pub filament_sensors: Vec<String>,
    pub last_progress: DateTime<Utc>,
    pub last_progress_live_activity: DateTime<Utc>,
    pub last_progress_progressbar: DateTime<Utc>,
}

impl Default for NotificationMarker {
    fn default() -> Self {
        Self {
            progress: 0,
            progress_live_activity: 0,
            progress_progressbar: 0,
            state: None,
            m117: String::new(),
            gcode_response: None,
            filament_sensors: Vec::new(),
            last_progress: DateTime::UNIX_EPOCH,
            last_progress_live_activity: DateTime::UNIX_EPOCH,
            last_progress_progressbar: DateTime::UNIX_EPOCH,
        }
    }
}

fn marker_progress(json: &Value, key: &str) -> i32 {
    match json.get(key).and_then(Value::as_f64) {
        Some(frac) => (frac * 100.0).round() as i32,
        None => -1,
    }
}

fn marker_timestamp(json: &Value, key: &str) -> DateTime<Utc> {
    let Some(raw) = json.get(key).and_then(Value::as_str) else {
        return DateTime::UNIX_EPOCH;
    };
    // The app writes RFC 3339; older companion releases wrote naive ISO
    // timestamps without an offset.
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::UNIX_EPOCH)
}

impl NotificationMarker {
    pub fn from_json(json: &Value) -> Self {
        Self {
            progress: marker_progress(json, "progress"),
            progress_live_activity: marker_progress(json, "progress_live_activity"),
            progress_progressbar: marker_progress(json, "progress_progressbar"),
            state: Some(
                json.get("state")
                    .and_then(Value::as_str)
                    .map_or(PrintState::Standby, PrintState::from_wire),
            ),
            m117: json
                .get("m117")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            gcode_response: json
                .get("gcode_response")
                .and_then(Value::as_str)
                .map(str::to_owned),
            filament_sensors: json
                .get("filament_sensors")
                .and_then(Value::as_array)
                .map(|raw| {
                    raw.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            last_progress: marker_timestamp(json, "last_progress"),
            last_progress_live_activity: marker_timestamp(json, "last_progress_live_activity"),
            last_progress_progressbar: marker_timestamp(json, "last_progress_progressbar"),
        }
    }

    pub fn to_json(&self) -> Value {
        let frac = |p: i32| {
            if p > 0 {
                (f64::from(p) / 100.0 * 100.0).round() / 100.0
            } else {
                0.0
            }
        };
        let mut map = Map::new();
        map.insert("progress".into(), json!(frac(self.progress)));
        map.insert(
            "progress_live_activity".into(),
            json!(frac(self.progress_live_activity)),
        );
        map.insert(
            "progress_progressbar".into(),
            json!(frac(self.progress_progressbar)),
        );
        map.insert(
            "state".into(),
            self.state.unwrap_or(PrintState::Standby).as_str().into(),
        );
        map.insert("m117".into(), self.m117.clone().into());
        if let Some(resp) = &self.gcode_response {
            map.insert("gcode_response".into(), resp.clone().into());
        }
        map.insert(
            "filament_sensors".into(),
            self.filament_sensors.clone().into(),
        );
        map.insert(
            "last_progress".into(),
            self.last_progress.to_rfc3339().into(),
        );
        map.insert(
            "last_progress_live_activity".into(),
            self.last_progress_live_activity.to_rfc3339().into(),
        );
        map.insert(
            "last_progress_progressbar".into(),
            self.last_progress_progressbar.to_rfc3339().into(),
        );
        Value::Object(map)
    }

    /// Copy with the fields of `update` applied; `None` keeps the old value.
    pub fn apply(&self, update: MarkerUpdate) -> Self {
        Self {
            progress: update.progress.unwrap_or(self.progress),
            progress_live_activity: update
                .progress_live_activity
                .unwrap_or(self.progress_live_activity),
            progress_progressbar: update
                .progress_progressbar
                .unwrap_or(self.progress_progressbar),
            state: update.state.or(self.state),
            m117: update.m117.unwrap_or_else(|| self.m117.clone()),
            gcode_response: update
                .gcode_response
                .or_else(|| self.gcode_response.clone()),
            filament_sensors: update
                .filament_sensors
                .unwrap_or_else(|| self.filament_sensors.clone()),
            last_progress: update.last_progress.unwrap_or(self.last_progress),
            last_progress_live_activity: update
                .last_progress_live_activity
                .unwrap_or(self.last_progress_live_activity),
            last_progress_progressbar: update
                .last_progress_progressbar
                .unwrap_or(self.last_progress_progressbar),
        }
    }
}

/// Partial marker update produced by one evaluation pass.
///
/// `None` fields are untouched; the database write patches only the fields
/// that actually changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerUpdate {
    pub progress: Option<i32>,
    pub progress_live_activity: Option<i32>,
    pub progress_progressbar: Option<i32>,
    pub state: Option<PrintState>,
    pub m117: Option<String>,
    pub gcode_response: Option<String>,
    pub filament_sensors: Option<Vec<String>>,
    pub last_progress: Option<DateTime<Utc>>,
    pub last_progress_live_activity: Option<DateTime<Utc>>,
    pub last_progress_progressbar: Option<DateTime<Utc>>,
}

impl MarkerUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// APNs extension block; only present on iOS records with a Live Activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Apns {
    pub live_activity: String,
}

impl Apns {
    pub fn from_json(json: &Value) -> Self {
        Self {
            live_activity: json
                .get("liveActivity")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({ "liveActivity": self.live_activity })
    }
}

/// One device's complete notification record.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceNotificationConfig {
    /// Database key: the app-side machine UUID.
    pub machine_id: String,
    pub created: String,
    pub last_modified: String,
    pub fcm_token: String,
    pub machine_name: String,
    pub language: String,
    /// App version string, e.g. `"2.7.2-android"`.
    pub version: Option<String>,
    pub settings: NotificationSettings,
    pub marker: NotificationMarker,
    pub apns: Option<Apns>,
}

impl DeviceNotificationConfig {
    pub fn from_json(machine_id: &str, json: &Value) -> Result<Self, DeviceRecordError> {
        let settings = NotificationSettings::from_json(
            json.get("settings")
                .ok_or(DeviceRecordError::MissingField("settings"))?,
        )?;
        let marker = match json.get("snap") {
            Some(snap) if !snap.is_null() => NotificationMarker::from_json(snap),
            _ => NotificationMarker {
                state: None,
                ..NotificationMarker::default()
            },
        };
        let apns = match json.get("apns") {
            Some(apns) if !apns.is_null() => Some(Apns::from_json(apns)),
            _ => None,
        };
        Ok(Self {
            machine_id: machine_id.to_owned(),
            created: req_str(json, "created")?,
            last_modified: req_str(json, "lastModified")?,
            fcm_token: req_str(json, "fcmToken")?,
            machine_name: req_str(json, "machineName")?,
            language: req_str(json, "language").unwrap_or_else(|_| "en".into()),
            version: json
                .get("version")
                .and_then(Value::as_str)
                .map(str::to_owned),
            settings,
            marker,
            apns,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("created".into(), self.created.clone().into());
        map.insert("lastModified".into(), self.last_modified.clone().into());
        map.insert("fcmToken".into(), self.fcm_token.clone().into());
        map.insert("machineName".into(), self.machine_name.clone().into());
        map.insert("language".into(), self.language.clone().into());
        if let Some(version) = &self.version {
            map.insert("version".into(), version.clone().into());
        }
        map.insert("settings".into(), self.settings.to_json());
        map.insert("snap".into(), self.marker.to_json());
        if let Some(apns) = &self.apns {
            map.insert("apns".into(), apns.to_json());
        }
        Value::Object(map)
    }

    pub fn is_android(&self) -> bool {
        self.version.as_deref().is_some_and(|v| v.contains("android"))
    }

    pub fn is_ios(&self) -> bool {
        self.version.as_deref().is_some_and(|v| v.contains("ios"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> Value {
        json!({
            "created": "2022-11-25T23:03:47.656260",
            "lastModified": "2022-11-26T19:46:59.083649",
            "fcmToken": "token-abc",
            "machineName": "Voron 2.4",
            "language": "en",
            "version": "2.7.2-android",
            "settings": {
                "created": "2022-11-25T23:03:47.656261",
                "lastModified": "2022-11-26T19:46:59.083595",
                "progress": 0.05,
                "states": ["paused", "complete", "error", "printing"],
                "androidProgressbar": true,
                "etaSources": ["filament", "slicer"]
            },
            "snap": {
                "progress": 0.25,
                "state": "printing",
                "m117": "",
                "filament_sensors": []
            },
            "apns": {
                "liveActivity": "la-token"
            }
        })
    }

    #[test]
    fn parses_full_record() {
        let cfg = DeviceNotificationConfig::from_json("machine-1", &sample_record()).unwrap();
        assert_eq!(cfg.machine_id, "machine-1");
        assert_eq!(cfg.fcm_token, "token-abc");
        assert!(cfg.is_android());
        assert!(!cfg.is_ios());
        assert_eq!(cfg.settings.progress, 5);
        assert_eq!(cfg.settings.states.len(), 4);
        assert_eq!(cfg.marker.progress, 25);
        assert_eq!(cfg.marker.state, Some(PrintState::Printing));
        assert_eq!(cfg.apns.as_ref().unwrap().live_activity, "la-token");
    }

    #[test]
    fn progress_setting_clamps_and_disables() {
        let parse = |frac: f64| {
            let mut json = sample_record();
            json["settings"]["progress"] = json!(frac);
            DeviceNotificationConfig::from_json("m", &json)
                .unwrap()
                .settings
                .progress
        };
        assert_eq!(parse(0.25), 25);
        assert_eq!(parse(0.75), 50);
        assert_eq!(parse(0.0), -1);
        assert_eq!(parse(-1.0), -1);
    }

    #[test]
    fn unknown_state_names_are_skipped() {
        let mut json = sample_record();
        json["settings"]["states"] = json!(["printing", "melting", "complete"]);
        let cfg = DeviceNotificationConfig::from_json("m", &json).unwrap();
        assert_eq!(
            cfg.settings.states,
            vec![PrintState::Printing, PrintState::Complete]
        );
    }

    #[test]
    fn eta_sources_default_when_absent() {
        let mut json = sample_record();
        json["settings"].as_object_mut().unwrap().remove("etaSources");
        let cfg = DeviceNotificationConfig::from_json("m", &json).unwrap();
        assert_eq!(
            cfg.settings.eta_sources,
            vec![EtaSource::Filament, EtaSource::Slicer]
        );
    }

    #[test]
    fn snapshot_webcam_variants() {
        let parse = |v: Value| {
            let mut json = sample_record();
            json["settings"]["snapshotWebcam"] = v;
            DeviceNotificationConfig::from_json("m", &json)
                .unwrap()
                .settings
                .snapshot_webcam
        };
        assert_eq!(parse(json!("cam-uid")), Some(WebcamPref::Webcam("cam-uid".into())));
        assert_eq!(parse(json!(false)), Some(WebcamPref::Disabled));
        assert_eq!(parse(Value::Null), Some(WebcamPref::Disabled));
        let cfg = DeviceNotificationConfig::from_json("m", &sample_record()).unwrap();
        assert_eq!(cfg.settings.snapshot_webcam, None);
    }

    #[test]
    fn missing_snap_block_means_no_prior_state() {
        let mut json = sample_record();
        json.as_object_mut().unwrap().remove("snap");
        let cfg = DeviceNotificationConfig::from_json("m", &json).unwrap();
        assert_eq!(cfg.marker.state, None);
        assert_eq!(cfg.marker.progress, 0);
    }

    #[test]
    fn snap_without_state_key_reads_standby() {
        let mut json = sample_record();
        json["snap"] = json!({"progress": 0.1});
        let cfg = DeviceNotificationConfig::from_json("m", &json).unwrap();
        assert_eq!(cfg.marker.state, Some(PrintState::Standby));
        assert_eq!(cfg.marker.progress, 10);
        // Missing sibling progress keys disable their buckets.
        assert_eq!(cfg.marker.progress_live_activity, -1);
    }

    #[test]
    fn marker_roundtrips_through_fractions() {
        let marker = NotificationMarker {
            progress: 25,
            progress_live_activity: 7,
            progress_progressbar: 100,
            state: Some(PrintState::Paused),
            m117: "$MR$:hello".into(),
            gcode_response: Some("MR_NOTIFY:Title|Body".into()),
            filament_sensors: vec!["runout".into()],
            last_progress: DateTime::parse_from_rfc3339("2023-05-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            ..NotificationMarker::default()
        };
        let back = NotificationMarker::from_json(&marker.to_json());
        assert_eq!(back, marker);
    }

    #[test]
    fn marker_parses_naive_timestamps() {
        let json = json!({
            "progress": 0.5,
            "state": "printing",
            "last_progress": "2022-11-25T23:03:47.656260"
        });
        let marker = NotificationMarker::from_json(&json);
        assert_eq!(marker.last_progress.timestamp(), 1_669_417_427);
    }

    #[test]
    fn marker_apply_patches_only_given_fields() {
        let base = NotificationMarker {
            progress: 25,
            state: Some(PrintState::Printing),
            m117: "old".into(),
            ..NotificationMarker::default()
        };
        let patched = base.apply(MarkerUpdate {
            progress: Some(30),
            ..MarkerUpdate::default()
        });
        assert_eq!(patched.progress, 30);
        assert_eq!(patched.state, Some(PrintState::Printing));
        assert_eq!(patched.m117, "old");
        assert!(MarkerUpdate::default().is_empty());
    }

    #[test]
    fn record_roundtrips_to_json() {
        let cfg = DeviceNotificationConfig::from_json("m", &sample_record()).unwrap();
        let back = DeviceNotificationConfig::from_json("m", &cfg.to_json()).unwrap();
        assert_eq!(back.settings, cfg.settings);
        assert_eq!(back.marker.progress, cfg.marker.progress);
        assert_eq!(back.apns, cfg.apns);
    }
}
